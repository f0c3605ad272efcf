// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Block implementations.
//!
//! Each block maps declared inputs onto the variables of one static GraphQL
//! document and republishes the typed response as an event. `triggerRun`
//! and `performTask` additionally follow the remote operation to completion
//! through the [`crate::correlator`].

mod on_run_state_change;
mod perform_task;
mod runs;
mod stacks;
mod trigger_run;

// Re-export blocks to ensure they're linked and registered
pub use on_run_state_change::{OnRunStateChange, RUN_STATE_CHANGES_OUTPUT, RunFilter};
pub use perform_task::PerformTask;
pub use runs::{ConfirmRun, DiscardRun, GetRun, RetryRun, StartRun, StopRun};
pub use stacks::{GetStack, LockStack, UnlockStack};
pub use trigger_run::TriggerRun;
