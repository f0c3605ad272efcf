// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Spacelift automation blocks.
//!
//! | Type id | Behaviour |
//! |---------|-----------|
//! | `triggerRun` | Trigger a run, emit `stateChanged` per transition and `completed` at the end |
//! | `performTask` | Same for a one-off task |
//! | `startRun`, `getRun` | Start a run untracked / fetch a run |
//! | `confirmRun`, `discardRun`, `stopRun`, `retryRun` | Run state transitions |
//! | `getStack`, `lockStack`, `unlockStack` | Stack operations |
//! | `onRunStateChange` | Filtered feed of run notifications |

pub mod block;
pub mod blocks;
pub mod correlator;
pub mod error;
pub mod inputs;
pub mod state;

pub use block::{Block, BlockContext, DEFAULT_OUTPUT, InputEvent, block_types, find_block};
pub use correlator::{CorrelationRecord, Correlator, NotifyOutcome, OperationKind};
pub use error::{BlockError, Result};
pub use state::{RunState, RunStateChange};
