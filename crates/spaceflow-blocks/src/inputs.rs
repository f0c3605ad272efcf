// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Input declarations and their mapping onto GraphQL variables.

use serde_json::{Map, Value};

use crate::error::{BlockError, Result};

/// One declared block input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputField {
    /// Key the caller supplies the value under.
    pub key: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Whether a value must be supplied.
    pub required: bool,
    /// GraphQL variable the value is passed as.
    pub graphql_key: &'static str,
}

impl InputField {
    /// A required input.
    pub const fn required(key: &'static str, name: &'static str, graphql_key: &'static str) -> Self {
        Self {
            key,
            name,
            required: true,
            graphql_key,
        }
    }

    /// An optional input.
    pub const fn optional(key: &'static str, name: &'static str, graphql_key: &'static str) -> Self {
        Self {
            key,
            name,
            required: false,
            graphql_key,
        }
    }
}

/// Rename supplied inputs to their GraphQL variable names.
///
/// Undeclared keys are dropped. Absent optional inputs are omitted rather
/// than sent as `null`. A required input that is absent or `null` fails the
/// whole mapping.
pub fn map_inputs(fields: &[InputField], inputs: &Value) -> Result<Value> {
    let empty = Map::new();
    let supplied = match inputs {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => {
            return Err(BlockError::Validation(
                "Block inputs must be a JSON object".to_string(),
            ));
        }
    };

    let missing: Vec<String> = fields
        .iter()
        .filter(|f| f.required && supplied.get(f.key).is_none_or(Value::is_null))
        .map(|f| format!("{} ({})", f.name, f.key))
        .collect();

    if !missing.is_empty() {
        return Err(BlockError::Validation(format!(
            "Missing required inputs: {}",
            missing.join(", ")
        )));
    }

    let variables = fields
        .iter()
        .filter_map(|f| {
            supplied
                .get(f.key)
                .map(|v| (f.graphql_key.to_string(), v.clone()))
        })
        .collect::<Map<_, _>>();

    Ok(Value::Object(variables))
}

/// String variable from mapped inputs, if present.
pub fn variable_str<'a>(variables: &'a Value, key: &str) -> Option<&'a str> {
    variables.get(key).and_then(Value::as_str)
}
