//! Named method calls mapped onto [`EntryStore`] operations.
//!
//! Mirrors the host channel surface: `write`, `read`, `delete`, `readAll`,
//! `writeMap` and `deleteAll`, each carrying a JSON object of arguments.

use sealstore_core::storage::{BackingMap, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::entry_store::EntryStore;

/// One incoming call: a method name plus its argument bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Arguments missing, not an object, or missing a required field.
    #[error("No arguments for {method}: {reason}")]
    MalformedArguments { method: String, reason: String },
    #[error("method not implemented: {method}")]
    NotImplemented { method: String },
    /// The store rejected the operation.
    #[error("Exception encountered in {method}: {source}")]
    Operation {
        method: String,
        #[source]
        source: StorageError,
    },
}

/// Run `call` against `store` and return its JSON result.
///
/// `read` yields a string or `null`, `readAll` an array of those, and every
/// mutating method `null`.
pub fn dispatch<M: BackingMap>(
    store: &EntryStore<M>,
    call: &MethodCall,
) -> Result<Value, DispatchError> {
    let method = call.method.as_str();
    let Some(args) = call.arguments.as_object() else {
        return Err(malformed(method, "arguments must be an object"));
    };
    debug!(method, "dispatching method call");

    let result = match method {
        "write" => {
            let key = required_str(method, args, "key")?;
            let value = required_str(method, args, "value")?;
            store.put(key, value).map(|()| Value::Null)
        }
        "read" => {
            let key = required_str(method, args, "key")?;
            store.get(key).map(optional_string)
        }
        "delete" => {
            let key = required_str(method, args, "key")?;
            store.delete(key).map(|()| Value::Null)
        }
        "readAll" => {
            let keys = required_keys(method, args)?;
            store
                .get_all(&keys)
                .map(|values| Value::Array(values.into_iter().map(optional_string).collect()))
        }
        "writeMap" => {
            let entries = required_map(method, args)?;
            store.put_all(entries).map(|()| Value::Null)
        }
        "deleteAll" => {
            let keys = required_keys(method, args)?;
            store.delete_all(&keys).map(|()| Value::Null)
        }
        _ => {
            return Err(DispatchError::NotImplemented {
                method: method.to_string(),
            })
        }
    };

    result.map_err(|source| {
        warn!(method, error = %source, "method call failed");
        DispatchError::Operation {
            method: method.to_string(),
            source,
        }
    })
}

fn optional_string(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::String)
}

fn malformed(method: &str, reason: impl Into<String>) -> DispatchError {
    DispatchError::MalformedArguments {
        method: method.to_string(),
        reason: reason.into(),
    }
}

fn required_str<'a>(
    method: &str,
    args: &'a Map<String, Value>,
    field: &str,
) -> Result<&'a str, DispatchError> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(method, format!("`{field}` must be a string")))
}

fn required_keys<'a>(
    method: &str,
    args: &'a Map<String, Value>,
) -> Result<Vec<&'a str>, DispatchError> {
    args.get("keys")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(method, "`keys` must be an array"))?
        .iter()
        .map(|key| {
            key.as_str()
                .ok_or_else(|| malformed(method, "`keys` must only contain strings"))
        })
        .collect()
}

fn required_map<'a>(
    method: &str,
    args: &'a Map<String, Value>,
) -> Result<Vec<(&'a str, Option<&'a str>)>, DispatchError> {
    args.get("map")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed(method, "`map` must be an object"))?
        .iter()
        .map(|(key, value)| match value {
            Value::Null => Ok((key.as_str(), None)),
            Value::String(value) => Ok((key.as_str(), Some(value.as_str()))),
            _ => Err(malformed(method, format!("value for `{key}` must be a string or null"))),
        })
        .collect()
}
