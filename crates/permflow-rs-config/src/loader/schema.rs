//! Schema validation helpers for permflow JSON5 configuration.

use crate::ConfigError;
use serde_json::{Map, Value};

/// Validate a single config layer against the schema.
pub(super) fn validate_layer_schema(value: &Value, layer: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, "")?;
    ensure_allowed_keys(map, &["$schema", "coordinator", "permissions"], layer, "")?;

    if let Some(value) = map.get("$schema") {
        expect_string(value, layer, "$schema")?;
    }
    if let Some(value) = map.get("coordinator") {
        validate_coordinator(value, layer, "coordinator")?;
    }
    if let Some(value) = map.get("permissions") {
        validate_permissions(value, layer, "permissions")?;
    }
    Ok(())
}

/// Validate the "coordinator" block.
fn validate_coordinator(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(
        map,
        &[
            "guidance_threshold_ms",
            "reentry",
            "await_timeout_ms",
            "event_buffer",
        ],
        layer,
        path,
    )?;

    if let Some(value) = map.get("guidance_threshold_ms") {
        expect_u64(value, layer, &join_path(path, "guidance_threshold_ms"))?;
    }
    if let Some(value) = map.get("reentry") {
        validate_reentry(value, layer, &join_path(path, "reentry"))?;
    }
    if let Some(value) = map.get("await_timeout_ms")
        && !value.is_null()
    {
        expect_u64(value, layer, &join_path(path, "await_timeout_ms"))?;
    }
    if let Some(value) = map.get("event_buffer") {
        expect_u64(value, layer, &join_path(path, "event_buffer"))?;
    }
    Ok(())
}

/// Validate re-entry policy values.
fn validate_reentry(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let Some(policy) = value.as_str() else {
        return Err(invalid_field(layer, path, "expected string"));
    };
    if matches!(policy, "reject" | "cancel_previous") {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "invalid reentry policy"))
    }
}

/// Validate the "permissions" block.
fn validate_permissions(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["manifest"], layer, path)?;

    if let Some(value) = map.get("manifest") {
        validate_string_array(value, layer, &join_path(path, "manifest"))?;
    }
    Ok(())
}

/// Expect a JSON object or return a typed error.
fn expect_object<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(invalid_field(layer, path, "expected object")),
    }
}

/// Expect a JSON string or return a typed error.
fn expect_string(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.as_str().is_some() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected string"))
    }
}

/// Expect a non-negative JSON integer or return a typed error.
fn expect_u64(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.as_u64().is_some() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected non-negative integer"))
    }
}

/// Validate that a value is an array of strings.
fn validate_string_array(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let arr = match value {
        Value::Array(arr) => arr,
        _ => return Err(invalid_field(layer, path, "expected array")),
    };
    for (idx, entry) in arr.iter().enumerate() {
        if entry.as_str().is_none() {
            return Err(invalid_field(
                layer,
                &format!("{path}[{idx}]"),
                "expected string",
            ));
        }
    }
    Ok(())
}

/// Ensure an object contains only allowed keys.
fn ensure_allowed_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(invalid_field(layer, &join_path(path, key), "unknown key"));
        }
    }
    Ok(())
}

/// Join nested paths for better error messages.
fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Build a structured invalid-field error.
fn invalid_field(layer: &str, path: &str, message: &str) -> ConfigError {
    let normalized_path = if path.is_empty() { "root" } else { path };
    ConfigError::InvalidField {
        path: format!("{layer}:{normalized_path}"),
        message: message.to_string(),
    }
}
