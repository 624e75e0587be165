use std::fs;
use std::path::Path;

use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::B256;
use anyhow::anyhow;
use serde_json::Value;
use tracing::warn;

/// Parses a JSON ABI. Accepts either a bare ABI array or a build/deployment
/// artifact object carrying the ABI under an `abi` key.
pub fn parse_abi(json: &[u8]) -> anyhow::Result<JsonAbi> {
    let raw: Value = serde_json::from_slice(json)?;
    let abi_value = match raw {
        Value::Array(_) => raw,
        Value::Object(mut obj) => obj
            .remove("abi")
            .ok_or_else(|| anyhow!("JSON object has no 'abi' field"))?,
        _ => return Err(anyhow!("expected a JSON ABI array or an artifact object")),
    };

    // Preprocess the JSON to add missing anonymous fields
    let preprocessed = preprocess_abi_value(abi_value)?;
    let json_abi: JsonAbi = serde_json::from_value(preprocessed)?;
    Ok(json_abi)
}

pub fn load_abi(path: &Path) -> anyhow::Result<JsonAbi> {
    let bytes = fs::read(path)?;
    parse_abi(&bytes)
}

/// Some toolchains omit `anonymous` on event entries; treat those as regular events.
fn preprocess_abi_value(mut abi: Value) -> anyhow::Result<Value> {
    let Value::Array(entries) = &mut abi else {
        return Err(anyhow!("ABI must be a JSON array"));
    };

    for entry in entries.iter_mut() {
        if let Value::Object(obj) = entry {
            let is_event = obj.get("type").and_then(Value::as_str) == Some("event");
            if is_event && !obj.contains_key("anonymous") {
                if let Some(Value::String(name)) = obj.get("name") {
                    warn!("Event {} has no explicit anonymous field, treating as non-anonymous", name);
                }
                obj.insert("anonymous".to_string(), Value::Bool(false));
            }
        }
    }

    Ok(abi)
}

/// Looks up a non-anonymous event by name. For overloaded events the first declaration wins.
pub fn find_event<'a>(abi: &'a JsonAbi, event_name: &str) -> anyhow::Result<&'a Event> {
    let overloads = abi
        .events
        .get(event_name)
        .ok_or_else(|| anyhow!("event '{}' not found in ABI", event_name))?;

    overloads
        .iter()
        .find(|e| !e.anonymous)
        .ok_or_else(|| anyhow!("event '{}' is anonymous and has no signature topic", event_name))
}

/// Topic0 hash of the named event.
pub fn event_signature(abi: &JsonAbi, event_name: &str) -> anyhow::Result<B256> {
    Ok(find_event(abi, event_name)?.selector())
}
