use std::collections::BTreeMap;

use alloy::rpc::types::Log as RpcLog;
use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::Event;
use alloy_primitives::{Bytes, Log, B256};
use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::types::{DecodedEvent, SubscriptionRecord};

struct ResolvedParam {
    name: String,
    ty: DynSolType,
    indexed: bool,
}

/// Decoder for one non-anonymous event. Parameter types are resolved once, up front.
pub struct EventDecoder {
    name: String,
    signature: B256,
    params: Vec<ResolvedParam>,
}

impl EventDecoder {
    pub fn new(event: &Event) -> Result<Self> {
        if event.anonymous {
            return Err(anyhow!("Event {} is anonymous and cannot be matched by signature", event.name));
        }

        let params = event
            .inputs
            .iter()
            .enumerate()
            .map(|(position, param)| {
                let ty = param
                    .resolve()
                    .map_err(|e| anyhow!("Failed to resolve parameter {} of type {}: {}", param.name, param.ty, e))?;
                let name = if param.name.is_empty() { format!("arg{}", position) } else { param.name.clone() };
                Ok(ResolvedParam { name, ty, indexed: param.indexed })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: event.name.clone(),
            signature: event.selector(),
            params,
        })
    }

    pub fn for_record(record: &SubscriptionRecord) -> Result<Self> {
        Self::new(record.event()?)
    }

    pub fn signature(&self) -> B256 {
        self.signature
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decodes topics and data of a raw log into named parameter values.
    pub fn decode_log(&self, log: &Log) -> Result<BTreeMap<String, DynSolValue>> {
        let topics = log.topics();
        match topics.first() {
            Some(topic0) if *topic0 == self.signature => {}
            Some(topic0) => {
                return Err(anyhow!("Log topic {:#x} does not match event {} ({:#x})", topic0, self.name, self.signature));
            }
            None => return Err(anyhow!("Log has no topics, expected signature of event {}", self.name)),
        }

        let indexed_count = self.params.iter().filter(|p| p.indexed).count();
        if topics.len() != indexed_count + 1 {
            return Err(anyhow!(
                "Event {} expects {} indexed parameters, log carries {} topics",
                self.name,
                indexed_count,
                topics.len() - 1
            ));
        }

        let mut parameters = BTreeMap::new();

        // Decode indexed parameters from topics, skipping the event signature
        for (param, topic) in self.params.iter().filter(|p| p.indexed).zip(topics.iter().skip(1)) {
            let value = decode_indexed_param(param, *topic)?;
            parameters.insert(param.name.clone(), value);
        }

        // Decode non-indexed parameters from data
        let body_params: Vec<&ResolvedParam> = self.params.iter().filter(|p| !p.indexed).collect();
        let body_values = decode_data_params(&body_params, &log.data.data)?;
        for (param, value) in body_params.into_iter().zip(body_values) {
            parameters.insert(param.name.clone(), value);
        }

        Ok(parameters)
    }

    /// Decodes an RPC log into a [`DecodedEvent`], carrying over its provenance fields.
    pub fn decode_rpc_log(&self, log: &RpcLog) -> Result<DecodedEvent> {
        let parameters = self.decode_log(&log.inner)?;
        Ok(DecodedEvent {
            block_number: log.block_number,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
            contract_address: log.address(),
            event_name: self.name.clone(),
            parameters,
        })
    }
}

/// Indexed dynamic values are stored as the keccak256 hash of their encoding,
/// so only the 32-byte topic can be returned for them.
fn decode_indexed_param(param: &ResolvedParam, topic: B256) -> Result<DynSolValue> {
    match &param.ty {
        DynSolType::String
        | DynSolType::Bytes
        | DynSolType::Array(_)
        | DynSolType::FixedArray(..)
        | DynSolType::Tuple(_) => Ok(DynSolValue::FixedBytes(topic, 32)),
        ty => ty
            .abi_decode(topic.as_slice())
            .map_err(|e| anyhow!("Failed to decode indexed parameter {}: {}", param.name, e)),
    }
}

fn decode_data_params(params: &[&ResolvedParam], data: &Bytes) -> Result<Vec<DynSolValue>> {
    if params.is_empty() {
        return Ok(Vec::new());
    }

    let tuple_type = DynSolType::Tuple(params.iter().map(|p| p.ty.clone()).collect());

    let decoded = tuple_type
        .abi_decode_params(data)
        .map_err(|e| anyhow!("Failed to decode log data: {}", e))?;

    match decoded {
        DynSolValue::Tuple(values) => Ok(values),
        _ => Err(anyhow!("Expected tuple from log data decoding")),
    }
}

/// Convert DynSolValue to JSON Value for serialization
pub fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => Value::String(format!("0x{}", hex::encode(&word[..*size]))),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::Address(addr) => Value::String(addr.to_checksum(None)),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(arr) | DynSolValue::FixedArray(arr) | DynSolValue::Tuple(arr) => {
            Value::Array(arr.iter().map(value_to_json).collect())
        }
        _ => Value::String(format!("{:?}", value)),
    }
}

/// Format DynSolValue for human-readable display
pub fn format_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::FixedBytes(word, size) => format!("0x{}", hex::encode(&word[..*size])),
        DynSolValue::Bytes(bytes) => format!("0x{}", hex::encode(bytes)),
        DynSolValue::Address(addr) => addr.to_checksum(None),
        DynSolValue::String(s) => format!("\"{}\"", s),
        DynSolValue::Array(arr) | DynSolValue::FixedArray(arr) => {
            let formatted: Vec<String> = arr.iter().map(format_value).collect();
            format!("[{}]", formatted.join(", "))
        }
        DynSolValue::Tuple(tuple) => {
            let formatted: Vec<String> = tuple.iter().map(format_value).collect();
            format!("({})", formatted.join(", "))
        }
        _ => format!("{:?}", value),
    }
}
