use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use alloy_dyn_abi::DynSolValue;
use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Networks a subscription may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Ropsten,
    Rinkeby,
    Goerli,
    Kovan,
    Sepolia,
    Holesky,
}

impl Network {
    pub const ALL: [Network; 7] = [
        Network::Mainnet,
        Network::Ropsten,
        Network::Rinkeby,
        Network::Goerli,
        Network::Kovan,
        Network::Sepolia,
        Network::Holesky,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Ropsten => "ropsten",
            Network::Rinkeby => "rinkeby",
            Network::Goerli => "goerli",
            Network::Kovan => "kovan",
            Network::Sepolia => "sepolia",
            Network::Holesky => "holesky",
        }
    }

    pub fn allowed() -> Vec<&'static str> {
        Self::ALL.iter().map(|n| n.as_str()).collect()
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|n| n.as_str() == lowered)
            .ok_or_else(|| ValidationError::invalid_value("network", s, &Self::allowed()))
    }
}

/// Kind of an inbound subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Subscribe,
    Unsubscribe,
}

impl RequestType {
    pub const ALL: [RequestType; 2] = [RequestType::Subscribe, RequestType::Unsubscribe];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Subscribe => "subscribe",
            RequestType::Unsubscribe => "unsubscribe",
        }
    }

    pub fn allowed() -> Vec<&'static str> {
        Self::ALL.iter().map(|t| t.as_str()).collect()
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| ValidationError::invalid_value("type", s, &Self::allowed()))
    }
}

/// Raw, unvalidated request as it arrives from the chat command intake.
/// Empty strings stand for fields that were not supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub request_type: String,
    pub network: String,
    pub contract_address: String,
    pub event_name: String,
    pub abi_url: String,
    pub webhook_target: String,
    pub channel_context: Option<String>,
}

/// Persisted unit of work: one contract event on one network, delivered to one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub contract_address: Address,
    pub event_name: String,
    pub event_signature: B256,
    pub network: Network,
    pub contract_interface: JsonAbi,
    pub abi_url: String,
    pub webhook_target: String,
    pub created_at: DateTime<Utc>,
    pub channel_context: Option<String>,
}

impl SubscriptionRecord {
    /// Repository key of the record.
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey {
            contract_address: self.contract_address,
            event_name: self.event_name.clone(),
        }
    }

    /// The ABI definition of the subscribed event.
    pub fn event(&self) -> anyhow::Result<&Event> {
        crate::abi::find_event(&self.contract_interface, &self.event_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub contract_address: Address,
    pub event_name: String,
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.contract_address, self.event_name)
    }
}

/// A matching log decoded with the subscription's ABI. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
    pub contract_address: Address,
    pub event_name: String,
    pub parameters: BTreeMap<String, DynSolValue>,
}

impl DecodedEvent {
    pub fn to_json(&self) -> Value {
        let parameters = self
            .parameters
            .iter()
            .map(|(name, value)| (name.clone(), crate::event_decoder::value_to_json(value)))
            .collect::<serde_json::Map<String, Value>>();

        serde_json::json!({
            "block_number": self.block_number,
            "transaction_hash": self.transaction_hash.map(|h| format!("{:#x}", h)),
            "log_index": self.log_index,
            "contract_address": self.contract_address.to_checksum(None),
            "event_name": self.event_name,
            "parameters": Value::Object(parameters),
        })
    }
}
