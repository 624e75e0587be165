#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use alloy::rpc::types::{Filter, Log as RpcLog};
use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, LogData, B256, U256};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;

use events_notifier::abi::{event_signature, parse_abi};
use events_notifier::contract_resolver::ContractInterfaceResolver;
use events_notifier::endpoint::EndpointResolver;
use events_notifier::node::{LogStream, NodeConnection, NodeConnector};
use events_notifier::repository::SubscriptionRepository;
use events_notifier::sender::EventSender;
use events_notifier::types::{DecodedEvent, Network, SubscriptionRecord};

pub const ERC20_ABI: &str = r#"{"contractName":"Token","abi":[
    {"type":"event","name":"Transfer","inputs":[
        {"name":"from","type":"address","indexed":true},
        {"name":"to","type":"address","indexed":true},
        {"name":"amount","type":"uint256","indexed":false}]},
    {"type":"event","name":"Approval","anonymous":false,"inputs":[
        {"name":"owner","type":"address","indexed":true},
        {"name":"spender","type":"address","indexed":true},
        {"name":"value","type":"uint256","indexed":false}]}
]}"#;

pub fn erc20_abi() -> JsonAbi {
    parse_abi(ERC20_ABI.as_bytes()).unwrap()
}

pub fn record(contract: Address, event_name: &str, network: Network) -> SubscriptionRecord {
    let abi = erc20_abi();
    SubscriptionRecord {
        contract_address: contract,
        event_name: event_name.to_string(),
        event_signature: event_signature(&abi, event_name).unwrap(),
        network,
        contract_interface: abi,
        abi_url: "https://example.org/token.json".to_string(),
        webhook_target: "https://hooks.example.org/services/T1".to_string(),
        created_at: Utc::now(),
        channel_context: Some("C024BE91L".to_string()),
    }
}

pub fn transfer_log(contract: Address, from: Address, to: Address, amount: u64) -> RpcLog {
    let topics = vec![
        event_signature(&erc20_abi(), "Transfer").unwrap(),
        from.into_word(),
        to.into_word(),
    ];
    RpcLog {
        inner: alloy_primitives::Log {
            address: contract,
            data: LogData::new_unchecked(topics, U256::from(amount).to_be_bytes::<32>().to_vec().into()),
        },
        block_number: Some(18_000_000),
        transaction_hash: Some(B256::repeat_byte(0xab)),
        log_index: Some(3),
        ..Default::default()
    }
}

/// Each connect pops the next batch of logs; the stream stays open after it.
/// Connects fail once the batches run out.
#[derive(Default)]
pub struct FakeConnector {
    sessions: Mutex<VecDeque<Vec<RpcLog>>>,
    pub connects: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new(sessions: impl IntoIterator<Item = Vec<RpcLog>>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(sessions.into_iter().collect()),
            connects: Mutex::default(),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }
}

struct FakeConnection {
    logs: Mutex<Option<Vec<RpcLog>>>,
}

#[async_trait]
impl NodeConnector for FakeConnector {
    async fn connect(&self, endpoint: &str) -> anyhow::Result<Box<dyn NodeConnection>> {
        self.connects.lock().unwrap().push(endpoint.to_string());
        let logs = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("connection refused"))?;
        Ok(Box::new(FakeConnection {
            logs: Mutex::new(Some(logs)),
        }))
    }
}

#[async_trait]
impl NodeConnection for FakeConnection {
    async fn subscribe_logs(&self, _filter: &Filter) -> anyhow::Result<LogStream> {
        let logs = self.logs.lock().unwrap().take().ok_or_else(|| anyhow!("already subscribed"))?;
        Ok(stream::iter(logs.into_iter().map(Ok)).chain(stream::pending()).boxed())
    }
}

/// Connects at once, but the log subscription request never completes.
#[derive(Default)]
pub struct StalledConnector {
    pub connects: Mutex<usize>,
}

struct StalledConnection;

#[async_trait]
impl NodeConnector for StalledConnector {
    async fn connect(&self, _endpoint: &str) -> anyhow::Result<Box<dyn NodeConnection>> {
        *self.connects.lock().unwrap() += 1;
        Ok(Box::new(StalledConnection))
    }
}

#[async_trait]
impl NodeConnection for StalledConnection {
    async fn subscribe_logs(&self, _filter: &Filter) -> anyhow::Result<LogStream> {
        std::future::pending().await
    }
}

/// Forwards every delivered event to a channel.
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<(DecodedEvent, String)>,
}

impl ChannelSender {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(DecodedEvent, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl EventSender for ChannelSender {
    async fn send(&self, event: &DecodedEvent, record: &SubscriptionRecord) -> anyhow::Result<()> {
        self.tx
            .send((event.clone(), record.webhook_target.clone()))
            .map_err(|_| anyhow!("receiver dropped"))
    }
}

pub struct StaticEndpoints {
    pub failing: HashSet<Network>,
    pub calls: Mutex<Vec<Network>>,
}

impl StaticEndpoints {
    pub fn new(failing: impl IntoIterator<Item = Network>) -> Arc<Self> {
        Arc::new(Self {
            failing: failing.into_iter().collect(),
            calls: Mutex::default(),
        })
    }
}

#[async_trait]
impl EndpointResolver for StaticEndpoints {
    async fn resolve(&self, network: Network) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(network);
        if self.failing.contains(&network) {
            return Err(anyhow!("no endpoint configured for {}", network));
        }
        Ok(format!("wss://{}.example.org/ws", network))
    }
}

pub struct FailingRepository;

#[async_trait]
impl SubscriptionRepository for FailingRepository {
    async fn list_active(&self) -> anyhow::Result<Vec<SubscriptionRecord>> {
        Err(anyhow!("connection to server was lost"))
    }

    async fn put(&self, _record: &SubscriptionRecord) -> anyhow::Result<()> {
        Err(anyhow!("connection to server was lost"))
    }

    async fn delete(&self, _address: Address, _event_name: &str) -> anyhow::Result<bool> {
        Err(anyhow!("connection to server was lost"))
    }
}

/// Serves the ERC-20 ABI for every URL and remembers what was asked for.
#[derive(Default)]
pub struct StaticAbiResolver {
    pub requested: Mutex<Vec<String>>,
}

#[async_trait]
impl ContractInterfaceResolver for StaticAbiResolver {
    async fn resolve(&self, url: &str) -> anyhow::Result<JsonAbi> {
        self.requested.lock().unwrap().push(url.to_string());
        if url.ends_with("missing.json") {
            return Err(anyhow!("HTTP status client error (404 Not Found) for url ({})", url));
        }
        Ok(erc20_abi())
    }
}
