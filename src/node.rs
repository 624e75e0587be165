use std::time::Duration;

use alloy::providers::fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller};
use alloy::providers::{Identity, Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::pubsub::SubscriptionItem;
use alloy::rpc::types::{Filter, Log as RpcLog};
use anyhow::anyhow;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

type RPCProvider = FillProvider<JoinFill<Identity, JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>>, RootProvider>;

/// Error surfaced by an open log subscription. The subscription stays usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("subscription lagged behind, {0} notifications were dropped")]
    Lagged(u64),

    #[error("subscription error: {0}")]
    Other(String),
}

/// Live log subscription. Ends when the underlying transport closes.
pub type LogStream = BoxStream<'static, Result<RpcLog, StreamError>>;

/// Opens connections to blockchain nodes.
#[async_trait]
pub trait NodeConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> anyhow::Result<Box<dyn NodeConnection>>;
}

/// An established node connection able to open filtered log subscriptions.
#[async_trait]
pub trait NodeConnection: Send + Sync {
    async fn subscribe_logs(&self, filter: &Filter) -> anyhow::Result<LogStream>;
}

/// WebSocket JSON-RPC connector backed by an alloy pubsub provider.
#[derive(Debug, Clone)]
pub struct WsNodeConnector {
    connect_timeout: Duration,
}

impl WsNodeConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl NodeConnector for WsNodeConnector {
    async fn connect(&self, endpoint: &str) -> anyhow::Result<Box<dyn NodeConnection>> {
        let ws = WsConnect::new(endpoint);
        let provider = tokio::time::timeout(self.connect_timeout, ProviderBuilder::new().connect_ws(ws))
            .await
            .map_err(|_| anyhow!("Connecting to WS RPC endpoint timed out after {:?}", self.connect_timeout))??;

        info!("Connected to WS RPC endpoint");
        Ok(Box::new(WsNodeConnection { provider }))
    }
}

struct WsNodeConnection {
    provider: RPCProvider,
}

#[async_trait]
impl NodeConnection for WsNodeConnection {
    async fn subscribe_logs(&self, filter: &Filter) -> anyhow::Result<LogStream> {
        let sub = self.provider.subscribe_logs(filter).await?;
        debug!("Opened logs subscription");

        // The provider travels with the stream so the WS backend outlives the subscription.
        let state = (self.provider.clone(), sub);
        let logs = stream::unfold(state, |(provider, mut sub)| async move {
            match sub.recv_any().await {
                Ok(SubscriptionItem::Item(log)) => Some((Ok(log), (provider, sub))),
                Ok(SubscriptionItem::Other(raw)) => {
                    let err = StreamError::Other(format!("notification is not a log: {}", raw.get()));
                    Some((Err(err), (provider, sub)))
                }
                Err(RecvError::Lagged(skipped)) => Some((Err(StreamError::Lagged(skipped)), (provider, sub))),
                Err(RecvError::Closed) => None,
            }
        });

        Ok(logs.boxed())
    }
}
