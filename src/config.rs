use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::reconnect::ReconnectPolicy;
use crate::types::Network;

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkCfg {
    pub ws_rpc_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PgCfg {
    pub dsn: String,
    pub schema: Option<String>, // path to a schema file, the bundled init.sql is used if absent
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiCfg {
    pub enabled: Option<u8>,
    pub bind_address: Option<String>,
    pub signing_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReconnectCfg {
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NodeCfg {
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DeliveryCfg {
    pub http_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppCfg {
    pub name: Option<String>,
    pub networks: BTreeMap<String, NetworkCfg>,
    pub postgres: Option<PgCfg>,
    pub api: Option<ApiCfg>,
    pub reconnect: Option<ReconnectCfg>,
    pub node: Option<NodeCfg>,
    pub delivery: Option<DeliveryCfg>,
}

impl AppCfg {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let mut config: Self = serde_yaml::from_str(yaml)?;

        // Set default values if not specified
        if config.reconnect.is_none() {
            config.reconnect = Some(ReconnectCfg::default());
        }
        if config.node.is_none() {
            config.node = Some(NodeCfg::default());
        }
        if config.delivery.is_none() {
            config.delivery = Some(DeliveryCfg::default());
        }

        config.validate_networks()?;

        Ok(config)
    }

    pub fn get_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "events-notifier".to_string())
    }

    fn validate_networks(&self) -> anyhow::Result<()> {
        for name in self.networks.keys() {
            Network::from_str(name)
                .map_err(|e| anyhow::anyhow!("Configured network is not supported: {}", e))?;
        }
        Ok(())
    }

    /// Configured WS endpoints keyed by network.
    pub fn endpoints(&self) -> HashMap<Network, String> {
        self.networks
            .iter()
            .filter_map(|(name, cfg)| Network::from_str(name).ok().map(|n| (n, cfg.ws_rpc_url.clone())))
            .collect()
    }

    pub fn is_api_enabled(&self) -> bool {
        self.api
            .as_ref()
            .map(|api| api.enabled.unwrap_or(1) > 0)
            .unwrap_or(false)
    }

    pub fn api_bind_address(&self) -> String {
        self.api
            .as_ref()
            .and_then(|api| api.bind_address.clone())
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
    }

    /// Signing secret from config, or from `SLACK_SIGNING_SECRET`.
    pub fn signing_secret(&self) -> Option<String> {
        self.api
            .as_ref()
            .and_then(|api| api.signing_secret.clone())
            .or_else(|| std::env::var("SLACK_SIGNING_SECRET").ok())
            .filter(|s| !s.is_empty())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let defaults = ReconnectPolicy::default();
        let cfg = self.reconnect.clone().unwrap_or_default();
        ReconnectPolicy {
            max_retries: cfg.max_retries.unwrap_or(defaults.max_retries),
            initial_backoff: cfg.initial_backoff_ms.map(Duration::from_millis).unwrap_or(defaults.initial_backoff),
            max_backoff: cfg.max_backoff_ms.map(Duration::from_millis).unwrap_or(defaults.max_backoff),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        let secs = self.node.as_ref().and_then(|n| n.connect_timeout_secs).unwrap_or(30);
        Duration::from_secs(secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        let secs = self.delivery.as_ref().and_then(|d| d.http_timeout_secs).unwrap_or(10);
        Duration::from_secs(secs)
    }
}
