use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::debug;

use crate::types::Network;

pub const ENDPOINT_ENV_PREFIX: &str = "NOTIFIER_WS_URL_";

/// Maps a network to the WS RPC endpoint of a node serving it.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self, network: Network) -> anyhow::Result<String>;
}

/// Resolves endpoints from configuration, with a per-network environment override
/// (`NOTIFIER_WS_URL_MAINNET`, `NOTIFIER_WS_URL_SEPOLIA`, ...).
#[derive(Debug, Clone, Default)]
pub struct ConfigEndpointResolver {
    endpoints: HashMap<Network, String>,
}

impl ConfigEndpointResolver {
    pub fn new(endpoints: HashMap<Network, String>) -> Self {
        Self { endpoints }
    }

    pub fn env_key(network: Network) -> String {
        format!("{}{}", ENDPOINT_ENV_PREFIX, network.as_str().to_uppercase())
    }
}

#[async_trait]
impl EndpointResolver for ConfigEndpointResolver {
    async fn resolve(&self, network: Network) -> anyhow::Result<String> {
        if let Ok(url) = std::env::var(Self::env_key(network)) {
            if !url.trim().is_empty() {
                debug!("Endpoint for {} taken from environment", network);
                return Ok(url.trim().to_string());
            }
        }

        self.endpoints
            .get(&network)
            .filter(|url| !url.trim().is_empty())
            .cloned()
            .ok_or_else(|| anyhow!("No WS endpoint configured for network {}", network))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_configured_network() {
        let resolver = ConfigEndpointResolver::new(HashMap::from([(
            Network::Kovan,
            "wss://kovan.example.org/ws".to_string(),
        )]));
        assert_eq!(resolver.resolve(Network::Kovan).await.unwrap(), "wss://kovan.example.org/ws");
    }

    #[tokio::test]
    async fn test_unconfigured_network_fails() {
        let resolver = ConfigEndpointResolver::new(HashMap::from([(Network::Ropsten, "  ".to_string())]));
        let err = resolver.resolve(Network::Ropsten).await.unwrap_err();
        assert!(err.to_string().contains("ropsten"));
    }

    #[test]
    fn test_env_key() {
        assert_eq!(ConfigEndpointResolver::env_key(Network::Goerli), "NOTIFIER_WS_URL_GOERLI");
    }
}
