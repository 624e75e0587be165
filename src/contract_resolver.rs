use std::path::Path;
use std::time::Duration;

use alloy_json_abi::JsonAbi;
use anyhow::anyhow;
use async_trait::async_trait;
use tracing::debug;

use crate::abi::{load_abi, parse_abi};

/// Resolves a contract interface description (JSON ABI) from a URL.
#[async_trait]
pub trait ContractInterfaceResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> anyhow::Result<JsonAbi>;
}

/// Fetches ABIs over HTTP(S); `file://` URLs are read from the local filesystem.
#[derive(Debug, Clone)]
pub struct HttpContractInterfaceResolver {
    client: reqwest::Client,
}

impl HttpContractInterfaceResolver {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContractInterfaceResolver for HttpContractInterfaceResolver {
    async fn resolve(&self, url: &str) -> anyhow::Result<JsonAbi> {
        if let Some(path) = url.strip_prefix("file://") {
            return load_abi(Path::new(path));
        }

        let parsed = reqwest::Url::parse(url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("Unsupported ABI URL scheme '{}'", parsed.scheme()));
        }

        debug!("Fetching ABI from {}", parsed);
        let body = self
            .client
            .get(parsed)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        parse_abi(&body)
    }
}
