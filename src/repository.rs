use std::collections::BTreeMap;
use std::str::FromStr;

use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};

use crate::types::{Network, SubscriptionKey, SubscriptionRecord};

pub const DEFAULT_SCHEMA: &str = include_str!("../init.sql");

/// Storage of subscription records. Implementations are shared across workers.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Every currently active record, in one batch.
    async fn list_active(&self) -> anyhow::Result<Vec<SubscriptionRecord>>;

    /// Stores a record, replacing any record with the same address and event.
    async fn put(&self, record: &SubscriptionRecord) -> anyhow::Result<()>;

    /// Removes the record for `address` and `event_name`. Returns whether one existed.
    async fn delete(&self, address: Address, event_name: &str) -> anyhow::Result<bool>;
}

pub struct PgSubscriptionRepository {
    client: Client,
}

impl PgSubscriptionRepository {
    pub async fn connect(dsn: &str, schema: &str) -> anyhow::Result<Self> {
        let client = connect_pg(dsn, schema).await?;
        Ok(Self { client })
    }
}

pub async fn connect_pg(dsn: &str, schema: &str) -> anyhow::Result<Client> {
    let (client, connection) = tokio_postgres::connect(dsn, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("Postgres connection error: {:?}", e);
        }
    });

    // Create schema if not exists
    client.batch_execute(schema).await?;

    info!("PostgreSQL ready");

    Ok(client)
}

fn record_from_row(row: &Row) -> anyhow::Result<SubscriptionRecord> {
    let contract_address: String = row.try_get("contract_address")?;
    let event_signature: String = row.try_get("event_signature")?;
    let network: String = row.try_get("network")?;
    let contract_interface: serde_json::Value = row.try_get("contract_interface")?;

    Ok(SubscriptionRecord {
        contract_address: Address::from_str(&contract_address)?,
        event_name: row.try_get("event_name")?,
        event_signature: B256::from_str(&event_signature)?,
        network: Network::from_str(&network)?,
        contract_interface: serde_json::from_value::<JsonAbi>(contract_interface)?,
        abi_url: row.try_get("abi_url")?,
        webhook_target: row.try_get("webhook_target")?,
        created_at: row.try_get::<_, DateTime<Utc>>("created_at")?,
        channel_context: row.try_get("channel_context")?,
    })
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn list_active(&self) -> anyhow::Result<Vec<SubscriptionRecord>> {
        let rows = self
            .client
            .query(
                r#"
                SELECT contract_address, event_name, event_signature, network, webhook_target,
                       channel_context, abi_url, contract_interface, created_at
                FROM event_subscriptions
                ORDER BY created_at
                "#,
                &[],
            )
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            match record_from_row(row) {
                Ok(record) => records.push(record),
                Err(e) => error!("Skipping unreadable subscription row: {:?}", e),
            }
        }

        info!("Loaded {} active subscriptions", records.len());
        Ok(records)
    }

    async fn put(&self, record: &SubscriptionRecord) -> anyhow::Result<()> {
        let query = r#"
            INSERT INTO event_subscriptions (
                contract_address,
                event_name,
                event_signature,
                network,
                webhook_target,
                channel_context,
                abi_url,
                contract_interface,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8::jsonb, $9)
            ON CONFLICT (contract_address, event_name) DO UPDATE SET
                event_signature = EXCLUDED.event_signature,
                network = EXCLUDED.network,
                webhook_target = EXCLUDED.webhook_target,
                channel_context = EXCLUDED.channel_context,
                abi_url = EXCLUDED.abi_url,
                contract_interface = EXCLUDED.contract_interface,
                created_at = EXCLUDED.created_at
        "#;

        let contract_address = format!("{:#x}", record.contract_address);
        let event_signature = format!("{:#x}", record.event_signature);
        let network = record.network.to_string();
        let contract_interface = serde_json::to_value(&record.contract_interface)?;

        self.client
            .execute(
                query,
                &[
                    &contract_address,
                    &record.event_name,
                    &event_signature,
                    &network,
                    &record.webhook_target,
                    &record.channel_context,
                    &record.abi_url,
                    &contract_interface,
                    &record.created_at,
                ],
            )
            .await?;

        info!("Subscription {} stored", record.key());
        Ok(())
    }

    async fn delete(&self, address: Address, event_name: &str) -> anyhow::Result<bool> {
        let contract_address = format!("{:#x}", address);
        let deleted = self
            .client
            .execute(
                "DELETE FROM event_subscriptions WHERE contract_address = $1 AND event_name = $2",
                &[&contract_address, &event_name],
            )
            .await?;
        Ok(deleted > 0)
    }
}

/// Process-local repository, used when no database is configured.
#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    records: RwLock<BTreeMap<SubscriptionKey, SubscriptionRecord>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = SubscriptionRecord>) -> Self {
        let records = records.into_iter().map(|r| (r.key(), r)).collect();
        Self { records: RwLock::new(records) }
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn list_active(&self) -> anyhow::Result<Vec<SubscriptionRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn put(&self, record: &SubscriptionRecord) -> anyhow::Result<()> {
        self.records.write().await.insert(record.key(), record.clone());
        Ok(())
    }

    async fn delete(&self, address: Address, event_name: &str) -> anyhow::Result<bool> {
        let key = SubscriptionKey {
            contract_address: address,
            event_name: event_name.to_string(),
        };
        Ok(self.records.write().await.remove(&key).is_some())
    }
}
