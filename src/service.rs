use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::abi::find_event;
use crate::contract_resolver::ContractInterfaceResolver;
use crate::engine::SubscriptionEngine;
use crate::error::SubscribeError;
use crate::repository::SubscriptionRepository;
use crate::types::{RequestType, SubscriptionKey, SubscriptionRecord, SubscriptionRequest};
use crate::validation::{validate, ValidatedRequest};

#[derive(Debug, Clone)]
pub enum SubscriptionOutcome {
    Subscribed(SubscriptionRecord),
    Unsubscribed { key: SubscriptionKey, existed: bool },
}

/// Turns validated requests into stored records and keeps a running engine in step.
pub struct SubscriptionService {
    repository: Arc<dyn SubscriptionRepository>,
    abi_resolver: Arc<dyn ContractInterfaceResolver>,
    engine: Option<Arc<SubscriptionEngine>>,
}

impl SubscriptionService {
    pub fn new(
        repository: Arc<dyn SubscriptionRepository>,
        abi_resolver: Arc<dyn ContractInterfaceResolver>,
        engine: Option<Arc<SubscriptionEngine>>,
    ) -> Self {
        Self {
            repository,
            abi_resolver,
            engine,
        }
    }

    pub async fn handle(&self, request: &SubscriptionRequest) -> Result<SubscriptionOutcome, SubscribeError> {
        let validated = validate(request)?;
        match validated.request_type {
            RequestType::Subscribe => self.subscribe(validated).await.map(SubscriptionOutcome::Subscribed),
            RequestType::Unsubscribe => self.unsubscribe(validated).await,
        }
    }

    async fn subscribe(&self, request: ValidatedRequest) -> Result<SubscriptionRecord, SubscribeError> {
        let contract_interface = self
            .abi_resolver
            .resolve(&request.abi_url)
            .await
            .map_err(|cause| SubscribeError::AbiResolution {
                url: request.abi_url.clone(),
                cause,
            })?;

        let event_signature = find_event(&contract_interface, &request.event_name)
            .map_err(|_| SubscribeError::UnknownEvent(request.event_name.clone()))?
            .selector();

        let record = SubscriptionRecord {
            contract_address: request.contract_address,
            event_name: request.event_name,
            event_signature,
            network: request.network,
            contract_interface,
            abi_url: request.abi_url,
            webhook_target: request.webhook_target,
            created_at: Utc::now(),
            channel_context: request.channel_context,
        };

        self.repository.put(&record).await.map_err(SubscribeError::Repository)?;
        info!("Subscription {} on {} registered", record.key(), record.network);

        if let Some(engine) = &self.engine {
            // The record is stored either way; a restarted engine picks it up.
            if let Err(e) = engine.attach(record.clone()).await {
                error!("Failed to start worker for {}: {:#}", record.key(), e);
            }
        }

        Ok(record)
    }

    async fn unsubscribe(&self, request: ValidatedRequest) -> Result<SubscriptionOutcome, SubscribeError> {
        let existed = self
            .repository
            .delete(request.contract_address, &request.event_name)
            .await
            .map_err(SubscribeError::Repository)?;

        if let Some(engine) = &self.engine {
            engine.detach(request.contract_address, &request.event_name).await;
        }

        let key = SubscriptionKey {
            contract_address: request.contract_address,
            event_name: request.event_name,
        };
        info!("Subscription {} removed (existed: {})", key, existed);
        Ok(SubscriptionOutcome::Unsubscribed { key, existed })
    }
}
