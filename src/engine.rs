use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use alloy_primitives::Address;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::endpoint::EndpointResolver;
use crate::node::NodeConnector;
use crate::reconnect::ReconnectPolicy;
use crate::repository::SubscriptionRepository;
use crate::sender::EventSender;
use crate::types::{Network, SubscriptionKey, SubscriptionRecord};
use crate::worker::{StreamWorker, WorkerExit, WorkerReport};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub key: SubscriptionKey,
    pub network: Network,
    pub started_at: DateTime<Utc>,
    pub finished: bool,
    pub report: WorkerReport,
}

struct WorkerEntry {
    key: SubscriptionKey,
    network: Network,
    started_at: DateTime<Utc>,
    report: watch::Receiver<WorkerReport>,
    handle: JoinHandle<WorkerExit>,
    shutdown_sender: Option<oneshot::Sender<()>>,
}

impl WorkerEntry {
    fn signal_shutdown(&mut self, id: &str) {
        if let Some(sender) = self.shutdown_sender.take() {
            if sender.send(()).is_err() {
                warn!("Worker {} ({}) already terminated", id, self.key);
            }
        }
    }
}

/// Outcome of [`SubscriptionEngine::start`].
#[derive(Debug, Clone, Default)]
pub struct StartReport {
    pub spawned: Vec<String>,
    pub skipped: Vec<(SubscriptionKey, String)>,
}

/// Spawns and supervises one stream worker per subscription record.
pub struct SubscriptionEngine {
    repository: Arc<dyn SubscriptionRepository>,
    resolver: Arc<dyn EndpointResolver>,
    sender: Arc<dyn EventSender>,
    connector: Arc<dyn NodeConnector>,
    policy: ReconnectPolicy,
    endpoints: RwLock<HashMap<Network, Arc<str>>>,
    workers: RwLock<HashMap<String, WorkerEntry>>,
}

impl SubscriptionEngine {
    pub fn new(
        repository: Arc<dyn SubscriptionRepository>,
        resolver: Arc<dyn EndpointResolver>,
        sender: Arc<dyn EventSender>,
        connector: Arc<dyn NodeConnector>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            repository,
            resolver,
            sender,
            connector,
            policy,
            endpoints: RwLock::new(HashMap::new()),
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Loads all active records, resolves each referenced network's endpoint once
    /// and spawns a worker per record. Returns as soon as every spawn is issued.
    ///
    /// A repository failure aborts before anything is spawned. An endpoint
    /// failure skips only the records on that network.
    pub async fn start(&self) -> anyhow::Result<StartReport> {
        let records = self
            .repository
            .list_active()
            .await
            .context("Failed to load active subscriptions")?;
        info!("Starting {} subscriptions", records.len());

        let networks: BTreeSet<Network> = records.iter().map(|r| r.network).collect();
        let mut unresolved: HashMap<Network, String> = HashMap::new();
        for network in networks {
            if let Err(e) = self.endpoint_for(network).await {
                error!("Failed to resolve endpoint for {}, skipping its subscriptions: {:#}", network, e);
                unresolved.insert(network, format!("{:#}", e));
            }
        }

        let mut report = StartReport::default();
        for record in records {
            if let Some(reason) = unresolved.get(&record.network) {
                report.skipped.push((record.key(), reason.clone()));
                continue;
            }

            let key = record.key();
            match self.spawn_worker(record).await {
                Ok(id) => report.spawned.push(id),
                Err(e) => {
                    error!("Failed to start worker for {}: {:#}", key, e);
                    report.skipped.push((key, format!("{:#}", e)));
                }
            }
        }

        info!("Spawned {} workers, skipped {}", report.spawned.len(), report.skipped.len());
        Ok(report)
    }

    /// Starts a worker for a record registered while running. A worker already
    /// serving the same address and event is stopped first, under the same lock
    /// as the insert, so at most one live worker serves a key.
    pub async fn attach(&self, record: SubscriptionRecord) -> anyhow::Result<String> {
        let endpoint = self.endpoint_for(record.network).await?;
        let key = record.key();

        let mut workers = self.workers.write().await;
        prune_finished(&mut workers);
        let replaced = stop_matching(&mut workers, &key);
        if replaced > 0 {
            info!("Replacing {} worker(s) for {}", replaced, key);
        }

        let (id, entry) = self.launch(endpoint, record)?;
        workers.insert(id.clone(), entry);
        Ok(id)
    }

    /// Signals every worker serving `address` and `event_name` to stop.
    pub async fn detach(&self, address: Address, event_name: &str) -> usize {
        let key = SubscriptionKey {
            contract_address: address,
            event_name: event_name.to_string(),
        };
        let mut workers = self.workers.write().await;
        prune_finished(&mut workers);
        stop_matching(&mut workers, &key)
    }

    /// Cached endpoint for `network`, resolved on first use.
    pub async fn endpoint_for(&self, network: Network) -> anyhow::Result<Arc<str>> {
        if let Some(endpoint) = self.endpoints.read().await.get(&network) {
            return Ok(Arc::clone(endpoint));
        }

        let endpoint: Arc<str> = self.resolver.resolve(network).await?.into();
        let mut endpoints = self.endpoints.write().await;
        let cached = endpoints.entry(network).or_insert(endpoint);
        Ok(Arc::clone(cached))
    }

    async fn spawn_worker(&self, record: SubscriptionRecord) -> anyhow::Result<String> {
        let endpoint = self.endpoint_for(record.network).await?;
        let (id, entry) = self.launch(endpoint, record)?;
        self.workers.write().await.insert(id.clone(), entry);
        Ok(id)
    }

    fn launch(&self, endpoint: Arc<str>, record: SubscriptionRecord) -> anyhow::Result<(String, WorkerEntry)> {
        let key = record.key();
        let network = record.network;

        let worker = StreamWorker::new(
            endpoint,
            Arc::new(record),
            Arc::clone(&self.sender),
            Arc::clone(&self.connector),
        )?;
        let report = worker.subscribe_report();

        let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();
        let handle = tokio::spawn(worker.run_supervised(self.policy.clone(), shutdown_receiver));

        let id = Uuid::new_v4().to_string();
        info!("Worker {} spawned for {} on {}", id, key, network);

        let entry = WorkerEntry {
            key,
            network,
            started_at: Utc::now(),
            report,
            handle,
            shutdown_sender: Some(shutdown_sender),
        };
        Ok((id, entry))
    }

    pub async fn workers(&self) -> Vec<WorkerInfo> {
        let workers = self.workers.read().await;
        let mut infos: Vec<WorkerInfo> = workers
            .iter()
            .map(|(id, entry)| WorkerInfo {
                id: id.clone(),
                key: entry.key.clone(),
                network: entry.network,
                started_at: entry.started_at,
                finished: entry.handle.is_finished(),
                report: entry.report.borrow().clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    pub async fn get_worker(&self, id: &str) -> Option<WorkerInfo> {
        self.workers().await.into_iter().find(|w| w.id == id)
    }

    /// Drops the handles of workers that have terminated.
    pub async fn cleanup_finished(&self) -> usize {
        prune_finished(&mut *self.workers.write().await)
    }

    /// Signals every worker to stop and waits for all of them.
    pub async fn shutdown(&self) -> Vec<(SubscriptionKey, WorkerExit)> {
        let mut entries: Vec<(String, WorkerEntry)> = self.workers.write().await.drain().collect();
        info!("Shutting down {} workers", entries.len());

        for (id, entry) in entries.iter_mut() {
            entry.signal_shutdown(id);
        }

        let mut exits = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            match entry.handle.await {
                Ok(exit) => exits.push((entry.key, exit)),
                Err(e) => error!("Worker {} ({}) panicked or was aborted: {:?}", id, entry.key, e),
            }
        }
        exits
    }
}

fn prune_finished(workers: &mut HashMap<String, WorkerEntry>) -> usize {
    let before = workers.len();
    workers.retain(|id, entry| {
        let finished = entry.handle.is_finished();
        if finished {
            info!("Cleaning up finished worker: {} ({})", id, entry.key);
        }
        !finished
    });
    before - workers.len()
}

fn stop_matching(workers: &mut HashMap<String, WorkerEntry>, key: &SubscriptionKey) -> usize {
    let mut stopped = 0;
    for (id, entry) in workers.iter_mut() {
        if entry.key == *key && entry.shutdown_sender.is_some() {
            info!("Stopping worker {} ({})", id, entry.key);
            entry.signal_shutdown(id);
            stopped += 1;
        }
    }
    stopped
}
