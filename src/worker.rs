use std::sync::Arc;

use alloy::rpc::types::{Filter, Log as RpcLog};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::event_decoder::EventDecoder;
use crate::node::NodeConnector;
use crate::reconnect::ReconnectPolicy;
use crate::sender::EventSender;
use crate::types::{SubscriptionKey, SubscriptionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Idle,
    Connecting,
    Streaming,
    Terminated,
}

/// Why a worker session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerExit {
    /// The node closed the log stream.
    Closed,
    /// A shutdown signal was received.
    Shutdown,
    ConnectFailed(String),
    SubscribeFailed(String),
}

impl WorkerExit {
    pub fn reached_streaming(&self) -> bool {
        matches!(self, WorkerExit::Closed | WorkerExit::Shutdown)
    }
}

/// Live view of a worker, published through a watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub state: WorkerState,
    pub received: u64,
    pub delivered: u64,
    pub delivery_failures: u64,
    pub decode_failures: u64,
    pub stream_errors: u64,
    pub restarts: u32,
    pub last_exit: Option<WorkerExit>,
}

impl Default for WorkerReport {
    fn default() -> Self {
        Self {
            state: WorkerState::Idle,
            received: 0,
            delivered: 0,
            delivery_failures: 0,
            decode_failures: 0,
            stream_errors: 0,
            restarts: 0,
            last_exit: None,
        }
    }
}

/// Owns one live log subscription for one subscription record.
pub struct StreamWorker {
    key: SubscriptionKey,
    endpoint: Arc<str>,
    record: Arc<SubscriptionRecord>,
    decoder: EventDecoder,
    sender: Arc<dyn EventSender>,
    connector: Arc<dyn NodeConnector>,
    report: watch::Sender<WorkerReport>,
}

impl StreamWorker {
    /// Fails when the record's event cannot be found in, or resolved from, its ABI.
    pub fn new(
        endpoint: Arc<str>,
        record: Arc<SubscriptionRecord>,
        sender: Arc<dyn EventSender>,
        connector: Arc<dyn NodeConnector>,
    ) -> anyhow::Result<Self> {
        let decoder = EventDecoder::for_record(&record)?;
        if decoder.signature() != record.event_signature {
            warn!(
                "Stored signature {:#x} of {} differs from its ABI, filtering on {:#x}",
                record.event_signature,
                record.key(),
                decoder.signature()
            );
        }
        let (report, _) = watch::channel(WorkerReport::default());

        Ok(Self {
            key: record.key(),
            endpoint,
            record,
            decoder,
            sender,
            connector,
            report,
        })
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn subscribe_report(&self) -> watch::Receiver<WorkerReport> {
        self.report.subscribe()
    }

    pub fn report(&self) -> WorkerReport {
        self.report.borrow().clone()
    }

    /// Log filter: the record's contract address and the event's signature topic.
    pub fn filter(&self) -> Filter {
        Filter::new()
            .address(self.record.contract_address)
            .event_signature(self.decoder.signature())
    }

    fn set_state(&self, state: WorkerState) {
        debug!("Worker {} -> {:?}", self.key, state);
        self.report.send_modify(|r| r.state = state);
    }

    fn terminate(&self, exit: WorkerExit) -> WorkerExit {
        self.report.send_modify(|r| {
            r.state = WorkerState::Terminated;
            r.last_exit = Some(exit.clone());
        });
        exit
    }

    /// One session: connect, subscribe, then decode and deliver until the stream
    /// ends or shutdown is signalled. Connect and subscribe failures are terminal
    /// for the session and never reach the sender.
    pub async fn run(&mut self, shutdown: &mut oneshot::Receiver<()>) -> WorkerExit {
        self.set_state(WorkerState::Connecting);

        let connected = tokio::select! {
            _ = shutdown_requested(shutdown) => None,
            result = self.connector.connect(&self.endpoint) => Some(result),
        };
        let connection = match connected {
            Some(Ok(connection)) => connection,
            Some(Err(e)) => {
                error!("Worker {} failed to connect to {} node: {:#}", self.key, self.record.network, e);
                return self.terminate(WorkerExit::ConnectFailed(format!("{:#}", e)));
            }
            None => {
                info!("Worker {} received shutdown signal while connecting", self.key);
                return self.terminate(WorkerExit::Shutdown);
            }
        };

        let filter = self.filter();
        let subscribed = tokio::select! {
            _ = shutdown_requested(shutdown) => None,
            result = connection.subscribe_logs(&filter) => Some(result),
        };
        let mut logs = match subscribed {
            Some(Ok(logs)) => logs,
            Some(Err(e)) => {
                error!("Worker {} failed to subscribe to logs: {:#}", self.key, e);
                return self.terminate(WorkerExit::SubscribeFailed(format!("{:#}", e)));
            }
            None => {
                info!("Worker {} received shutdown signal while subscribing", self.key);
                return self.terminate(WorkerExit::Shutdown);
            }
        };

        self.set_state(WorkerState::Streaming);
        info!("Subscribed to {} logs of {} on {}", self.record.event_name, self.record.contract_address, self.record.network);

        let exit = loop {
            tokio::select! {
                _ = shutdown_requested(shutdown) => {
                    info!("Worker {} received shutdown signal", self.key);
                    break WorkerExit::Shutdown;
                }
                item = logs.next() => match item {
                    Some(Ok(log)) => self.handle_log(log).await,
                    Some(Err(e)) => {
                        self.report.send_modify(|r| r.stream_errors += 1);
                        warn!("Worker {} stream error: {}", self.key, e);
                    }
                    None => {
                        warn!("Worker {} log stream closed", self.key);
                        break WorkerExit::Closed;
                    }
                }
            }
        };

        drop(logs);
        drop(connection);
        self.terminate(exit)
    }

    /// Runs sessions until shutdown, restarting closed or failed sessions with backoff.
    /// The retry budget is restored whenever a session reaches streaming.
    pub async fn run_supervised(mut self, policy: ReconnectPolicy, mut shutdown: oneshot::Receiver<()>) -> WorkerExit {
        let mut attempt = 0u32;

        loop {
            let exit = self.run(&mut shutdown).await;
            if exit == WorkerExit::Shutdown {
                return exit;
            }
            if exit.reached_streaming() {
                attempt = 0;
            }

            attempt += 1;
            let Some(delay) = policy.next_delay(attempt) else {
                if policy.max_retries > 0 {
                    error!("Worker {} gave up after {} reconnect attempts: {:?}", self.key, policy.max_retries, exit);
                } else {
                    info!("Worker {} terminated: {:?}", self.key, exit);
                }
                return exit;
            };

            warn!("Worker {} restarting in {:?} (attempt {}/{})", self.key, delay, attempt, policy.max_retries);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Worker {} received shutdown signal while waiting to reconnect", self.key);
                    return self.terminate(WorkerExit::Shutdown);
                }
            }
            self.report.send_modify(|r| r.restarts += 1);
        }
    }

    async fn handle_log(&self, log: RpcLog) {
        self.report.send_modify(|r| r.received += 1);

        if log.removed {
            debug!("Worker {} skipping log removed by a reorg: {:?}", self.key, log.transaction_hash);
            return;
        }

        let event = match self.decoder.decode_rpc_log(&log) {
            Ok(event) => event,
            Err(e) => {
                self.report.send_modify(|r| r.decode_failures += 1);
                warn!("Worker {} failed to decode log: {:#}", self.key, e);
                return;
            }
        };

        debug!("Worker {} decoded {} at block {:?}", self.key, event.event_name, event.block_number);

        match self.sender.send(&event, &self.record).await {
            Ok(()) => self.report.send_modify(|r| r.delivered += 1),
            Err(e) => {
                self.report.send_modify(|r| r.delivery_failures += 1);
                error!("Worker {} failed to deliver {} notification: {:#}", self.key, event.event_name, e);
            }
        }
    }
}

/// Resolves when shutdown is signalled. A dropped sender never signals.
async fn shutdown_requested(shutdown: &mut oneshot::Receiver<()>) {
    match shutdown.try_recv() {
        Ok(()) => return,
        // Also reached once the receiver has completed; it must not be polled again.
        Err(TryRecvError::Closed) => {}
        Err(TryRecvError::Empty) => {
            if (&mut *shutdown).await.is_ok() {
                return;
            }
        }
    }
    std::future::pending::<()>().await
}
