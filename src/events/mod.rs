//! Operator telemetry events
//!
//! Events are queued on a bounded channel and shipped by a background task,
//! so emitting never blocks or fails a dispatch. Shipping failures are logged
//! locally only.

use crate::config::TelemetryConfig;
use crate::error::OperatorResult;
use crate::model::{CallDescriptor, ReservationBranch};

use async_trait::async_trait;
use ethers::types::H256;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Events emitted by the dispatch pipeline
#[derive(Debug, Clone)]
pub enum OperatorEvent {
    /// A nonce was reserved
    NonceReserved {
        branch: ReservationBranch,
        tx_count: u64,
        current_cached_nonce: Option<u64>,
        tx_nonce: u64,
        cached_nonce: u64,
    },

    /// A transaction was accepted by the node
    TransactionSent {
        call: CallDescriptor,
        nonce: u64,
        tx_hash: H256,
        correlation_id: String,
    },

    /// Broadcast failed; the reservation was discarded
    TransactionError {
        call: CallDescriptor,
        nonce: u64,
        message: String,
        correlation_id: String,
    },

    /// Pending entries purged by compaction
    Cleanup { from: u64, to: u64 },
}

impl OperatorEvent {
    /// Get event name
    pub fn name(&self) -> &'static str {
        match self {
            OperatorEvent::NonceReserved { .. } => "nonce",
            OperatorEvent::TransactionSent { .. } => "internal_transaction",
            OperatorEvent::TransactionError { .. } => "transaction_error",
            OperatorEvent::Cleanup { .. } => "cleanup",
        }
    }
}

/// A flattened event ready for shipping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub event_type: &'static str,
    pub attributes: BTreeMap<String, String>,
}

/// Destination for telemetry records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, record: TelemetryRecord) -> OperatorResult<()>;
}

/// Writes records to the structured log
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn publish(&self, record: TelemetryRecord) -> OperatorResult<()> {
        info!(
            target: "telemetry",
            event_type = record.event_type,
            attributes = ?record.attributes,
            "Telemetry event"
        );
        Ok(())
    }
}

/// Cloneable handle used to emit events
#[derive(Clone)]
pub struct Telemetry {
    tx: mpsc::Sender<TelemetryRecord>,
    network: Arc<str>,
    environment: Arc<str>,
}

impl Telemetry {
    /// Create the handle and the receiving end for `run_sink`
    pub fn channel(config: &TelemetryConfig) -> (Self, mpsc::Receiver<TelemetryRecord>) {
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let telemetry = Self {
            tx,
            network: Arc::from(config.network_name.as_str()),
            environment: Arc::from(config.environment.as_str()),
        };
        (telemetry, rx)
    }

    /// Queue an event; drops it with a warning if the queue is full or closed
    pub fn emit(&self, event: OperatorEvent) {
        let record = self.flatten(&event);
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                warn!("Telemetry queue full, dropping {} event", record.event_type);
                crate::metrics::record_telemetry_dropped();
            }
            Err(TrySendError::Closed(record)) => {
                debug!("Telemetry sink closed, dropping {} event", record.event_type);
                crate::metrics::record_telemetry_dropped();
            }
        }
    }

    fn flatten(&self, event: &OperatorEvent) -> TelemetryRecord {
        let mut attributes = BTreeMap::new();

        match event {
            OperatorEvent::NonceReserved {
                branch,
                tx_count,
                current_cached_nonce,
                tx_nonce,
                cached_nonce,
            } => {
                attributes.insert("description".into(), branch.description().into());
                attributes.insert("tx_count".into(), tx_count.to_string());
                attributes.insert(
                    "current_cached_nonce".into(),
                    current_cached_nonce
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "-1".to_string()),
                );
                attributes.insert("tx_nonce".into(), tx_nonce.to_string());
                attributes.insert("cached_nonce".into(), cached_nonce.to_string());
            }
            OperatorEvent::TransactionSent {
                call,
                nonce,
                tx_hash,
                correlation_id,
            } => {
                self.transaction_attributes(&mut attributes, call, *nonce, correlation_id);
                attributes.insert("tx_hash".into(), format!("{:?}", tx_hash));
            }
            OperatorEvent::TransactionError {
                call,
                nonce,
                message,
                correlation_id,
            } => {
                self.transaction_attributes(&mut attributes, call, *nonce, correlation_id);
                attributes.insert("error".into(), message.clone());
            }
            OperatorEvent::Cleanup { from, to } => {
                attributes.insert("from".into(), from.to_string());
                attributes.insert("to".into(), to.to_string());
            }
        }

        TelemetryRecord {
            event_type: event.name(),
            attributes,
        }
    }

    fn transaction_attributes(
        &self,
        attributes: &mut BTreeMap<String, String>,
        call: &CallDescriptor,
        nonce: u64,
        correlation_id: &str,
    ) {
        attributes.insert("function_name".into(), call.function_name.clone());
        attributes.insert("nonce".into(), nonce.to_string());
        attributes.insert(
            "timestamp".into(),
            chrono::Utc::now().timestamp_millis().to_string(),
        );
        attributes.insert("calldata".into(), serialize_calldata(&call.arguments));
        attributes.insert("network".into(), self.network.to_string());
        attributes.insert("env".into(), self.environment.to_string());
        attributes.insert("from".into(), format!("{:?}", call.from));
        attributes.insert("to".into(), format!("{:?}", call.to));
        attributes.insert("correlation_id".into(), correlation_id.to_string());
    }
}

/// JSON array of the arguments with quotes stripped
fn serialize_calldata(arguments: &[String]) -> String {
    serde_json::to_string(arguments)
        .unwrap_or_default()
        .replace('"', "")
}

/// Drain queued records into the sink until every handle is dropped
pub async fn run_sink(mut rx: mpsc::Receiver<TelemetryRecord>, sink: Arc<dyn EventSink>) {
    while let Some(record) = rx.recv().await {
        let event_type = record.event_type;
        match sink.publish(record).await {
            Ok(()) => debug!("Success publishing telemetry event: {}", event_type),
            Err(e) => warn!("Failed publishing telemetry event {}: {}", event_type, e),
        }
    }
    debug!("Telemetry channel closed");
}
