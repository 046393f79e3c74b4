//! The single path from a raw payload to a stored reading.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::{sync::mpsc, time::timeout};
use tokio_stream::{StreamExt as _, wrappers::ReceiverStream};
use tracing::{debug, error, warn};

use crate::{
    store::{Store, StoreError},
    telemetry::{Reading, StoredReading},
    validate::{GasMode, Strictness, Validated, ValidationError, ValidationRules, validate},
};

/// Producer of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Bus,
    Api,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Bus => "bus",
            Origin::Api => "api",
        }
    }

    pub fn strictness(&self) -> Strictness {
        match self {
            Origin::Bus => Strictness::Lenient,
            Origin::Api => Strictness::Strict,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub gas_mode: GasMode,

    /// Upper bound for every store call.
    pub store_timeout: Duration,

    /// Hard ceiling on the number of readings a query returns.
    pub query_cap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gas_mode: GasMode::Auto,
            store_timeout: Duration::from_secs(5),
            query_cap: 1000,
        }
    }
}

/// Validates payloads from either producer and persists them to one store.
///
/// Holds no mutable state of its own. Clones share the store.
#[derive(Debug)]
pub struct Pipeline<S> {
    store: Arc<S>,
    config: PipelineConfig,
}

impl<S> Clone for Pipeline<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config,
        }
    }
}

impl<S: Store> Pipeline<S> {
    pub fn new(store: S, config: PipelineConfig) -> Self {
        Self::with_shared_store(Arc::new(store), config)
    }

    pub fn with_shared_store(store: Arc<S>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn normalize(
        &self,
        raw: &Map<String, Value>,
        origin: Origin,
    ) -> Result<Validated, ValidationError> {
        validate(
            raw,
            ValidationRules {
                strictness: origin.strictness(),
                gas_mode: self.config.gas_mode,
            },
        )
    }

    /// Validates `raw` with the strictness of `origin` and stores the result.
    /// Exactly one write happens per accepted payload; duplicates are not
    /// detected.
    pub async fn ingest(
        &self,
        raw: &Map<String, Value>,
        origin: Origin,
    ) -> Result<StoredReading, IngestError> {
        let Validated { reading, warnings } = self.normalize(raw, origin)?;

        for w in &warnings {
            warn!(%origin, field = %w.field, reason = %w.reason, "accepted questionable value");
        }

        let stored = self
            .bounded(self.store.append(reading))
            .await
            .inspect_err(|err| error!(%origin, error = %err, "failed to store reading"))?;

        debug!(%origin, id = stored.id, timestamp = %stored.timestamp, "stored reading");
        Ok(stored)
    }

    /// Bus entry point. The bus has no response channel, so every failure
    /// is logged and the message dropped.
    pub async fn ingest_bus_payload(&self, payload: &[u8]) -> Option<StoredReading> {
        let result = match parse_payload(payload) {
            Ok(raw) => self.ingest(&raw, Origin::Bus).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(stored) => Some(stored),
            Err(err) => {
                warn!(
                    error = %err,
                    payload = %String::from_utf8_lossy(payload),
                    "dropping bus message"
                );
                None
            }
        }
    }

    /// Drains bus payloads one at a time, in delivery order, until every
    /// sender is gone.
    pub async fn consume_bus(&self, rx: mpsc::Receiver<Vec<u8>>) {
        let mut messages = ReceiverStream::new(rx);
        while let Some(payload) = messages.next().await {
            self.ingest_bus_payload(&payload).await;
        }
        debug!("bus queue closed");
    }

    /// Stores already validated readings in one all-or-nothing write.
    pub async fn persist_batch(
        &self,
        readings: Vec<Reading>,
    ) -> Result<Vec<StoredReading>, IngestError> {
        let count = readings.len();
        let stored = self
            .bounded(self.store.append_batch(readings))
            .await
            .inspect_err(|err| error!(count, error = %err, "failed to store batch"))?;
        Ok(stored)
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<StoredReading>, StoreError> {
        self.bounded(self.store.recent(limit, self.config.query_cap))
            .await
    }

    pub async fn store_reachable(&self) -> bool {
        match self.bounded(self.store.ping()).await {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "store ping failed");
                false
            }
        }
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        timeout(self.config.store_timeout, op)
            .await
            .map_err(|_| StoreError::Timeout(self.config.store_timeout))?
    }
}

pub fn parse_payload(payload: &[u8]) -> Result<Map<String, Value>, IngestError> {
    match serde_json::from_slice(payload) {
        Ok(Value::Object(raw)) => Ok(raw),
        Ok(other) => Err(IngestError::MalformedPayload(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(err) => Err(IngestError::MalformedPayload(err.to_string())),
    }
}
