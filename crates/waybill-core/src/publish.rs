use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::{info, instrument};

use crate::record::{ContentId, ShipmentRecord};

/// Contract for any external content-addressed store (IPFS, local stub).
#[async_trait]
pub trait ContentPublisher: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    /// Publish a plaintext record and return the identifier it can be fetched by.
    async fn publish(&self, record: &ShipmentRecord) -> Result<ContentId>;
}

/// Publisher used when no external store is configured: logs the record and
/// hands back a local sequence id.
#[derive(Debug, Default)]
pub struct LogPublisher {
    seq: AtomicU64,
}

#[async_trait]
impl ContentPublisher for LogPublisher {
    fn name(&self) -> &'static str {
        "log"
    }

    #[instrument(skip_all, fields(product_id = %record.product_id))]
    async fn publish(&self, record: &ShipmentRecord) -> Result<ContentId> {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = ContentId(format!("local-{n}"));
        info!(%id, location = %record.location, "no content store configured; record logged only");
        Ok(id)
    }
}

/// Publisher that remembers every record it receives. Useful for tests and
/// smoke checks; can be told to fail for a given product id.
#[derive(Debug, Default, Clone)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<ShipmentRecord>>>,
    fail_for: Option<String>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every publication of the given product id.
    pub fn failing_for(product_id: impl Into<String>) -> Self {
        Self {
            published: Arc::default(),
            fail_for: Some(product_id.into()),
        }
    }

    pub fn published(&self) -> Vec<ShipmentRecord> {
        self.published
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContentPublisher for RecordingPublisher {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn publish(&self, record: &ShipmentRecord) -> Result<ContentId> {
        if self.fail_for.as_deref() == Some(record.product_id.as_str()) {
            return Err(anyhow!("content store rejected {}", record.product_id));
        }
        let mut guard = self
            .published
            .lock()
            .map_err(|err| anyhow!("lock poisoned: {err}"))?;
        guard.push(record.clone());
        Ok(ContentId(format!("rec-{}", guard.len() - 1)))
    }
}
