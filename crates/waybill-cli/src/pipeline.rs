use std::sync::Arc;

use color_eyre::Result;
use tracing::{info, instrument};
use waybill_core::{
    publish::{ContentPublisher, LogPublisher},
    record::ShipmentRecord,
    settings::Settings,
    storage::RecordStore,
};
use waybill_dispatch::{DispatcherConfig, TaskDispatcher, TaskId};
use waybill_publish::{IpfsConfig, IpfsPublisher};
use waybill_storage::{cipher::KeyMaterial, sealed_store::SealedStore, sqlite_store::SqliteRecordStore};

use crate::storage;

/// Everything one run needs: the sealed store, the publisher and the task pool.
/// Owned by the caller; nothing here is global.
pub struct Pipeline<S: RecordStore> {
    store: Arc<SealedStore<S>>,
    publisher: Arc<dyn ContentPublisher>,
    dispatcher: TaskDispatcher,
}

impl Pipeline<SqliteRecordStore> {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let store = storage::store_from_settings(settings)?;
        Ok(Self {
            store: Arc::new(store),
            publisher: publisher_from_settings(settings),
            dispatcher: TaskDispatcher::new(dispatcher_config(settings)?)?,
        })
    }
}

impl<S: RecordStore + 'static> Pipeline<S> {
    pub fn new(
        store: S,
        key: &KeyMaterial,
        publisher: Arc<dyn ContentPublisher>,
        config: DispatcherConfig,
    ) -> Result<Self> {
        Ok(Self {
            store: Arc::new(SealedStore::new(store, key)?),
            publisher,
            dispatcher: TaskDispatcher::new(config)?,
        })
    }

    /// Encrypt and upsert the record under `key`, then queue its publication.
    /// The store write runs on the blocking pool; it may wait on the store lock.
    #[instrument(skip_all, fields(key = %key, product_id = %record.product_id))]
    pub async fn record(&mut self, key: &str, record: ShipmentRecord) -> Result<TaskId> {
        let plaintext = record.to_json()?;
        let store = Arc::clone(&self.store);
        let owned_key = key.to_string();
        tokio::task::spawn_blocking(move || store.seal_and_put(&owned_key, &plaintext)).await??;

        let publisher = Arc::clone(&self.publisher);
        let task = self
            .dispatcher
            .add_task(async move {
                let id = publisher.publish(&record).await?;
                info!(%id, publisher = publisher.name(), "record published");
                Ok(())
            })
            .await?;
        Ok(task)
    }

    #[cfg(test)]
    pub fn store(&self) -> &SealedStore<S> {
        &self.store
    }

    #[cfg(test)]
    pub fn dispatcher(&mut self) -> &mut TaskDispatcher {
        &mut self.dispatcher
    }

    /// Barrier, then shutdown. The store is closed even when a task failed;
    /// the task failure takes precedence in the result.
    pub async fn finish(mut self) -> Result<usize> {
        let waited = self.dispatcher.wait_for_all().await;
        self.dispatcher.shutdown().await;
        let closed = self.store.close();
        let completed = waited?;
        closed?;
        Ok(completed)
    }
}

/// IPFS when `ipfs_api` is set, otherwise log-only publication.
pub fn publisher_from_settings(settings: &Settings) -> Arc<dyn ContentPublisher> {
    match settings.ipfs_api() {
        Some(api) => Arc::new(IpfsPublisher::new(IpfsConfig::new(api))),
        None => Arc::new(LogPublisher::default()),
    }
}

pub fn dispatcher_config(settings: &Settings) -> Result<DispatcherConfig> {
    Ok(DispatcherConfig {
        worker_count: settings.workers()?,
        queue_capacity: settings.queue_capacity()?,
    })
}
