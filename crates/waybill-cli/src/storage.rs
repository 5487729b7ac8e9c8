use std::path::Path;

use color_eyre::Result;
use tracing::debug;
use waybill_core::{
    record::ShipmentRecord,
    settings::Settings,
    storage::{RecordStore, StoreError},
};
use waybill_storage::{cipher::KeyMaterial, sealed_store::SealedStore, sqlite_store::SqliteRecordStore};

/// Decode the configured record key.
pub fn key_from_settings(settings: &Settings) -> Result<KeyMaterial> {
    Ok(KeyMaterial::from_setting(settings.encryption_key()?)?)
}

/// Open the configured SQLite store behind the configured key, creating the
/// database when it does not exist yet.
pub fn store_from_settings(settings: &Settings) -> Result<SealedStore<SqliteRecordStore>> {
    sealed_from_settings(settings, |path| SqliteRecordStore::open(path))
}

/// Like [`store_from_settings`], but a missing database is an error instead of
/// a fresh empty file. Used by the read-only commands.
pub fn existing_store_from_settings(settings: &Settings) -> Result<SealedStore<SqliteRecordStore>> {
    sealed_from_settings(settings, |path| SqliteRecordStore::open_existing(path))
}

fn sealed_from_settings(
    settings: &Settings,
    open: impl FnOnce(&Path) -> Result<SqliteRecordStore, StoreError>,
) -> Result<SealedStore<SqliteRecordStore>> {
    let key = key_from_settings(settings)?;
    let root = settings.db_path()?;
    debug!(?root, key_id = %key.id, "initializing encrypted store");
    let store = open(&root)?;
    Ok(SealedStore::new(store, &key)?)
}

/// Fetch, decrypt and decode the record stored under `key`.
pub fn load_record<S: RecordStore>(store: &SealedStore<S>, key: &str) -> Result<ShipmentRecord> {
    let plaintext = store.get_and_open(key)?;
    Ok(ShipmentRecord::from_json(&plaintext)?)
}

/// Helper for tests to construct a sealed in-memory store with a fixed key.
#[cfg(test)]
pub fn test_store() -> SealedStore<waybill_core::storage::InMemoryRecordStore> {
    let key = KeyMaterial::from_bytes(&[9u8; waybill_storage::cipher::KEY_LEN]).expect("key");
    SealedStore::new(waybill_core::storage::InMemoryRecordStore::new(), &key).expect("store")
}
