use thiserror::Error;
use tracing::instrument;
use waybill_core::storage::{RecordStore, StoreError};

use crate::cipher::{CipherError, KeyMaterial, RecordCipher};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SealedStoreError {
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Encrypt-then-store wrapper over any `RecordStore`.
/// Values are persisted as `nonce ‖ ciphertext ‖ tag`; plaintext never reaches the store.
pub struct SealedStore<S: RecordStore> {
    store: S,
    cipher: RecordCipher,
}

impl<S: RecordStore> SealedStore<S> {
    pub fn new(store: S, key: &KeyMaterial) -> Result<Self, CipherError> {
        Ok(Self {
            store,
            cipher: RecordCipher::from_material(key)?,
        })
    }

    #[instrument(skip_all, fields(key = %key))]
    pub fn seal_and_put(&self, key: &str, plaintext: &[u8]) -> Result<(), SealedStoreError> {
        let record = self.cipher.encrypt(plaintext)?;
        self.store.put(key, &record)?;
        Ok(())
    }

    #[instrument(skip_all, fields(key = %key))]
    pub fn get_and_open(&self, key: &str) -> Result<Vec<u8>, SealedStoreError> {
        let record = self.store.get(key)?;
        Ok(self.cipher.decrypt(&record)?)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn close(&self) -> Result<(), StoreError> {
        self.store.close()
    }
}
