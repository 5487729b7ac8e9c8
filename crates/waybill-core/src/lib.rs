//! Core abstractions for Waybill: settings, shipment records, the record store
//! contract and the content publisher contract.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod publish;
pub mod record;
pub mod settings;
pub mod storage;
