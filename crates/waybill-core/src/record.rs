use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shipment metadata captured at a custody checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShipmentRecord {
    pub product_id: String,
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub owner: String,
}

impl ShipmentRecord {
    pub fn new(
        product_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        location: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            timestamp,
            location: location.into(),
            owner: owner.into(),
        }
    }

    /// Record stamped with the current time.
    pub fn now(
        product_id: impl Into<String>,
        location: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self::new(product_id, Utc::now(), location, owner)
    }

    /// Serialized form used both for encryption at rest and publication.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Identifier returned by a content-addressed store for a published record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ContentId(pub String);

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_uses_plain_field_names() {
        let ts = DateTime::parse_from_rfc3339("2025-01-06T10:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        let record = ShipmentRecord::new("SampleProductID", ts, "Warehouse A", "Company X");

        let json: serde_json::Value =
            serde_json::from_slice(&record.to_json().expect("serialize")).expect("parse");
        assert_eq!(json["product_id"], "SampleProductID");
        assert_eq!(json["location"], "Warehouse A");
        assert_eq!(json["owner"], "Company X");
        assert_eq!(json["timestamp"], "2025-01-06T10:00:00Z");

        let back = ShipmentRecord::from_json(&record.to_json().expect("serialize")).expect("decode");
        assert_eq!(back, record);
    }
}
