// Evidence items submitted as proof of work

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::string_enum;
use crate::error::EscrowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    PickupPhoto,
    DeliveryPhoto,
    VinPhoto,
    /// Decoded VIN text, compared against the job VIN
    VinScan,
    /// Proof of delivery
    Pod,
    Note,
}

string_enum!(EvidenceType, "evidence type", {
    PickupPhoto => "pickup_photo",
    DeliveryPhoto => "delivery_photo",
    VinPhoto => "vin_photo",
    VinScan => "vin_scan",
    Pod => "pod",
    Note => "note",
});

impl EvidenceType {
    /// Photo types reference an object by storage key
    pub fn is_photo(&self) -> bool {
        matches!(
            self,
            EvidenceType::PickupPhoto | EvidenceType::DeliveryPhoto | EvidenceType::VinPhoto
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    pub job_id: String,
    pub evidence_type: EvidenceType,
    pub storage_key: Option<String>,
    pub value: Option<String>,
    pub submitted_by: String,
    pub gps: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
    pub redacted_at: Option<DateTime<Utc>>,
    pub redacted_by: Option<String>,
    pub redact_reason: Option<String>,
}

impl EvidenceItem {
    pub fn is_redacted(&self) -> bool {
        self.redacted_at.is_some()
    }
}

/// One item in an evidence upload batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSubmission {
    pub evidence_type: EvidenceType,
    pub storage_key: Option<String>,
    pub value: Option<String>,
    pub gps: Option<GeoPoint>,
}

impl EvidenceSubmission {
    pub fn photo(evidence_type: EvidenceType, storage_key: impl Into<String>) -> Self {
        Self {
            evidence_type,
            storage_key: Some(storage_key.into()),
            value: None,
            gps: None,
        }
    }

    pub fn text(evidence_type: EvidenceType, value: impl Into<String>) -> Self {
        Self {
            evidence_type,
            storage_key: None,
            value: Some(value.into()),
            gps: None,
        }
    }

    /// Rejects malformed items before anything is written
    pub fn validate(&self) -> Result<(), EscrowError> {
        let non_empty = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.trim().is_empty());

        if self.evidence_type.is_photo() {
            if !non_empty(&self.storage_key) {
                return Err(EscrowError::Validation(format!(
                    "{} requires a storage key",
                    self.evidence_type
                )));
            }
        } else if !non_empty(&self.value) {
            return Err(EscrowError::Validation(format!(
                "{} requires a value",
                self.evidence_type
            )));
        }

        if let Some(gps) = &self.gps {
            if !gps.is_valid() {
                return Err(EscrowError::Validation(format!(
                    "gps coordinates out of range: {}, {}",
                    gps.lat, gps.lng
                )));
            }
        }

        Ok(())
    }

    /// True when an existing item already records the same object or text
    pub fn duplicates(&self, existing: &EvidenceItem) -> bool {
        if existing.evidence_type != self.evidence_type {
            return false;
        }
        match (&self.storage_key, &existing.storage_key) {
            (Some(key), Some(other)) if key == other => return true,
            _ => {}
        }
        matches!((&self.value, &existing.value), (Some(value), Some(other)) if value == other)
    }
}
