// Job aggregate and lifecycle status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{string_enum, GateOverrides, PaymentRail};

/// Lifecycle states of a transport job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created at intake, no carrier yet
    Draft,
    Assigned,
    Accepted,
    PickupConfirmed,
    DeliverySubmitted,
    /// Gate passed and approved; payment may be released
    Releasable,
    Released,
    Disputed,
    Cancelled,
}

string_enum!(JobStatus, "job status", {
    Draft => "DRAFT",
    Assigned => "ASSIGNED",
    Accepted => "ACCEPTED",
    PickupConfirmed => "PICKUP_CONFIRMED",
    DeliverySubmitted => "DELIVERY_SUBMITTED",
    Releasable => "RELEASABLE",
    Released => "RELEASED",
    Disputed => "DISPUTED",
    Cancelled => "CANCELLED",
});

impl JobStatus {
    /// Statuses in which a carrier is actively working the job
    pub fn is_carrier_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Assigned
                | JobStatus::Accepted
                | JobStatus::PickupConfirmed
                | JobStatus::DeliverySubmitted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub vin: String,
    pub pickup_address: String,
    pub dropoff_address: String,
    /// Price in minor currency units
    pub price_cents: i64,
    pub delivery_deadline: Option<DateTime<Utc>>,
    pub carrier_name: Option<String>,
    pub carrier_email: Option<String>,
    pub carrier_phone: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a job together with its gate and hold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobIntake {
    pub vin: String,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub price_cents: i64,
    pub delivery_deadline: Option<DateTime<Utc>>,
    pub rail: PaymentRail,
    #[serde(default)]
    pub gate: GateOverrides,
}

/// Carrier details supplied when assigning a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierAssignment {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl CarrierAssignment {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: None,
            phone: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_round_trip() {
        for status in JobStatus::ALL {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, *status);
        }
        assert!("SHIPPED".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_screaming_snake() {
        let json = serde_json::to_string(&JobStatus::PickupConfirmed).unwrap();
        assert_eq!(json, "\"PICKUP_CONFIRMED\"");
    }
}
