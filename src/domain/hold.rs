// Escrowed payment hold, one per job

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::string_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldStatus {
    Held,
    Releasable,
    /// Claimed for release; the provider call is in flight or awaiting reconciliation
    Releasing,
    Released,
}

string_enum!(HoldStatus, "hold status", {
    Held => "held",
    Releasable => "releasable",
    Releasing => "releasing",
    Released => "released",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentRail {
    Stripe,
    Ach,
    Balance,
}

string_enum!(PaymentRail, "payment rail", {
    Stripe => "stripe",
    Ach => "ach",
    Balance => "balance",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentHold {
    pub id: String,
    pub job_id: String,
    pub amount_cents: i64,
    pub rail: PaymentRail,
    pub status: HoldStatus,
    pub provider: String,
    pub provider_ref: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
