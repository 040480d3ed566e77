// Outbox message shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::string_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxKind {
    SendCarrierLink,
    DeliverySubmitted,
}

string_enum!(OutboxKind, "outbox message type", {
    SendCarrierLink => "SEND_CARRIER_LINK",
    DeliverySubmitted => "DELIVERY_SUBMITTED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Queued,
    Sent,
}

string_enum!(OutboxStatus, "outbox status", {
    Queued => "queued",
    Sent => "sent",
});

/// Message body; the variant determines the message type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboxPayload {
    SendCarrierLink {
        job_id: String,
        carrier_name: String,
        link: String,
        expires_at: Option<DateTime<Utc>>,
    },
    DeliverySubmitted {
        job_id: String,
        vin: String,
        carrier_name: Option<String>,
    },
}

impl OutboxPayload {
    pub fn kind(&self) -> OutboxKind {
        match self {
            OutboxPayload::SendCarrierLink { .. } => OutboxKind::SendCarrierLink,
            OutboxPayload::DeliverySubmitted { .. } => OutboxKind::DeliverySubmitted,
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            OutboxPayload::SendCarrierLink { job_id, .. }
            | OutboxPayload::DeliverySubmitted { job_id, .. } => job_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub invite_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: String,
    pub job_id: String,
    pub kind: OutboxKind,
    pub status: OutboxStatus,
    pub recipient: Recipient,
    pub payload: OutboxPayload,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}
