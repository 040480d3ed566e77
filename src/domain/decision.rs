// Decision log entries: the system of record for what happened and why

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{string_enum, EvidenceType, HoldStatus, JobStatus, OutboxKind, OutboxPayload, PaymentRail};
use crate::gate::GateEvaluation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Assign,
    Accept,
    PickupConfirm,
    DeliverySubmit,
    Approve,
    Release,
    Dispute,
    Cancel,
    Evaluate,
    EvidenceUpload,
    RedactEvidence,
    NotificationSent,
    InviteIssued,
    InviteRevoked,
}

string_enum!(DecisionAction, "decision action", {
    Assign => "assign",
    Accept => "accept",
    PickupConfirm => "pickup_confirm",
    DeliverySubmit => "delivery_submit",
    Approve => "approve",
    Release => "release",
    Dispute => "dispute",
    Cancel => "cancel",
    Evaluate => "evaluate",
    EvidenceUpload => "evidence_upload",
    RedactEvidence => "redact_evidence",
    NotificationSent => "notification_sent",
    InviteIssued => "invite_issued",
    InviteRevoked => "invite_revoked",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSnapshot {
    /// Gate result captured when the job was approved
    pub approval: Option<GateEvaluation>,
    pub hold_id: String,
    pub amount_cents: i64,
    pub rail: PaymentRail,
    pub provider: String,
    pub provider_ref: String,
    pub idempotency_key: String,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeSnapshot {
    pub previous_status: JobStatus,
    pub hold_before: HoldStatus,
    pub hold_after: HoldStatus,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceUploadSnapshot {
    pub inserted: Vec<String>,
    pub skipped: usize,
    pub issue: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionSnapshot {
    pub evidence_id: String,
    pub evidence_type: EvidenceType,
    pub storage_key: Option<String>,
    pub delete_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSnapshot {
    pub outbox_id: String,
    pub message_type: OutboxKind,
    pub invite_id: Option<String>,
    pub to_email: Option<String>,
    pub to_phone: Option<String>,
    pub payload: OutboxPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteSnapshot {
    pub invite_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Structured payload stored with a log entry, one shape per kind of decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionSnapshot {
    None,
    Gate(GateEvaluation),
    Release(ReleaseSnapshot),
    Dispute(DisputeSnapshot),
    EvidenceUpload(EvidenceUploadSnapshot),
    Redaction(RedactionSnapshot),
    Notification(NotificationSnapshot),
    Invite(InviteSnapshot),
}

impl DecisionSnapshot {
    pub fn gate(&self) -> Option<&GateEvaluation> {
        match self {
            DecisionSnapshot::Gate(evaluation) => Some(evaluation),
            DecisionSnapshot::Release(release) => release.approval.as_ref(),
            _ => None,
        }
    }
}

/// An entry about to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewDecision {
    pub job_id: String,
    pub action: DecisionAction,
    pub actor: String,
    pub reason: Option<String>,
    pub snapshot: DecisionSnapshot,
}

impl NewDecision {
    pub fn new(job_id: &str, action: DecisionAction, actor: String) -> Self {
        Self {
            job_id: job_id.to_string(),
            action,
            actor,
            reason: None,
            snapshot: DecisionSnapshot::None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn snapshot(mut self, snapshot: DecisionSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    /// Total order across the log
    pub seq: i64,
    pub id: String,
    pub job_id: String,
    pub action: DecisionAction,
    pub actor: String,
    pub reason: Option<String>,
    pub snapshot: DecisionSnapshot,
    pub created_at: DateTime<Utc>,
}
