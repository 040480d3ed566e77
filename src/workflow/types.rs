// Commands, outcomes and settings for the transition engine

use serde::Serialize;

use super::authorization::Operation;
use super::state_machine::TransitionTable;
use crate::config::HaulgateConfig;
use crate::domain::{CarrierAssignment, DecisionAction, GateConfig, HoldStatus, JobStatus};
use crate::error::EscrowError;
use crate::gate::{GateEvaluation, Phase};
use crate::invites::{InviteSettings, IssuedInvite};
use crate::outbox::OutboxSettings;

/// Requested job transitions, except release which has its own protocol
#[derive(Debug, Clone, PartialEq)]
pub enum JobCommand {
    Assign(CarrierAssignment),
    Accept { note: Option<String> },
    ConfirmPickup { note: Option<String> },
    SubmitDelivery { note: Option<String> },
    Approve { note: Option<String> },
    Dispute { reason: String },
    Cancel { reason: String },
}

impl JobCommand {
    pub fn target(&self) -> JobStatus {
        match self {
            JobCommand::Assign(_) => JobStatus::Assigned,
            JobCommand::Accept { .. } => JobStatus::Accepted,
            JobCommand::ConfirmPickup { .. } => JobStatus::PickupConfirmed,
            JobCommand::SubmitDelivery { .. } => JobStatus::DeliverySubmitted,
            JobCommand::Approve { .. } => JobStatus::Releasable,
            JobCommand::Dispute { .. } => JobStatus::Disputed,
            JobCommand::Cancel { .. } => JobStatus::Cancelled,
        }
    }

    pub fn action(&self) -> DecisionAction {
        match self {
            JobCommand::Assign(_) => DecisionAction::Assign,
            JobCommand::Accept { .. } => DecisionAction::Accept,
            JobCommand::ConfirmPickup { .. } => DecisionAction::PickupConfirm,
            JobCommand::SubmitDelivery { .. } => DecisionAction::DeliverySubmit,
            JobCommand::Approve { .. } => DecisionAction::Approve,
            JobCommand::Dispute { .. } => DecisionAction::Dispute,
            JobCommand::Cancel { .. } => DecisionAction::Cancel,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            JobCommand::Assign(_) => Operation::Assign,
            JobCommand::Accept { .. } => Operation::Accept,
            JobCommand::ConfirmPickup { .. } => Operation::ConfirmPickup,
            JobCommand::SubmitDelivery { .. } => Operation::SubmitDelivery,
            JobCommand::Approve { .. } => Operation::Approve,
            JobCommand::Dispute { .. } => Operation::Dispute,
            JobCommand::Cancel { .. } => Operation::Cancel,
        }
    }

    /// Evidence gate the transition must pass, if any
    pub fn phase(&self) -> Option<Phase> {
        match self {
            JobCommand::ConfirmPickup { .. } => Some(Phase::Pickup),
            JobCommand::SubmitDelivery { .. } => Some(Phase::Delivery),
            JobCommand::Approve { .. } => Some(Phase::Full),
            _ => None,
        }
    }

    /// Caller-supplied text, compared against the last entry on replay
    pub fn supplied_reason(&self) -> Option<&str> {
        match self {
            JobCommand::Assign(_) => None,
            JobCommand::Accept { note }
            | JobCommand::ConfirmPickup { note }
            | JobCommand::SubmitDelivery { note }
            | JobCommand::Approve { note } => note.as_deref().map(str::trim).filter(|n| !n.is_empty()),
            JobCommand::Dispute { reason } | JobCommand::Cancel { reason } => Some(reason.trim()),
        }
    }

    /// Reason recorded when the transition applies
    pub fn log_reason(&self) -> Option<String> {
        match self {
            JobCommand::Assign(carrier) => Some(format!("carrier={}", carrier.name.trim())),
            _ => self.supplied_reason().map(str::to_string),
        }
    }

    pub fn validate(&self) -> Result<(), EscrowError> {
        match self {
            JobCommand::Assign(carrier) => {
                if carrier.name.trim().is_empty() {
                    return Err(EscrowError::Validation("carrier name is required".to_string()));
                }
                if let Some(email) = &carrier.email {
                    if !email.contains('@') {
                        return Err(EscrowError::Validation(format!(
                            "carrier email '{}' is not an address",
                            email
                        )));
                    }
                }
                Ok(())
            }
            JobCommand::Dispute { reason } if reason.trim().is_empty() => Err(
                EscrowError::Validation("a dispute reason is required".to_string()),
            ),
            JobCommand::Cancel { reason } if reason.trim().is_empty() => Err(
                EscrowError::Validation("a cancellation reason is required".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Provider details echoed back for a released hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoldReceipt {
    pub hold_id: String,
    pub provider: String,
    pub provider_ref: Option<String>,
    pub idempotency_key: Option<String>,
}

/// `{ok: true, ...}` result of a transition
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub ok: bool,
    pub job_id: String,
    pub status: JobStatus,
    pub previous_status: JobStatus,
    /// The job was already in the target status; nothing changed
    pub already: bool,
    pub warning: Option<String>,
    pub evaluation: Option<GateEvaluation>,
    pub hold_status: Option<HoldStatus>,
    pub auto_approved: bool,
    pub invite: Option<IssuedInvite>,
    pub outbox_id: Option<String>,
    pub receipt: Option<HoldReceipt>,
}

impl TransitionOutcome {
    pub(crate) fn applied(job_id: &str, previous: JobStatus, status: JobStatus) -> Self {
        Self {
            ok: true,
            job_id: job_id.to_string(),
            status,
            previous_status: previous,
            already: false,
            warning: None,
            evaluation: None,
            hold_status: None,
            auto_approved: false,
            invite: None,
            outbox_id: None,
            receipt: None,
        }
    }

    pub(crate) fn already(job_id: &str, status: JobStatus) -> Self {
        Self {
            already: true,
            ..Self::applied(job_id, status, status)
        }
    }
}

/// Result for one hold visited by reconciliation
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileEntry {
    pub job_id: String,
    pub hold_id: String,
    pub settled: bool,
    pub status: Option<JobStatus>,
    pub error: Option<String>,
}

/// Immutable configuration injected into the engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub transitions: TransitionTable,
    pub gate_defaults: GateConfig,
    pub invites: InviteSettings,
    pub outbox: OutboxSettings,
}

impl EngineSettings {
    pub fn from_config(config: &HaulgateConfig) -> Self {
        Self {
            transitions: TransitionTable::default(),
            gate_defaults: config.gate.clone(),
            invites: InviteSettings::from_config(&config.invites),
            outbox: OutboxSettings::from_config(&config.outbox),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&HaulgateConfig::default())
    }
}
