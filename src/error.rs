// Error taxonomy for escrow operations
// Business outcomes (invalid transition, blocked gate, bad token) are variants the
// caller acts on; storage and serialization failures are faults.

use serde::Serialize;
use thiserror::Error;

use crate::domain::{JobStatus, UnknownVariant};
use crate::gate::{EvidenceCounts, GateCode};

/// Why a presented capability token was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRejection {
    Invalid,
    Revoked,
    Expired,
}

impl std::fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenRejection::Invalid => write!(f, "invalid"),
            TokenRejection::Revoked => write!(f, "revoked"),
            TokenRejection::Expired => write!(f, "expired"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: JobStatus,
        to: JobStatus,
        allowed_from: Vec<JobStatus>,
    },

    #[error("blocked by evidence gate: {code}")]
    Blocked {
        code: GateCode,
        missing: Vec<String>,
        counts: EvidenceCounts,
    },

    #[error("unauthorized: carrier token {0}")]
    Unauthorized(TokenRejection),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payment provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    CorruptRecord(#[from] UnknownVariant),
}

/// Discriminant reported to transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidTransition,
    Blocked,
    Unauthorized,
    Forbidden,
    Conflict,
    ProviderError,
    Fault,
}

/// `{ok: false, kind, detail}` result suitable for any transport
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub ok: bool,
    pub kind: ErrorKind,
    pub message: String,
    pub detail: serde_json::Value,
}

impl EscrowError {
    pub fn not_found(entity: &'static str, id: &str) -> Self {
        EscrowError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EscrowError::Validation(_) => ErrorKind::Validation,
            EscrowError::NotFound { .. } => ErrorKind::NotFound,
            EscrowError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EscrowError::Blocked { .. } => ErrorKind::Blocked,
            EscrowError::Unauthorized(_) => ErrorKind::Unauthorized,
            EscrowError::Forbidden(_) => ErrorKind::Forbidden,
            EscrowError::Conflict(_) => ErrorKind::Conflict,
            EscrowError::Provider { .. } => ErrorKind::ProviderError,
            EscrowError::Storage(_)
            | EscrowError::Migration(_)
            | EscrowError::Serialization(_)
            | EscrowError::CorruptRecord(_) => ErrorKind::Fault,
        }
    }

    /// Faults propagate; everything else is an answer for the caller
    pub fn is_fault(&self) -> bool {
        self.kind() == ErrorKind::Fault
    }

    pub fn report(&self) -> FailureReport {
        let detail = match self {
            EscrowError::InvalidTransition {
                from,
                to,
                allowed_from,
            } => serde_json::json!({
                "from": from,
                "to": to,
                "allowed_from": allowed_from,
            }),
            EscrowError::Blocked {
                code,
                missing,
                counts,
            } => serde_json::json!({
                "code": code,
                "missing": missing,
                "counts": counts,
            }),
            EscrowError::Unauthorized(rejection) => serde_json::json!({ "token": rejection }),
            EscrowError::Provider { provider, message } => serde_json::json!({
                "provider": provider,
                "error": message,
            }),
            EscrowError::NotFound { entity, id } => serde_json::json!({
                "entity": entity,
                "id": id,
            }),
            _ => serde_json::Value::Null,
        };

        FailureReport {
            ok: false,
            kind: self.kind(),
            message: self.to_string(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_report_carries_allowed_from() {
        let err = EscrowError::InvalidTransition {
            from: JobStatus::Assigned,
            to: JobStatus::Released,
            allowed_from: vec![JobStatus::Releasable],
        };

        let report = err.report();
        assert!(!report.ok);
        assert_eq!(report.kind, ErrorKind::InvalidTransition);
        assert_eq!(report.detail["from"], "ASSIGNED");
        assert_eq!(report.detail["allowed_from"][0], "RELEASABLE");
    }

    #[test]
    fn test_storage_errors_are_faults() {
        let err = EscrowError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_fault());
        assert!(!EscrowError::Validation("bad".into()).is_fault());
    }
}
