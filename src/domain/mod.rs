// Domain types shared by the escrow engine
// Jobs, gate configuration, evidence, holds, decisions, outbox messages and actors

/// Implements `as_str`, `Display` and `FromStr` for a closed string-coded enum.
macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::domain::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::domain::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use string_enum;

pub mod actor;
pub mod decision;
pub mod evidence;
pub mod gate_config;
pub mod hold;
pub mod job;
pub mod outbox;

pub use actor::{Actor, Role};
pub use decision::{
    DecisionAction, DecisionLogEntry, DecisionSnapshot, DisputeSnapshot, EvidenceUploadSnapshot,
    InviteSnapshot, NewDecision, NotificationSnapshot, RedactionSnapshot, ReleaseSnapshot,
};
pub use evidence::{EvidenceItem, EvidenceSubmission, EvidenceType, GeoPoint};
pub use gate_config::{ApprovalMode, GateConfig, GateOverrides};
pub use hold::{HoldStatus, PaymentHold, PaymentRail};
pub use job::{CarrierAssignment, Job, JobIntake, JobStatus};
pub use outbox::{OutboxKind, OutboxMessage, OutboxPayload, OutboxStatus, Recipient};

use thiserror::Error;

/// A stored or supplied string did not name a known variant
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
