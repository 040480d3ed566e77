// Haulgate Library - escrow workflow engine for vehicle transport jobs
// Evidence gates, payment holds, carrier links, notification outbox and the decision log

pub mod clock;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod gate;
pub mod invites;
pub mod jobs;
pub mod ledger;
pub mod observability;
pub mod outbox;
pub mod payments;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{config, init_config, HaulgateConfig};
pub use database::Store;
pub use domain::{
    Actor, ApprovalMode, CarrierAssignment, DecisionAction, DecisionLogEntry, DecisionSnapshot,
    EvidenceItem, EvidenceSubmission, EvidenceType, GateConfig, GateOverrides, HoldStatus, Job,
    JobIntake, JobStatus, PaymentHold, PaymentRail, Role,
};
pub use error::{ErrorKind, EscrowError, FailureReport, TokenRejection};
pub use gate::{evaluate, EvidenceCounts, GateCode, GateEvaluation, Phase};
pub use invites::{CarrierInvites, IssuedInvite, VerifiedInvite};
pub use jobs::{JobReview, Jobs, ReviewState};
pub use ledger::{DecisionLog, EvidenceLedger, ObjectStore};
pub use observability::{EngineMetrics, EngineStats, OperationTimer};
pub use outbox::{DrainReport, FailureDisposition, Outbox};
pub use payments::{NoopProvider, PaymentProvider, ProviderError, ReleaseReceipt, ReleaseRequest};
pub use telemetry::{create_operation_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use workflow::{
    EngineSettings, EscrowEngine, JobCommand, ReconcileEntry, TransitionOutcome, TransitionTable,
};
