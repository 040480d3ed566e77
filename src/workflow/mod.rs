// Workflow engine: guarded job transitions, escrow release and authorization
// Every status change goes through one unit of work with a compare-and-swap write.

pub mod authorization;
pub mod executor;
pub mod release;
pub mod state_machine;
pub mod types;

pub use authorization::{authorize, Operation};
pub use executor::EscrowEngine;
pub use state_machine::{resolve_after_conflict, ConflictResolution, TransitionTable};
pub use types::{EngineSettings, HoldReceipt, JobCommand, ReconcileEntry, TransitionOutcome};

#[cfg(test)]
mod tests;
