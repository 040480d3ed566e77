// Evidence gate: decides whether submitted proof satisfies a job's requirements

pub mod evaluator;
pub mod phase;
pub mod types;

pub use evaluator::{evaluate, Check, FULL_GATE};
pub use phase::Phase;
pub use types::{EvidenceCounts, GateCode, GateEvaluation};

#[cfg(test)]
mod tests;
