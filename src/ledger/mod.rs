// Append-only records: evidence items and the decision log

pub mod decision_log;
pub mod evidence;

pub use decision_log::DecisionLog;
pub use evidence::{EvidenceLedger, ObjectStore, RedactionReceipt, SubmissionReceipt};

#[cfg(any(test, feature = "testing"))]
pub use evidence::MockObjectStore;
