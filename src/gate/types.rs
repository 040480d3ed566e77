// Gate evaluation results

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{string_enum, EvidenceItem, EvidenceType};

/// Outcome code; on failure it names the first unmet check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateCode {
    Pass,
    DeadlineMissed,
    BlockedMissingPickup,
    BlockedMissingDelivery,
    BlockedMissingVin,
    BlockedVinMismatch,
    BlockedMissingPod,
}

string_enum!(GateCode, "gate code", {
    Pass => "PASS",
    DeadlineMissed => "DEADLINE_MISSED",
    BlockedMissingPickup => "BLOCKED_MISSING_PICKUP",
    BlockedMissingDelivery => "BLOCKED_MISSING_DELIVERY",
    BlockedMissingVin => "BLOCKED_MISSING_VIN",
    BlockedVinMismatch => "BLOCKED_VIN_MISMATCH",
    BlockedMissingPod => "BLOCKED_MISSING_POD",
});

/// Evidence counts keyed by type. Every type has an entry, zero included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceCounts(BTreeMap<EvidenceType, u32>);

impl EvidenceCounts {
    pub fn tally(evidence: &[EvidenceItem]) -> Self {
        let mut counts: BTreeMap<EvidenceType, u32> =
            EvidenceType::ALL.iter().map(|t| (*t, 0)).collect();
        for item in evidence {
            *counts.entry(item.evidence_type).or_insert(0) += 1;
        }
        Self(counts)
    }

    pub fn get(&self, evidence_type: EvidenceType) -> u32 {
        self.0.get(&evidence_type).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EvidenceType, u32)> + '_ {
        self.0.iter().map(|(t, n)| (*t, *n))
    }
}

impl Default for EvidenceCounts {
    fn default() -> Self {
        Self::tally(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateEvaluation {
    pub pass: bool,
    pub code: GateCode,
    pub missing: Vec<String>,
    pub counts: EvidenceCounts,
    pub evaluated_at: DateTime<Utc>,
}

impl GateEvaluation {
    pub fn passed(counts: EvidenceCounts, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            pass: true,
            code: GateCode::Pass,
            missing: Vec::new(),
            counts,
            evaluated_at,
        }
    }

    pub fn blocked(
        code: GateCode,
        missing: String,
        counts: EvidenceCounts,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            pass: false,
            code,
            missing: vec![missing],
            counts,
            evaluated_at,
        }
    }
}
