// Phase evaluators gating pickup and delivery transitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::evaluator::{run_checks, Check, FULL_GATE};
use super::types::GateEvaluation;
use crate::domain::{EvidenceItem, GateConfig, Job};

const PICKUP_CHECKS: &[Check] = &[Check::Deadline, Check::PickupPhotos, Check::Vin];
const DELIVERY_CHECKS: &[Check] = &[Check::DeliveryPhotos, Check::Vin, Check::ProofOfDelivery];

/// Which subset of the gate a transition requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pickup,
    Delivery,
    /// Every check; required for releasable
    Full,
}

impl Phase {
    pub fn checks(&self) -> &'static [Check] {
        match self {
            Phase::Pickup => PICKUP_CHECKS,
            Phase::Delivery => DELIVERY_CHECKS,
            Phase::Full => FULL_GATE,
        }
    }

    pub fn evaluate(
        &self,
        job: &Job,
        gate: &GateConfig,
        evidence: &[EvidenceItem],
        now: DateTime<Utc>,
    ) -> GateEvaluation {
        run_checks(self.checks(), job, gate, evidence, now)
    }
}
