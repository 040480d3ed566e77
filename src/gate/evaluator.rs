// Gate Evaluator - pure, ordered, first failure wins

use chrono::{DateTime, Utc};

use super::types::{EvidenceCounts, GateCode, GateEvaluation};
use crate::domain::{EvidenceItem, EvidenceType, GateConfig, Job};

/// Individual gate checks, declared in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Deadline,
    PickupPhotos,
    DeliveryPhotos,
    Vin,
    ProofOfDelivery,
}

/// The full gate, required before a job becomes releasable
pub const FULL_GATE: &[Check] = &[
    Check::Deadline,
    Check::PickupPhotos,
    Check::DeliveryPhotos,
    Check::Vin,
    Check::ProofOfDelivery,
];

/// Evaluate the full gate.
///
/// `evidence` is taken as given; callers exclude redacted items.
pub fn evaluate(
    job: &Job,
    gate: &GateConfig,
    evidence: &[EvidenceItem],
    now: DateTime<Utc>,
) -> GateEvaluation {
    run_checks(FULL_GATE, job, gate, evidence, now)
}

pub(crate) fn run_checks(
    checks: &[Check],
    job: &Job,
    gate: &GateConfig,
    evidence: &[EvidenceItem],
    now: DateTime<Utc>,
) -> GateEvaluation {
    let counts = EvidenceCounts::tally(evidence);

    for check in checks {
        if let Some((code, missing)) = failure(*check, job, gate, evidence, &counts, now) {
            return GateEvaluation::blocked(code, missing, counts, now);
        }
    }

    GateEvaluation::passed(counts, now)
}

fn failure(
    check: Check,
    job: &Job,
    gate: &GateConfig,
    evidence: &[EvidenceItem],
    counts: &EvidenceCounts,
    now: DateTime<Utc>,
) -> Option<(GateCode, String)> {
    match check {
        Check::Deadline => match job.delivery_deadline {
            Some(deadline) if now > deadline => Some((
                GateCode::DeadlineMissed,
                "delivery_deadline_missed".to_string(),
            )),
            _ => None,
        },
        Check::PickupPhotos if gate.require_pickup_photos => shortfall(
            EvidenceType::PickupPhoto,
            gate.min_pickup_photos,
            counts,
        )
        .map(|missing| (GateCode::BlockedMissingPickup, missing)),
        Check::DeliveryPhotos if gate.require_delivery_photos => shortfall(
            EvidenceType::DeliveryPhoto,
            gate.min_delivery_photos,
            counts,
        )
        .map(|missing| (GateCode::BlockedMissingDelivery, missing)),
        Check::Vin if gate.require_vin => vin_failure(job, evidence, counts),
        Check::ProofOfDelivery if gate.require_pod => {
            if counts.get(EvidenceType::Pod) == 0 {
                Some((GateCode::BlockedMissingPod, "pod(1 required)".to_string()))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn shortfall(evidence_type: EvidenceType, minimum: u32, counts: &EvidenceCounts) -> Option<String> {
    let have = counts.get(evidence_type);
    if have >= minimum {
        return None;
    }
    Some(format!("{}({} more)", evidence_type, minimum - have))
}

/// VIN evidence is a photo or a scan. Scans, when present, must match the job VIN.
fn vin_failure(
    job: &Job,
    evidence: &[EvidenceItem],
    counts: &EvidenceCounts,
) -> Option<(GateCode, String)> {
    let photos = counts.get(EvidenceType::VinPhoto);
    let scans: Vec<&str> = evidence
        .iter()
        .filter(|item| item.evidence_type == EvidenceType::VinScan)
        .filter_map(|item| item.value.as_deref())
        .collect();

    if photos == 0 && scans.is_empty() {
        return Some((
            GateCode::BlockedMissingVin,
            "vin_photo(1 required)".to_string(),
        ));
    }

    let expected = job.vin.trim();
    if !scans.is_empty() && !scans.iter().any(|scan| scan.trim() == expected) {
        return Some((
            GateCode::BlockedVinMismatch,
            "vin_scan(must match job.vin)".to_string(),
        ));
    }

    None
}
