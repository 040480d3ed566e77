// Unit tests for the gate evaluator and phase evaluators

use chrono::{Duration, TimeZone, Utc};

use super::*;
use crate::domain::{EvidenceItem, EvidenceType, GateConfig, Job, JobStatus};

fn test_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
}

fn test_job() -> Job {
    Job {
        id: "job-1".to_string(),
        vin: "1HGCM82633A004352".to_string(),
        pickup_address: "12 Dock St".to_string(),
        dropoff_address: "98 Lot Ave".to_string(),
        price_cents: 125_000,
        delivery_deadline: None,
        carrier_name: None,
        carrier_email: None,
        carrier_phone: None,
        status: JobStatus::DeliverySubmitted,
        created_at: test_now(),
        updated_at: test_now(),
    }
}

fn item(evidence_type: EvidenceType, value: Option<&str>) -> EvidenceItem {
    EvidenceItem {
        id: format!("ev-{}", evidence_type),
        job_id: "job-1".to_string(),
        evidence_type,
        storage_key: if evidence_type.is_photo() {
            Some("objects/key".to_string())
        } else {
            None
        },
        value: value.map(str::to_string),
        submitted_by: "carrier_link:inv-1".to_string(),
        gps: None,
        created_at: test_now(),
        redacted_at: None,
        redacted_by: None,
        redact_reason: None,
    }
}

fn photos(evidence_type: EvidenceType, n: usize) -> Vec<EvidenceItem> {
    (0..n).map(|_| item(evidence_type, None)).collect()
}

fn complete_evidence() -> Vec<EvidenceItem> {
    let mut evidence = photos(EvidenceType::PickupPhoto, 4);
    evidence.extend(photos(EvidenceType::DeliveryPhoto, 4));
    evidence.push(item(EvidenceType::VinPhoto, None));
    evidence
}

#[test]
fn test_complete_evidence_passes_default_gate() {
    let result = evaluate(&test_job(), &GateConfig::default(), &complete_evidence(), test_now());

    assert!(result.pass);
    assert_eq!(result.code, GateCode::Pass);
    assert!(result.missing.is_empty());
    assert_eq!(result.counts.get(EvidenceType::PickupPhoto), 4);
    assert_eq!(result.counts.get(EvidenceType::Pod), 0);
}

#[test]
fn test_missing_pickup_reports_shortfall() {
    let result = evaluate(&test_job(), &GateConfig::default(), &[], test_now());

    assert!(!result.pass);
    assert_eq!(result.code, GateCode::BlockedMissingPickup);
    assert_eq!(result.missing, vec!["pickup_photo(4 more)".to_string()]);
}

#[test]
fn test_first_failure_wins() {
    // Deadline and every evidence check fail; only the deadline is reported
    let mut job = test_job();
    job.delivery_deadline = Some(test_now() - Duration::hours(1));
    let gate = GateConfig {
        require_pod: true,
        ..GateConfig::default()
    };

    let result = evaluate(&job, &gate, &[], test_now());

    assert_eq!(result.code, GateCode::DeadlineMissed);
    assert_eq!(result.missing, vec!["delivery_deadline_missed".to_string()]);
}

#[test]
fn test_deadline_in_future_does_not_block() {
    let mut job = test_job();
    job.delivery_deadline = Some(test_now() + Duration::hours(1));

    let result = evaluate(&job, &GateConfig::default(), &complete_evidence(), test_now());
    assert!(result.pass);
}

#[test]
fn test_delivery_shortfall_after_pickup_satisfied() {
    let mut evidence = photos(EvidenceType::PickupPhoto, 4);
    evidence.extend(photos(EvidenceType::DeliveryPhoto, 1));

    let result = evaluate(&test_job(), &GateConfig::default(), &evidence, test_now());

    assert_eq!(result.code, GateCode::BlockedMissingDelivery);
    assert_eq!(result.missing, vec!["delivery_photo(3 more)".to_string()]);
}

#[test]
fn test_missing_vin() {
    let mut evidence = photos(EvidenceType::PickupPhoto, 4);
    evidence.extend(photos(EvidenceType::DeliveryPhoto, 4));

    let result = evaluate(&test_job(), &GateConfig::default(), &evidence, test_now());

    assert_eq!(result.code, GateCode::BlockedMissingVin);
    assert_eq!(result.missing, vec!["vin_photo(1 required)".to_string()]);
}

#[test]
fn test_vin_scan_must_match_trimmed() {
    let mut evidence = photos(EvidenceType::PickupPhoto, 4);
    evidence.extend(photos(EvidenceType::DeliveryPhoto, 4));
    evidence.push(item(EvidenceType::VinScan, Some("WRONGVIN000000000")));

    let result = evaluate(&test_job(), &GateConfig::default(), &evidence, test_now());
    assert_eq!(result.code, GateCode::BlockedVinMismatch);

    evidence.push(item(EvidenceType::VinScan, Some("  1HGCM82633A004352 ")));
    let result = evaluate(&test_job(), &GateConfig::default(), &evidence, test_now());
    assert!(result.pass);
}

#[test]
fn test_vin_scan_comparison_is_case_sensitive() {
    let mut evidence = photos(EvidenceType::PickupPhoto, 4);
    evidence.extend(photos(EvidenceType::DeliveryPhoto, 4));
    evidence.push(item(EvidenceType::VinScan, Some("1hgcm82633a004352")));

    let result = evaluate(&test_job(), &GateConfig::default(), &evidence, test_now());
    assert_eq!(result.code, GateCode::BlockedVinMismatch);
}

#[test]
fn test_pod_only_when_required() {
    let gate = GateConfig {
        require_pod: true,
        ..GateConfig::default()
    };

    let result = evaluate(&test_job(), &gate, &complete_evidence(), test_now());
    assert_eq!(result.code, GateCode::BlockedMissingPod);
    assert_eq!(result.missing, vec!["pod(1 required)".to_string()]);

    let mut evidence = complete_evidence();
    evidence.push(item(EvidenceType::Pod, Some("Signed: R. Ortiz")));
    assert!(evaluate(&test_job(), &gate, &evidence, test_now()).pass);
}

#[test]
fn test_disabled_checks_are_skipped() {
    let gate = GateConfig {
        require_pickup_photos: false,
        require_delivery_photos: false,
        require_vin: false,
        ..GateConfig::default()
    };

    assert!(evaluate(&test_job(), &gate, &[], test_now()).pass);
}

#[test]
fn test_pickup_phase_ignores_delivery_requirements() {
    let mut evidence = photos(EvidenceType::PickupPhoto, 4);
    evidence.push(item(EvidenceType::VinPhoto, None));

    let gate = GateConfig {
        require_pod: true,
        ..GateConfig::default()
    };
    let result = Phase::Pickup.evaluate(&test_job(), &gate, &evidence, test_now());

    assert!(result.pass);
}

#[test]
fn test_delivery_phase_ignores_pickup_and_deadline() {
    let mut job = test_job();
    job.delivery_deadline = Some(test_now() - Duration::days(2));

    let mut evidence = photos(EvidenceType::DeliveryPhoto, 4);
    evidence.push(item(EvidenceType::VinPhoto, None));

    let result = Phase::Delivery.evaluate(&job, &GateConfig::default(), &evidence, test_now());
    assert!(result.pass);

    let result = Phase::Full.evaluate(&job, &GateConfig::default(), &evidence, test_now());
    assert_eq!(result.code, GateCode::DeadlineMissed);
}

#[test]
fn test_delivery_phase_requires_pod_when_configured() {
    let gate = GateConfig {
        require_pod: true,
        ..GateConfig::default()
    };
    let mut evidence = photos(EvidenceType::DeliveryPhoto, 4);
    evidence.push(item(EvidenceType::VinPhoto, None));

    let result = Phase::Delivery.evaluate(&test_job(), &gate, &evidence, test_now());
    assert_eq!(result.code, GateCode::BlockedMissingPod);
}

#[test]
fn test_counts_include_every_type() {
    let evidence = vec![
        item(EvidenceType::Note, Some("scratch on door")),
        item(EvidenceType::Note, Some("tire low")),
    ];
    let result = evaluate(&test_job(), &GateConfig::default(), &evidence, test_now());

    assert_eq!(result.counts.iter().count(), EvidenceType::ALL.len());
    assert_eq!(result.counts.get(EvidenceType::Note), 2);
    assert_eq!(result.counts.total(), 2);
}
