// Unit tests for the transition table, command mapping and engine edge cases

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use super::*;
use crate::clock::ManualClock;
use crate::database::Store;
use crate::domain::{
    Actor, CarrierAssignment, GateOverrides, HoldStatus, JobIntake, JobStatus, PaymentRail,
};
use crate::error::EscrowError;
use crate::payments::{MockPaymentProvider, ProviderError, ReleaseReceipt};

fn admin() -> Actor {
    Actor::admin("ops-1")
}

fn relaxed_intake() -> JobIntake {
    JobIntake {
        vin: "1FTFW1ET5DFC10312".to_string(),
        pickup_address: "1 Port Rd".to_string(),
        dropoff_address: "2 Yard Ln".to_string(),
        price_cents: 90_000,
        delivery_deadline: None,
        rail: PaymentRail::Ach,
        gate: GateOverrides {
            require_pickup_photos: Some(false),
            require_delivery_photos: Some(false),
            require_vin: Some(false),
            require_pod: Some(false),
            ..GateOverrides::default()
        },
    }
}

async fn engine_with(provider: MockPaymentProvider) -> EscrowEngine {
    let store = Store::in_memory().await.unwrap();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()));
    EscrowEngine::new(store, EngineSettings::default(), Arc::new(provider), clock)
}

async fn releasable_job(engine: &EscrowEngine) -> String {
    let job = engine.jobs().intake(&admin(), relaxed_intake()).await.unwrap();
    engine
        .assign(&job.id, &admin(), CarrierAssignment::named("Ridgeline Haul"))
        .await
        .unwrap();
    engine.accept(&job.id, &admin(), None).await.unwrap();
    engine.confirm_pickup(&job.id, &admin(), None).await.unwrap();
    engine.submit_delivery(&job.id, &admin(), None).await.unwrap();
    engine.approve(&job.id, &admin(), None).await.unwrap();
    job.id
}

#[test]
fn test_default_table_matches_lifecycle() {
    let table = TransitionTable::default();

    assert!(table.permits(JobStatus::Draft, JobStatus::Assigned));
    assert!(table.permits(JobStatus::Released, JobStatus::Disputed));
    assert!(!table.permits(JobStatus::Draft, JobStatus::Disputed));
    assert!(!table.permits(JobStatus::Released, JobStatus::Cancelled));
    assert!(table.allowed_from(JobStatus::Draft).is_empty());

    for terminal in [JobStatus::Cancelled, JobStatus::Disputed] {
        assert!(table.targets_from(terminal).is_empty(), "{} should be terminal", terminal);
    }
}

#[test]
fn test_injected_table_replaces_defaults() {
    let table = TransitionTable::new([(JobStatus::Cancelled, vec![JobStatus::Draft])]);
    assert!(table.permits(JobStatus::Draft, JobStatus::Cancelled));
    assert!(!table.permits(JobStatus::Assigned, JobStatus::Cancelled));
    assert!(table.allowed_from(JobStatus::Assigned).is_empty());
}

#[test]
fn test_conflict_resolution() {
    let allowed = [JobStatus::DeliverySubmitted];
    let target = JobStatus::Releasable;

    assert_eq!(
        resolve_after_conflict(JobStatus::Releasable, target, &allowed, false),
        ConflictResolution::Already
    );
    assert_eq!(
        resolve_after_conflict(JobStatus::DeliverySubmitted, target, &allowed, false),
        ConflictResolution::Retry
    );
    assert_eq!(
        resolve_after_conflict(JobStatus::DeliverySubmitted, target, &allowed, true),
        ConflictResolution::Invalid
    );
    assert_eq!(
        resolve_after_conflict(JobStatus::Disputed, target, &allowed, false),
        ConflictResolution::Invalid
    );
}

#[test]
fn test_command_reasons() {
    let assign = JobCommand::Assign(CarrierAssignment::named("  Ridgeline Haul "));
    assert_eq!(assign.supplied_reason(), None);
    assert_eq!(assign.log_reason().as_deref(), Some("carrier=Ridgeline Haul"));

    let approve = JobCommand::Approve {
        note: Some("   ".to_string()),
    };
    assert_eq!(approve.supplied_reason(), None);

    let dispute = JobCommand::Dispute {
        reason: " scratched door ".to_string(),
    };
    assert_eq!(dispute.supplied_reason(), Some("scratched door"));
    assert_eq!(dispute.target(), JobStatus::Disputed);
}

#[test]
fn test_command_validation() {
    assert!(JobCommand::Assign(CarrierAssignment::named(" ")).validate().is_err());
    assert!(JobCommand::Cancel {
        reason: String::new()
    }
    .validate()
    .is_err());

    let mut carrier = CarrierAssignment::named("Ridgeline Haul");
    carrier.email = Some("dispatch.ridgeline.example".to_string());
    assert!(matches!(
        JobCommand::Assign(carrier).validate(),
        Err(EscrowError::Validation(_))
    ));
}

#[tokio::test]
async fn test_provider_failure_reverts_hold() {
    let mut provider = MockPaymentProvider::new();
    provider.expect_name().return_const("mockpay");
    provider
        .expect_release()
        .times(1)
        .returning(|_| Err(ProviderError::Unavailable("gateway timeout".to_string())));

    let engine = engine_with(provider).await;
    let job_id = releasable_job(&engine).await;

    let err = engine.release(&job_id, &admin(), None).await.unwrap_err();
    assert!(matches!(err, EscrowError::Provider { ref provider, .. } if provider == "mockpay"));

    let job = engine.jobs().get(&job_id).await.unwrap();
    let hold = engine.jobs().hold(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Releasable);
    assert_eq!(hold.status, HoldStatus::Releasable);
    assert_eq!(engine.metrics().get_stats().provider_failures, 1);
}

#[tokio::test]
async fn test_release_sends_deterministic_key() {
    let mut provider = MockPaymentProvider::new();
    provider.expect_name().return_const("mockpay");
    provider
        .expect_release()
        .withf(|request| {
            request.idempotency_key == format!("release:{}:{}", request.job_id, request.hold_id)
                && request.amount_cents == 90_000
        })
        .times(1)
        .returning(|request| {
            Ok(ReleaseReceipt {
                provider_ref: "tr_1".to_string(),
                idempotency_key: request.idempotency_key.clone(),
            })
        });

    let engine = engine_with(provider).await;
    let job_id = releasable_job(&engine).await;

    let outcome = engine.release(&job_id, &admin(), None).await.unwrap();
    assert_eq!(outcome.status, JobStatus::Released);
    assert_eq!(outcome.hold_status, Some(HoldStatus::Released));

    // Replay never reaches the provider again
    let replay = engine.release(&job_id, &admin(), None).await.unwrap();
    assert!(replay.already);
    let receipt = replay.receipt.unwrap();
    assert_eq!(receipt.provider_ref.as_deref(), Some("tr_1"));
    assert_eq!(receipt.provider, "mockpay");
}

#[tokio::test]
async fn test_release_requires_releasable_job() {
    let mut provider = MockPaymentProvider::new();
    provider.expect_name().return_const("mockpay");
    provider.expect_release().never();

    let engine = engine_with(provider).await;
    let job = engine.jobs().intake(&admin(), relaxed_intake()).await.unwrap();

    let err = engine.release(&job.id, &admin(), None).await.unwrap_err();
    match err {
        EscrowError::InvalidTransition {
            from,
            to,
            allowed_from,
        } => {
            assert_eq!(from, JobStatus::Draft);
            assert_eq!(to, JobStatus::Released);
            assert_eq!(allowed_from, vec![JobStatus::Releasable]);
        }
        other => panic!("expected invalid transition, got {:?}", other),
    }
}
