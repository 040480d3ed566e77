//! Tests against a file-backed SQLite store

mod common;

use std::sync::Arc;

use common::*;
use tempfile::TempDir;

use haulgate::config::DatabaseConfig;
use haulgate::{
    DecisionAction, EngineSettings, EscrowEngine, HoldStatus, JobIntake, JobStatus, ManualClock,
    PaymentRail, Store,
};

fn file_settings(dir: &TempDir) -> DatabaseConfig {
    DatabaseConfig {
        url: format!("sqlite://{}/haulgate.db", dir.path().display()),
        max_connections: 4,
        auto_migrate: true,
        ..DatabaseConfig::default()
    }
}

fn intake() -> JobIntake {
    JobIntake {
        vin: VIN.to_string(),
        pickup_address: "9 Dock Rd, Oakland".to_string(),
        dropoff_address: "221 Pine St, Boise".to_string(),
        price_cents: 92_500,
        delivery_deadline: None,
        rail: PaymentRail::Ach,
        gate: Default::default(),
    }
}

fn engine(store: &Store) -> EscrowEngine {
    EscrowEngine::new(
        store.clone(),
        EngineSettings::default(),
        Arc::new(RecordingProvider::default()),
        Arc::new(ManualClock::new(start_time())),
    )
}

#[tokio::test]
async fn test_jobs_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let settings = file_settings(&dir);

    let job_id = {
        let store = Store::connect(&settings).await.unwrap();
        let engine = engine(&store);
        let job = engine.jobs().intake(&shipper(), intake()).await.unwrap();
        engine.assign(&job.id, &shipper(), acme()).await.unwrap();
        store.close().await;
        job.id
    };

    let store = Store::connect(&settings).await.unwrap();
    let engine = engine(&store);
    let job = engine.jobs().get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Assigned);
    assert_eq!(job.price_cents, 92_500);
    assert_eq!(engine.jobs().hold(&job_id).await.unwrap().status, HoldStatus::Held);
    assert_eq!(
        engine.decisions().count(&job_id, DecisionAction::Assign).await.unwrap(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_accepts_record_one_transition() {
    let dir = TempDir::new().unwrap();
    let settings = DatabaseConfig {
        max_connections: 8,
        ..file_settings(&dir)
    };
    let store = Store::connect(&settings).await.unwrap();
    let engine = Arc::new(engine(&store));

    let mut jobs = Vec::new();
    for _ in 0..4 {
        let job = engine.jobs().intake(&shipper(), intake()).await.unwrap();
        engine.assign(&job.id, &shipper(), acme()).await.unwrap();
        jobs.push(job.id);
    }

    let mut handles = Vec::new();
    for job_id in &jobs {
        for _ in 0..6 {
            let engine = engine.clone();
            let job_id = job_id.clone();
            handles.push(tokio::spawn(async move {
                let result = engine.accept(&job_id, &carrier_user(), None).await;
                (job_id, result)
            }));
        }
    }
    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    for (job_id, result) in &results {
        if let Err(err) = result {
            panic!("accept on {} failed: {}", job_id, err);
        }
    }

    for job_id in &jobs {
        let outcomes: Vec<_> = results
            .iter()
            .filter(|(id, _)| id == job_id)
            .filter_map(|(_, result)| result.as_ref().ok())
            .collect();
        assert_eq!(outcomes.len(), 6);
        assert_eq!(outcomes.iter().filter(|o| !o.already).count(), 1);
        assert!(outcomes.iter().all(|o| o.status == JobStatus::Accepted));
        assert_eq!(
            engine.decisions().count(job_id, DecisionAction::Accept).await.unwrap(),
            1
        );
    }
    assert_eq!(engine.metrics().get_stats().conflicts_retried, 0);
}
