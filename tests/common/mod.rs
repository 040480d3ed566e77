//! Shared fixtures for the escrow integration tests
//!
//! Every test gets its own in-memory store, a manual clock and a provider
//! that records what it was asked to do.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use haulgate::payments::{PaymentProvider, ProviderError, ReleaseReceipt, ReleaseRequest};
use haulgate::{
    Actor, CarrierAssignment, EngineSettings, EscrowEngine, EvidenceSubmission, EvidenceType,
    GateOverrides, JobIntake, ManualClock, PaymentRail, Role, Store,
};

pub const VIN: &str = "1HGCM82633A004352";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 6, 8, 30, 0).unwrap()
}

pub fn admin() -> Actor {
    Actor::admin("ops-1")
}

pub fn shipper() -> Actor {
    Actor::user("shipper-7", Role::Shipper)
}

pub fn carrier_user() -> Actor {
    Actor::user("driver-3", Role::Carrier)
}

/// Provider that answers like an idempotent payment network and can be told to fail
#[derive(Default)]
pub struct RecordingProvider {
    requests: Mutex<Vec<ReleaseRequest>>,
    receipts: Mutex<HashMap<String, ReleaseReceipt>>,
    failures_left: AtomicU32,
}

impl RecordingProvider {
    pub fn fail_next(&self, times: u32) {
        self.failures_left.store(times, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<ReleaseRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentProvider for RecordingProvider {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn release(&self, request: &ReleaseRequest) -> Result<ReleaseReceipt, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProviderError::Unavailable("simulated outage".to_string()));
        }

        let mut receipts = self.receipts.lock().unwrap();
        let next = receipts.len() + 1;
        let receipt = receipts
            .entry(request.idempotency_key.clone())
            .or_insert_with(|| ReleaseReceipt {
                provider_ref: format!("rec_{}", next),
                idempotency_key: request.idempotency_key.clone(),
            });
        Ok(receipt.clone())
    }
}

pub struct Harness {
    pub engine: EscrowEngine,
    pub clock: Arc<ManualClock>,
    pub provider: Arc<RecordingProvider>,
    pub store: Store,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(EngineSettings::default()).await
    }

    pub async fn with_settings(settings: EngineSettings) -> Self {
        let store = Store::in_memory().await.expect("in-memory store");
        let clock = Arc::new(ManualClock::new(start_time()));
        let provider = Arc::new(RecordingProvider::default());
        let engine = EscrowEngine::new(store.clone(), settings, provider.clone(), clock.clone());

        Self {
            engine,
            clock,
            provider,
            store,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Draft job under the default gate (4 + 4 photos, VIN, manual approval)
    pub async fn draft_job(&self) -> String {
        self.draft_job_with(GateOverrides::default(), None).await
    }

    pub async fn draft_job_with(
        &self,
        gate: GateOverrides,
        delivery_deadline: Option<DateTime<Utc>>,
    ) -> String {
        let intake = JobIntake {
            vin: VIN.to_string(),
            pickup_address: "400 Harbor Blvd, Long Beach".to_string(),
            dropoff_address: "18 Elm Ct, Reno".to_string(),
            price_cents: 185_000,
            delivery_deadline,
            rail: PaymentRail::Stripe,
            gate,
        };
        self.engine
            .jobs()
            .intake(&shipper(), intake)
            .await
            .expect("intake")
            .id
    }

    pub async fn submit(&self, job_id: &str, items: Vec<EvidenceSubmission>) {
        self.engine
            .evidence()
            .submit(job_id, &carrier_user(), items)
            .await
            .expect("evidence submit");
    }

    pub async fn submit_pickup_evidence(&self, job_id: &str) {
        let mut items = photos(job_id, EvidenceType::PickupPhoto, 4);
        items.push(EvidenceSubmission::photo(
            EvidenceType::VinPhoto,
            format!("jobs/{}/vin.jpg", job_id),
        ));
        self.submit(job_id, items).await;
    }

    pub async fn submit_delivery_evidence(&self, job_id: &str) {
        self.submit(job_id, photos(job_id, EvidenceType::DeliveryPhoto, 4))
            .await;
    }

    /// Walk a fresh job to DELIVERY_SUBMITTED with a passing full gate
    pub async fn delivered_job(&self) -> String {
        let job_id = self.draft_job().await;
        self.engine
            .assign(&job_id, &shipper(), acme())
            .await
            .expect("assign");
        self.engine
            .accept(&job_id, &carrier_user(), None)
            .await
            .expect("accept");
        self.submit_pickup_evidence(&job_id).await;
        self.engine
            .confirm_pickup(&job_id, &carrier_user(), None)
            .await
            .expect("pickup");
        self.submit_delivery_evidence(&job_id).await;
        self.engine
            .submit_delivery(&job_id, &carrier_user(), None)
            .await
            .expect("delivery");
        job_id
    }

    pub async fn releasable_job(&self) -> String {
        let job_id = self.delivered_job().await;
        self.engine
            .approve(&job_id, &shipper(), Some("photos check out".to_string()))
            .await
            .expect("approve");
        job_id
    }
}

pub fn acme() -> CarrierAssignment {
    CarrierAssignment {
        name: "Acme".to_string(),
        email: Some("dispatch@acme-haul.example".to_string()),
        phone: Some("+15550100".to_string()),
    }
}

pub fn photos(job_id: &str, evidence_type: EvidenceType, n: usize) -> Vec<EvidenceSubmission> {
    (0..n)
        .map(|i| {
            EvidenceSubmission::photo(
                evidence_type,
                format!("jobs/{}/{}-{}.jpg", job_id, evidence_type, i),
            )
        })
        .collect()
}
