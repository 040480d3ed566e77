// Provider that moves no money, for development and tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use super::provider::{PaymentProvider, ProviderError, ReleaseReceipt, ReleaseRequest};
use crate::clock::Clock;

pub struct NoopProvider {
    clock: Arc<dyn Clock>,
    // Receipts by idempotency key, so replays answer like a real provider would
    receipts: Mutex<HashMap<String, ReleaseReceipt>>,
}

impl NoopProvider {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            receipts: Mutex::new(HashMap::new()),
        }
    }

    fn validate(request: &ReleaseRequest) -> Result<(), ProviderError> {
        if request.job_id.is_empty() || request.hold_id.is_empty() {
            return Err(ProviderError::Rejected(
                "job and hold identifiers are required".to_string(),
            ));
        }
        if request.amount_cents <= 0 {
            return Err(ProviderError::Rejected(format!(
                "amount must be positive, got {}",
                request.amount_cents
            )));
        }
        if request.idempotency_key.trim().is_empty() {
            return Err(ProviderError::Rejected(
                "idempotency key is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProvider for NoopProvider {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn release(&self, request: &ReleaseRequest) -> Result<ReleaseReceipt, ProviderError> {
        Self::validate(request)?;

        let mut receipts = self
            .receipts
            .lock()
            .map_err(|_| ProviderError::Unavailable("receipt store poisoned".to_string()))?;

        if let Some(existing) = receipts.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }

        let receipt = ReleaseReceipt {
            provider_ref: format!(
                "noop_{}_{}",
                request.hold_id,
                self.clock.now().timestamp_millis()
            ),
            idempotency_key: request.idempotency_key.clone(),
        };
        receipts.insert(request.idempotency_key.clone(), receipt.clone());

        info!(
            job_id = %request.job_id,
            hold_id = %request.hold_id,
            amount_cents = request.amount_cents,
            rail = %request.rail,
            "Noop release recorded"
        );
        Ok(receipt)
    }
}
