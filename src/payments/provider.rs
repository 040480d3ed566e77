// Payment provider interface

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::domain::PaymentRail;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub job_id: String,
    pub hold_id: String,
    pub amount_cents: i64,
    pub rail: PaymentRail,
    /// Same key for every retry against the same hold
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReceipt {
    pub provider_ref: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// External payment network. Implementations must treat a repeated
/// idempotency key as the same release.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn release(&self, request: &ReleaseRequest) -> Result<ReleaseReceipt, ProviderError>;
}

/// Deterministic key for releasing a hold
pub fn release_idempotency_key(job_id: &str, hold_id: &str) -> String {
    format!("release:{}:{}", job_id, hold_id)
}
