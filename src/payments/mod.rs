// Payment holds and the provider they are released through

pub mod hold;
pub mod noop;
pub mod provider;

pub use hold::{next_status, HoldEvent};
pub use noop::NoopProvider;
pub use provider::{
    release_idempotency_key, PaymentProvider, ProviderError, ReleaseReceipt, ReleaseRequest,
};

#[cfg(any(test, feature = "testing"))]
pub use provider::MockPaymentProvider;
