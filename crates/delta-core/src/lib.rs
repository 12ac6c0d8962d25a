pub mod error;
pub mod metrics;
pub mod retry;
pub mod state_store;

pub use error::{DeltaError, DeltaFailure, StateStoreError};
pub use metrics::{Metrics, MetricsSnapshot};
pub use retry::{RetryDisposition, RetryError, RetryPolicy};
pub use state_store::{CommittedOffset, SledStateStore, StateStore};
