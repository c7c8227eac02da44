//! Deadline wrapper for a processor.
//!
//! Races the wrapped processor against a timer. Whichever finishes first
//! wins and is the only outcome ever observed: on expiry the wrapped
//! future is dropped and a `SuspendTimeout` failure is recorded on the
//! exchange instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::ExchangeError;
use crate::exchange::Exchange;

use super::Processor;

/// Bounds the wrapped processor's execution time.
pub struct Timeout {
    inner: Arc<dyn Processor>,
    limit: Duration,
}

impl Timeout {
    /// Wrap `inner` with the given deadline.
    pub fn new(inner: Arc<dyn Processor>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl Processor for Timeout {
    async fn process(&self, exchange: &mut Exchange) {
        let completed = tokio::time::timeout(self.limit, self.inner.process(exchange)).await;

        if completed.is_err() {
            warn!(
                exchange_id = %exchange.id(),
                limit_ms = self.limit.as_millis() as u64,
                "step exceeded its deadline"
            );
            exchange.set_exception(ExchangeError::SuspendTimeout {
                waited_ms: self.limit.as_millis() as u64,
            });
        }
    }
}
