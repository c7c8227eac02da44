//! Sequential pipeline of processors.
//!
//! Children run in strict declared order; a child never starts before its
//! predecessor has completed. A failure recorded by any child
//! short-circuits the remainder of the chain, leaving the exception on the
//! exchange for an enclosing error handler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::exchange::Exchange;

use super::Processor;

/// An ordered chain of child processors.
pub struct Pipeline {
    children: Vec<Arc<dyn Processor>>,
}

impl Pipeline {
    /// Create a pipeline from the given children.
    pub fn new(children: Vec<Arc<dyn Processor>>) -> Self {
        Self { children }
    }

    /// Number of child processors.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the pipeline has no children.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[async_trait]
impl Processor for Pipeline {
    async fn process(&self, exchange: &mut Exchange) {
        for (index, child) in self.children.iter().enumerate() {
            child.process(exchange).await;

            if exchange.is_failed() {
                debug!(
                    exchange_id = %exchange.id(),
                    step = index,
                    "pipeline short-circuit: child recorded a failure"
                );
                return;
            }
        }
    }
}
