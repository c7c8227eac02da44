//! Route assembly.
//!
//! The builder is the engine-side half of the "route compiler" boundary:
//! it accepts already-constructed processors (leaves or composites), splices
//! registered interceptor strategies around every step, optionally wraps
//! the whole body in an error handler, and validates the result before
//! producing a `Route`.

use std::sync::Arc;

use anyhow::Result;

use crate::processor::error_handler::{ErrorHandler, OnException};
use crate::processor::intercept::{apply_strategies, InterceptStrategy};
use crate::processor::{Pipeline, Processor};

use super::Route;

/// Fluent builder producing a compiled `Route`.
pub struct RouteBuilder {
    id: String,
    steps: Vec<Arc<dyn Processor>>,
    strategies: Vec<Arc<dyn InterceptStrategy>>,
    on_exception: Vec<OnException>,
    default_policy: Option<OnException>,
}

impl RouteBuilder {
    /// Start building a route with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
            strategies: Vec::new(),
            on_exception: Vec::new(),
            default_policy: None,
        }
    }

    /// Append a step. Steps run in the order they were added.
    pub fn step(mut self, processor: Arc<dyn Processor>) -> Self {
        self.steps.push(processor);
        self
    }

    /// Register an interceptor strategy. Strategies wrap every step, in
    /// registration order (first registered outermost).
    pub fn intercept(mut self, strategy: Arc<dyn InterceptStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Add an error-handling policy entry; the presence of any entry (or a
    /// default policy) wraps the whole route body in an error handler.
    pub fn on_exception(mut self, entry: OnException) -> Self {
        self.on_exception.push(entry);
        self
    }

    /// Set the error handler's default policy for unmatched failures.
    pub fn error_default(mut self, entry: OnException) -> Self {
        self.default_policy = Some(entry);
        self
    }

    /// Validate and compile the route.
    pub fn build(self) -> Result<Route> {
        if self.id.is_empty() {
            anyhow::bail!("route id cannot be empty");
        }
        if self.steps.is_empty() {
            anyhow::bail!("route '{}' must have at least one step", self.id);
        }

        let steps: Vec<Arc<dyn Processor>> = self
            .steps
            .into_iter()
            .map(|step| apply_strategies(&self.strategies, &self.id, step))
            .collect();

        let body: Arc<dyn Processor> = Arc::new(Pipeline::new(steps));

        let root: Arc<dyn Processor> =
            if self.on_exception.is_empty() && self.default_policy.is_none() {
                body
            } else {
                let mut handler = ErrorHandler::new(body);
                for entry in self.on_exception {
                    handler = handler.on_exception(entry);
                }
                if let Some(default) = self.default_policy {
                    handler = handler.default_policy(default);
                }
                Arc::new(handler)
            };

        Ok(Route::new(self.id, root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Exchange;
    use crate::processor::error_handler::RedeliveryPolicy;
    use crate::processor::{FnProcessor, SetHeader, TraceInterceptor};

    #[tokio::test]
    async fn test_builder_composes_steps_in_order() {
        let route = RouteBuilder::new("r1")
            .step(Arc::new(SetHeader::new("a", "1")))
            .step(Arc::new(SetHeader::new("b", "2")))
            .build()
            .unwrap();
        route.start().unwrap();

        let mut exchange = Exchange::with_body("x");
        route.send(&mut exchange).await.unwrap();

        assert_eq!(exchange.message().header_str("a"), Some("1"));
        assert_eq!(exchange.message().header_str("b"), Some("2"));
    }

    #[test]
    fn test_empty_route_rejected() {
        assert!(RouteBuilder::new("r1").build().is_err());
        assert!(RouteBuilder::new("")
            .step(Arc::new(crate::processor::Noop))
            .build()
            .is_err());
    }

    #[tokio::test]
    async fn test_error_handler_wrap_from_builder() {
        let route = RouteBuilder::new("r1")
            .step(Arc::new(FnProcessor::new(|e: &mut Exchange| {
                if e.retry_count() == 0 {
                    e.set_exception(crate::error::ExchangeError::processing("first try fails"));
                }
            })))
            .on_exception(OnException::any().redeliver(RedeliveryPolicy::fixed(2, 0)))
            .intercept(Arc::new(TraceInterceptor))
            .build()
            .unwrap();
        route.start().unwrap();

        let mut exchange = Exchange::with_body("x");
        route.send(&mut exchange).await.unwrap();

        assert!(!exchange.is_failed());
        assert_eq!(exchange.retry_count(), 1);
    }
}
