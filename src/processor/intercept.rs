//! Interceptor strategies: transparent wrapping of route steps.
//!
//! A strategy is a factory that, given the "next" processor of a route
//! step, returns a processor to run in its place. Strategies are applied
//! when a route is built, in registration order, so the first registered
//! strategy becomes the outermost wrapper. A wrapper is itself an ordinary
//! processor and must honor the same contract as the step it wraps.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::exchange::Exchange;

use super::{Predicate, Processor};

/// Factory producing a wrapping processor around a route step.
pub trait InterceptStrategy: Send + Sync {
    /// Wrap `next`, the processor that would otherwise run for this step.
    fn wrap(&self, route_id: &str, next: Arc<dyn Processor>) -> Arc<dyn Processor>;
}

/// Observe-only interceptor: emits a trace event around every step and
/// passes through unchanged.
pub struct TraceInterceptor;

impl InterceptStrategy for TraceInterceptor {
    fn wrap(&self, route_id: &str, next: Arc<dyn Processor>) -> Arc<dyn Processor> {
        Arc::new(TraceStep {
            route_id: route_id.to_string(),
            next,
        })
    }
}

struct TraceStep {
    route_id: String,
    next: Arc<dyn Processor>,
}

#[async_trait]
impl Processor for TraceStep {
    async fn process(&self, exchange: &mut Exchange) {
        trace!(
            route_id = %self.route_id,
            exchange_id = %exchange.id(),
            body_type = exchange.message().body.type_name(),
            "step begin"
        );
        self.next.process(exchange).await;
        trace!(
            route_id = %self.route_id,
            exchange_id = %exchange.id(),
            failed = exchange.is_failed(),
            "step end"
        );
    }
}

/// Conditional interceptor: when the predicate matches, run a detour
/// processor, then either continue to the wrapped step or stop short.
pub struct InterceptWhen {
    predicate: Arc<dyn Predicate>,
    detour: Arc<dyn Processor>,
    stop: bool,
}

impl InterceptWhen {
    /// Detour matching exchanges through `detour`, then continue to the
    /// original step.
    pub fn new(predicate: impl Predicate + 'static, detour: Arc<dyn Processor>) -> Self {
        Self {
            predicate: Arc::new(predicate),
            detour,
            stop: false,
        }
    }

    /// After the detour, skip the wrapped step entirely ("intercept and
    /// stop").
    pub fn and_stop(mut self) -> Self {
        self.stop = true;
        self
    }
}

impl InterceptStrategy for InterceptWhen {
    fn wrap(&self, route_id: &str, next: Arc<dyn Processor>) -> Arc<dyn Processor> {
        Arc::new(InterceptWhenStep {
            route_id: route_id.to_string(),
            predicate: Arc::clone(&self.predicate),
            detour: Arc::clone(&self.detour),
            stop: self.stop,
            next,
        })
    }
}

struct InterceptWhenStep {
    route_id: String,
    predicate: Arc<dyn Predicate>,
    detour: Arc<dyn Processor>,
    stop: bool,
    next: Arc<dyn Processor>,
}

#[async_trait]
impl Processor for InterceptWhenStep {
    async fn process(&self, exchange: &mut Exchange) {
        // Predicate errors mean "do not intercept".
        let intercepted = self.predicate.matches(exchange).unwrap_or(false);

        if intercepted {
            debug!(
                route_id = %self.route_id,
                exchange_id = %exchange.id(),
                stop = self.stop,
                "exchange intercepted"
            );
            self.detour.process(exchange).await;
            if self.stop || exchange.is_failed() {
                return;
            }
        }

        self.next.process(exchange).await;
    }
}

/// Apply strategies to a step in registration order: the first strategy
/// registered ends up outermost.
pub fn apply_strategies(
    strategies: &[Arc<dyn InterceptStrategy>],
    route_id: &str,
    step: Arc<dyn Processor>,
) -> Arc<dyn Processor> {
    let mut wrapped = step;
    for strategy in strategies.iter().rev() {
        wrapped = strategy.wrap(route_id, wrapped);
    }
    wrapped
}
