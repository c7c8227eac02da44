//! The processor contract and built-in leaf processors.
//!
//! A `Processor` is the single polymorphic unit every route element is
//! built from: pipelines, routers, multicast, error handlers, and
//! interceptors all implement the same trait and compose by holding child
//! processors. The returned future is the completion signal: it resolves
//! exactly once, and a future that is ready without yielding is the
//! "completed synchronously" case of the contract.
//!
//! Failure signaling: a processor that fails sets the failure on the
//! exchange (`Exchange::set_exception`) and completes normally. Nothing is
//! ever thrown or returned across the `process` boundary, which is what
//! lets a generic error handler wrap any processor.

pub mod choice;
pub mod error_handler;
pub mod intercept;
pub mod multicast;
pub mod pipeline;
pub mod timeout;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ExchangeError;
use crate::exchange::{Body, Exchange};

pub use choice::ChoiceRouter;
pub use error_handler::{ErrorHandler, OnException, RedeliveryPolicy};
pub use intercept::{InterceptStrategy, InterceptWhen, TraceInterceptor};
pub use multicast::{AggregationStrategy, Multicast, UseLatest};
pub use pipeline::Pipeline;
pub use timeout::Timeout;

/// The fundamental execution unit: consumes an exchange, may mutate it,
/// and completes when the returned future resolves.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Process the exchange. Failures are recorded on the exchange, never
    /// returned or panicked across this boundary.
    async fn process(&self, exchange: &mut Exchange);
}

/// A predicate evaluated against an exchange, used by routers, filters and
/// error-handler policy entries.
///
/// Evaluation may itself fail; callers treat an `Err` as "did not match"
/// and move on, so a broken predicate can never wedge a route.
pub trait Predicate: Send + Sync {
    /// Evaluate against the exchange.
    fn matches(&self, exchange: &Exchange) -> Result<bool, ExchangeError>;
}

impl<F> Predicate for F
where
    F: Fn(&Exchange) -> Result<bool, ExchangeError> + Send + Sync,
{
    fn matches(&self, exchange: &Exchange) -> Result<bool, ExchangeError> {
        self(exchange)
    }
}

/// Predicate matching a header against an expected value on the current
/// message.
pub fn header_equals(name: impl Into<String>, expected: impl Into<Value>) -> impl Predicate {
    let name = name.into();
    let expected = expected.into();
    move |exchange: &Exchange| -> Result<bool, ExchangeError> {
        Ok(exchange.message().header(&name) == Some(&expected))
    }
}

/// Adapter turning a synchronous closure into a `Processor`.
pub struct FnProcessor<F>(F);

impl<F> FnProcessor<F>
where
    F: Fn(&mut Exchange) + Send + Sync,
{
    /// Wrap a closure as a processor.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Processor for FnProcessor<F>
where
    F: Fn(&mut Exchange) + Send + Sync,
{
    async fn process(&self, exchange: &mut Exchange) {
        (self.0)(exchange);
    }
}

/// A processor that does nothing. Useful as a default branch or an
/// interceptor detour that only observes.
pub struct Noop;

#[async_trait]
impl Processor for Noop {
    async fn process(&self, _exchange: &mut Exchange) {}
}

/// Sets a header on the current message.
pub struct SetHeader {
    name: String,
    value: Value,
}

impl SetHeader {
    /// Create a header-setting processor.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl Processor for SetHeader {
    async fn process(&self, exchange: &mut Exchange) {
        exchange
            .message_mut()
            .set_header(self.name.clone(), self.value.clone());
    }
}

/// Replaces the body of the current message.
pub struct SetBody {
    body: Body,
}

impl SetBody {
    /// Create a body-setting processor.
    pub fn new(body: impl Into<Body>) -> Self {
        Self { body: body.into() }
    }
}

#[async_trait]
impl Processor for SetBody {
    async fn process(&self, exchange: &mut Exchange) {
        exchange.message_mut().set_body(self.body.clone());
    }
}

/// Sets an exchange-scoped property.
pub struct SetProperty {
    name: String,
    value: Value,
}

impl SetProperty {
    /// Create a property-setting processor.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl Processor for SetProperty {
    async fn process(&self, exchange: &mut Exchange) {
        exchange.set_property(self.name.clone(), self.value.clone());
    }
}
