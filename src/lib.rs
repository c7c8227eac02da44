//! mediate - In-process message mediation engine
//!
//! A small, pluggable execution engine that moves a unit of work (an
//! [`Exchange`]) through a directed chain of processing steps, with
//! asynchronous execution, interception, content-based branching, and
//! structured error recovery.
//!
//! # Architecture
//!
//! Everything composes from one contract: a [`Processor`] consumes an
//! exchange, may mutate it, and completes when its future resolves.
//! Failures are recorded on the exchange, never thrown across the
//! processing boundary, so a generic [`ErrorHandler`] can wrap any
//! processor. Composites hold child processors:
//!
//! - [`Pipeline`]: strict sequential chain, short-circuits on failure
//! - [`ChoiceRouter`]: exactly one branch by first-matching predicate
//! - [`Multicast`]: branches over exchange copies, sequential or parallel,
//!   with pluggable aggregation
//! - [`ErrorHandler`]: redelivery with backoff, dead-letter redirection,
//!   suppression policy
//! - interceptor strategies: transparent wrappers spliced around every
//!   route step at build time
//!
//! Routes bind a compiled processor graph to a lifecycle
//! (stopped/started/stopping) with in-flight accounting for graceful
//! shutdown, tracked in a [`RouteRegistry`].
//!
//! # Modules
//!
//! - `exchange`: the unit of work (messages, headers, properties, failure
//!   state)
//! - `processor`: the contract, composites, and built-in leaves
//! - `route`: lifecycle, registry, and the route builder
//! - `error`: failure taxonomy

pub mod error;
pub mod exchange;
pub mod processor;
pub mod route;

// Re-export the main types at the crate root for convenience
pub use error::{ErrorKind, ExchangeError, RouteError};
pub use exchange::{Body, Exchange, ExchangePattern, Headers, Message};
pub use processor::{
    header_equals, AggregationStrategy, ChoiceRouter, ErrorHandler, FnProcessor,
    InterceptStrategy, InterceptWhen, Multicast, Noop, OnException, Pipeline, Predicate,
    Processor, RedeliveryPolicy, SetBody, SetHeader, SetProperty, Timeout, TraceInterceptor,
    UseLatest,
};
pub use route::{Route, RouteBuilder, RouteRegistry, RouteStatus, ServiceState};
