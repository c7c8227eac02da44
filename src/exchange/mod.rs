//! The exchange: the unit of work flowing through a route.
//!
//! An exchange carries an input message, an optional output message,
//! exchange-scoped properties, and at most one recorded failure. It is
//! exclusively owned by whichever processor currently holds it; the engine
//! enforces this through `&mut` borrows rather than locking, so the type
//! itself carries no synchronization.

pub mod headers;
pub mod message;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ExchangeError;

pub use headers::Headers;
pub use message::{Body, Message};

/// Property key tracking how many times an error handler has redelivered
/// this exchange.
pub const REDELIVERY_COUNT_PROPERTY: &str = "redelivery_count";

/// Message exchange pattern, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangePattern {
    /// Fire-and-forget: no reply is expected at the originating boundary.
    InOnly,

    /// Request-response: the originator expects a reply message.
    InOut,
}

/// The unit of work moved through a route by processors.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Process-unique id for this exchange.
    id: Uuid,

    /// Correlation id shared with copies made for branches and
    /// sub-invocations, for tracing a logical flow end to end.
    correlation_id: Uuid,

    /// When this exchange was created.
    created_at: DateTime<Utc>,

    /// Exchange pattern, fixed at creation.
    pattern: ExchangePattern,

    /// The input message.
    pub in_message: Message,

    /// The output message; absent means "unchanged, use `in_message`".
    out_message: Option<Message>,

    /// Exchange-scoped metadata, never transported to external systems.
    properties: IndexMap<String, Value>,

    /// At most one recorded failure.
    exception: Option<ExchangeError>,

    /// Whether a recorded failure has been handled by an error handler.
    handled: bool,
}

impl Exchange {
    /// Create a new exchange with the given pattern and an empty message.
    pub fn new(pattern: ExchangePattern) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            correlation_id: id,
            created_at: Utc::now(),
            pattern,
            in_message: Message::new(),
            out_message: None,
            properties: IndexMap::new(),
            exception: None,
            handled: false,
        }
    }

    /// Create a fire-and-forget exchange with the given body.
    pub fn with_body(body: impl Into<Body>) -> Self {
        let mut exchange = Self::new(ExchangePattern::InOnly);
        exchange.in_message.set_body(body);
        exchange
    }

    /// Copy this exchange for a branch or sub-invocation.
    ///
    /// The copy gets a fresh exchange id but keeps the correlation id.
    /// Headers and properties are deep-copied; heavy body/attachment data
    /// is aliased by reference. After the copy, the two exchanges share no
    /// mutable state.
    pub fn copy(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id: self.correlation_id,
            created_at: self.created_at,
            pattern: self.pattern,
            in_message: self.in_message.clone(),
            out_message: self.out_message.clone(),
            properties: self.properties.clone(),
            exception: self.exception.clone(),
            handled: self.handled,
        }
    }

    /// This exchange's id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The correlation id shared across copies.
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// When this exchange was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The exchange pattern.
    pub fn pattern(&self) -> ExchangePattern {
        self.pattern
    }

    /// The current message: `out` if a step has produced one, else `in`.
    pub fn message(&self) -> &Message {
        self.out_message.as_ref().unwrap_or(&self.in_message)
    }

    /// Mutable access to the current message.
    pub fn message_mut(&mut self) -> &mut Message {
        self.out_message.as_mut().unwrap_or(&mut self.in_message)
    }

    /// The output message, if a step has produced one.
    pub fn out_message(&self) -> Option<&Message> {
        self.out_message.as_ref()
    }

    /// Replace the output message.
    pub fn set_out(&mut self, message: Message) {
        self.out_message = Some(message);
    }

    /// Seed the output message from the current message, returning a
    /// mutable reference to it. Subsequent mutations go to `out`.
    pub fn prepare_out(&mut self) -> &mut Message {
        self.out_message
            .get_or_insert_with(|| self.in_message.clone())
    }

    /// Drop the output message, reverting to `in_message` as current.
    pub fn clear_out(&mut self) {
        self.out_message = None;
    }

    /// Record a failure on this exchange, replacing any previous one.
    pub fn set_exception(&mut self, error: ExchangeError) {
        self.exception = Some(error);
        self.handled = false;
    }

    /// The recorded failure, if any.
    pub fn exception(&self) -> Option<&ExchangeError> {
        self.exception.as_ref()
    }

    /// Take the recorded failure, clearing it.
    pub fn take_exception(&mut self) -> Option<ExchangeError> {
        self.handled = false;
        self.exception.take()
    }

    /// Whether this exchange carries an unhandled failure.
    pub fn is_failed(&self) -> bool {
        self.exception.is_some() && !self.handled
    }

    /// Mark the recorded failure as handled (or not).
    pub fn set_handled(&mut self, handled: bool) {
        self.handled = handled;
    }

    /// Whether the recorded failure has been marked handled.
    pub fn is_handled(&self) -> bool {
        self.exception.is_some() && self.handled
    }

    /// Clear the failure state entirely.
    pub fn clear_exception(&mut self) {
        self.exception = None;
        self.handled = false;
    }

    /// Set an exchange-scoped property.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Get an exchange-scoped property.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Remove an exchange-scoped property.
    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.properties.shift_remove(name)
    }

    /// Iterate properties in insertion order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// How many times an error handler has redelivered this exchange.
    pub fn retry_count(&self) -> u64 {
        self.property(REDELIVERY_COUNT_PROPERTY)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}
