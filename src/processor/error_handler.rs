//! Structured error recovery around a wrapped processor.
//!
//! The handler watches the exchange after each invocation of the processor
//! it wraps. On failure it consults an ordered policy table keyed on error
//! kind and predicate; the first matching entry decides whether to
//! redeliver (with backoff), route to a dead-letter destination, and
//! whether the failure counts as handled. The redelivery boundary is
//! exactly the wrapped processor: side effects completed by an enclosing
//! pipeline before the wrap point are never re-run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{ErrorKind, ExchangeError};
use crate::exchange::{Exchange, REDELIVERY_COUNT_PROPERTY};

use super::{Predicate, Processor};

/// Redelivery policy for failed invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeliveryPolicy {
    /// Maximum number of attempts (including the first try).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between redeliveries in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between redeliveries in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each redelivery).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RedeliveryPolicy {
    /// A policy that never redelivers.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Fixed-delay policy with the given attempt bound.
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            backoff_multiplier: 1.0,
        }
    }

    /// Calculate the delay before the redelivery following `attempt`
    /// (1-indexed attempt that just failed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// One entry of the handler's policy table.
///
/// An entry matches a failure when the error kind is listed (or no kinds
/// are listed) and the predicate, if any, evaluates true. A predicate that
/// errors counts as "no match" and the next entry is consulted.
pub struct OnException {
    kinds: Vec<ErrorKind>,
    predicate: Option<Box<dyn Predicate>>,
    handled: bool,
    redelivery: RedeliveryPolicy,
    dead_letter: Option<Arc<dyn Processor>>,
}

impl Default for OnException {
    fn default() -> Self {
        Self::any()
    }
}

impl OnException {
    /// An entry matching any failure, with no redelivery, unhandled.
    pub fn any() -> Self {
        Self {
            kinds: Vec::new(),
            predicate: None,
            handled: false,
            redelivery: RedeliveryPolicy::none(),
            dead_letter: None,
        }
    }

    /// An entry matching a specific error kind.
    pub fn kind(kind: ErrorKind) -> Self {
        Self {
            kinds: vec![kind],
            ..Self::any()
        }
    }

    /// Add another error kind this entry matches.
    pub fn or_kind(mut self, kind: ErrorKind) -> Self {
        self.kinds.push(kind);
        self
    }

    /// Additionally require a predicate over the failed exchange.
    pub fn when(mut self, predicate: impl Predicate + 'static) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    /// Mark matched failures as handled (swallowed) after recovery.
    pub fn handled(mut self, handled: bool) -> Self {
        self.handled = handled;
        self
    }

    /// Set the redelivery policy for matched failures.
    pub fn redeliver(mut self, policy: RedeliveryPolicy) -> Self {
        self.redelivery = policy;
        self
    }

    /// Route matched, unrecoverable failures to an alternate destination.
    pub fn dead_letter(mut self, destination: Arc<dyn Processor>) -> Self {
        self.dead_letter = Some(destination);
        self
    }

    fn matches(&self, err: &ExchangeError, exchange: &Exchange) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&err.kind()) {
            return false;
        }
        match &self.predicate {
            None => true,
            // A failing predicate is a non-match, try the next entry.
            Some(p) => p.matches(exchange).unwrap_or(false),
        }
    }
}

/// Wraps a processor with redelivery, dead-letter routing, and suppression
/// policy.
pub struct ErrorHandler {
    inner: Arc<dyn Processor>,
    entries: Vec<OnException>,
    default_policy: OnException,
}

impl ErrorHandler {
    /// Wrap a processor with the default policy: propagate unhandled, no
    /// redelivery.
    pub fn new(inner: Arc<dyn Processor>) -> Self {
        Self {
            inner,
            entries: Vec::new(),
            default_policy: OnException::any(),
        }
    }

    /// Append a policy entry. Entries match in the order they were added;
    /// the first match wins.
    pub fn on_exception(mut self, entry: OnException) -> Self {
        self.entries.push(entry);
        self
    }

    /// Replace the default policy applied when no entry matches.
    pub fn default_policy(mut self, entry: OnException) -> Self {
        self.default_policy = entry;
        self
    }

    fn match_policy(&self, err: &ExchangeError, exchange: &Exchange) -> &OnException {
        self.entries
            .iter()
            .find(|entry| entry.matches(err, exchange))
            .unwrap_or(&self.default_policy)
    }

    /// Restore the exchange to its pre-attempt snapshot, keeping only the
    /// redelivery counter.
    fn restore(exchange: &mut Exchange, snapshot: &Exchange, redeliveries: u32) {
        exchange.in_message = snapshot.in_message.clone();
        match snapshot.out_message() {
            Some(out) => exchange.set_out(out.clone()),
            None => exchange.clear_out(),
        }

        let current: Vec<String> = exchange.properties().map(|(k, _)| k.to_string()).collect();
        for key in current {
            exchange.remove_property(&key);
        }
        let saved: Vec<(String, serde_json::Value)> = snapshot
            .properties()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        for (key, value) in saved {
            exchange.set_property(key, value);
        }

        exchange.clear_exception();
        exchange.set_property(REDELIVERY_COUNT_PROPERTY, redeliveries);
    }
}

#[async_trait]
impl Processor for ErrorHandler {
    async fn process(&self, exchange: &mut Exchange) {
        let snapshot = exchange.copy();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.inner.process(exchange).await;

            if !exchange.is_failed() {
                if attempt > 1 {
                    debug!(
                        exchange_id = %exchange.id(),
                        attempt,
                        "exchange recovered after redelivery"
                    );
                }
                return;
            }

            let Some(err) = exchange.exception().cloned() else {
                return;
            };

            let policy = self.match_policy(&err, exchange);

            if policy.redelivery.should_retry(attempt) {
                let delay = policy.redelivery.delay_for_attempt(attempt);
                warn!(
                    exchange_id = %exchange.id(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, scheduling redelivery"
                );

                Self::restore(exchange, &snapshot, attempt);
                tokio::time::sleep(delay).await;
                continue;
            }

            // Out of attempts (or the policy allows none).
            let terminal = if attempt > 1 {
                ExchangeError::RedeliveryExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                }
            } else {
                err
            };

            error!(
                exchange_id = %exchange.id(),
                attempt,
                error = %terminal,
                "exchange failed permanently"
            );
            exchange.set_exception(terminal);

            if let Some(ref dead_letter) = policy.dead_letter {
                debug!(exchange_id = %exchange.id(), "routing to dead-letter destination");
                dead_letter.process(exchange).await;
            }

            if policy.handled {
                exchange.set_handled(true);
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::processor::FnProcessor;

    /// Fails the first `failures` invocations, then succeeds.
    fn flaky(failures: u32) -> (Arc<dyn Processor>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let processor = Arc::new(FnProcessor::new(move |exchange: &mut Exchange| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                exchange.set_exception(ExchangeError::processing(format!("failure {}", n)));
            }
        }));
        (processor, calls)
    }

    #[tokio::test]
    async fn test_recovers_after_one_redelivery() {
        let (inner, calls) = flaky(1);
        let handler = ErrorHandler::new(inner)
            .on_exception(OnException::any().redeliver(RedeliveryPolicy::fixed(2, 0)));

        let mut exchange = Exchange::with_body("x");
        handler.process(&mut exchange).await;

        assert!(!exchange.is_failed());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(exchange.retry_count(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_exhausted_after_max_attempts() {
        let (inner, calls) = flaky(u32::MAX);
        let handler = ErrorHandler::new(inner)
            .on_exception(OnException::any().redeliver(RedeliveryPolicy::fixed(3, 0)));

        let mut exchange = Exchange::with_body("x");
        handler.process(&mut exchange).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(exchange.is_failed());
        match exchange.exception().unwrap() {
            ExchangeError::RedeliveryExhausted { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("expected RedeliveryExhausted, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_default_policy_propagates_without_retry() {
        let (inner, calls) = flaky(u32::MAX);
        let handler = ErrorHandler::new(inner);

        let mut exchange = Exchange::with_body("x");
        handler.process(&mut exchange).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(exchange.is_failed());
        assert_eq!(exchange.exception().unwrap().kind(), ErrorKind::Processing);
    }

    #[tokio::test]
    async fn test_handled_suppresses_failure() {
        let (inner, _) = flaky(u32::MAX);
        let handler = ErrorHandler::new(inner).on_exception(OnException::any().handled(true));

        let mut exchange = Exchange::with_body("x");
        handler.process(&mut exchange).await;

        assert!(!exchange.is_failed());
        assert!(exchange.is_handled());
    }

    #[tokio::test]
    async fn test_dead_letter_destination_runs() {
        let (inner, _) = flaky(u32::MAX);
        let dead_lettered = Arc::new(AtomicU32::new(0));
        let counter = dead_lettered.clone();

        let handler = ErrorHandler::new(inner).on_exception(
            OnException::any()
                .handled(true)
                .dead_letter(Arc::new(FnProcessor::new(move |_: &mut Exchange| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))),
        );

        let mut exchange = Exchange::with_body("x");
        handler.process(&mut exchange).await;

        assert_eq!(dead_lettered.load(Ordering::SeqCst), 1);
        assert!(!exchange.is_failed());
    }

    #[tokio::test]
    async fn test_first_matching_entry_wins() {
        let (inner, calls) = flaky(u32::MAX);
        let handler = ErrorHandler::new(inner)
            // Declared first: matches Processing, no retry, handled.
            .on_exception(OnException::kind(ErrorKind::Processing).handled(true))
            // Would retry, but must never be consulted.
            .on_exception(OnException::any().redeliver(RedeliveryPolicy::fixed(5, 0)));

        let mut exchange = Exchange::with_body("x");
        handler.process(&mut exchange).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(exchange.is_handled());
    }

    #[tokio::test]
    async fn test_predicate_error_falls_to_next_entry() {
        let (inner, _) = flaky(u32::MAX);
        let handler = ErrorHandler::new(inner)
            .on_exception(
                OnException::any()
                    .when(|_: &Exchange| -> Result<bool, ExchangeError> {
                        Err(ExchangeError::processing("broken"))
                    })
                    .handled(true),
            )
            .on_exception(OnException::any().handled(false));

        let mut exchange = Exchange::with_body("x");
        handler.process(&mut exchange).await;

        // The broken-predicate entry was skipped; the second entry leaves
        // the failure unhandled.
        assert!(exchange.is_failed());
    }

    #[tokio::test]
    async fn test_redelivery_restores_pre_attempt_state() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        // Mutates the exchange, then fails; the mutation must not survive
        // into the next attempt.
        let inner = Arc::new(FnProcessor::new(move |exchange: &mut Exchange| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            assert!(
                !exchange.message().headers.contains("dirty"),
                "mutation from a failed attempt leaked into attempt {}",
                n + 1
            );
            exchange.message_mut().set_header("dirty", true);
            if n == 0 {
                exchange.set_exception(ExchangeError::processing("first attempt fails"));
            }
        }));

        let handler = ErrorHandler::new(inner)
            .on_exception(OnException::any().redeliver(RedeliveryPolicy::fixed(2, 0)));

        let mut exchange = Exchange::with_body("x");
        handler.process(&mut exchange).await;

        assert!(!exchange.is_failed());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_delays() {
        let policy = RedeliveryPolicy {
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10000,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10000)); // Capped
    }
}
