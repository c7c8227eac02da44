//! Content-based router: pick exactly one branch by predicate.
//!
//! Predicates are evaluated strictly in declared order; the first match
//! runs its branch exclusively. A predicate that errors counts as "did not
//! match" and evaluation moves to the next arm. With no match, the default
//! branch runs if present; otherwise the exchange passes through unchanged,
//! unless `require_match` turns a miss into a routing failure.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ExchangeError;
use crate::exchange::Exchange;

use super::{Predicate, Processor};

/// One (predicate, branch) arm of a router.
struct When {
    predicate: Box<dyn Predicate>,
    branch: Arc<dyn Processor>,
}

/// A content-based router over ordered predicate arms.
pub struct ChoiceRouter {
    arms: Vec<When>,
    otherwise: Option<Arc<dyn Processor>>,
    require_match: bool,
}

impl Default for ChoiceRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChoiceRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            arms: Vec::new(),
            otherwise: None,
            require_match: false,
        }
    }

    /// Add a (predicate, branch) arm. Arms are evaluated in the order they
    /// were added.
    pub fn when(mut self, predicate: impl Predicate + 'static, branch: Arc<dyn Processor>) -> Self {
        self.arms.push(When {
            predicate: Box::new(predicate),
            branch,
        });
        self
    }

    /// Set the default branch, run when no predicate matches.
    pub fn otherwise(mut self, branch: Arc<dyn Processor>) -> Self {
        self.otherwise = Some(branch);
        self
    }

    /// With no match and no default: record a routing failure instead of
    /// passing the exchange through unchanged.
    pub fn require_match(mut self, required: bool) -> Self {
        self.require_match = required;
        self
    }
}

#[async_trait]
impl Processor for ChoiceRouter {
    async fn process(&self, exchange: &mut Exchange) {
        for (index, arm) in self.arms.iter().enumerate() {
            match arm.predicate.matches(exchange) {
                Ok(true) => {
                    debug!(exchange_id = %exchange.id(), arm = index, "router matched arm");
                    arm.branch.process(exchange).await;
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    // A broken predicate is a non-match, not a route failure.
                    warn!(
                        exchange_id = %exchange.id(),
                        arm = index,
                        error = %e,
                        "predicate evaluation failed, treating as no match"
                    );
                }
            }
        }

        if let Some(ref otherwise) = self.otherwise {
            debug!(exchange_id = %exchange.id(), "router taking default branch");
            otherwise.process(exchange).await;
        } else if self.require_match {
            exchange.set_exception(ExchangeError::RoutingFailure {
                detail: format!("none of {} predicate(s) matched", self.arms.len()),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::ErrorKind;
    use crate::processor::{header_equals, FnProcessor};

    fn counter_branch(counter: Arc<AtomicUsize>) -> Arc<dyn Processor> {
        Arc::new(FnProcessor::new(move |_: &mut Exchange| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let router = ChoiceRouter::new()
            .when(header_equals("kind", "a"), counter_branch(first.clone()))
            // Also matches, but must never run.
            .when(
                |e: &Exchange| -> Result<bool, ExchangeError> {
                    Ok(e.message().headers.contains("kind"))
                },
                counter_branch(second.clone()),
            );

        let mut exchange = Exchange::with_body("x");
        exchange.in_message.set_header("kind", "a");
        router.process(&mut exchange).await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_match_runs_default() {
        let fallback = Arc::new(AtomicUsize::new(0));
        let router = ChoiceRouter::new()
            .when(header_equals("kind", "a"), Arc::new(crate::processor::Noop))
            .otherwise(counter_branch(fallback.clone()));

        let mut exchange = Exchange::with_body("x");
        router.process(&mut exchange).await;

        assert_eq!(fallback.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_match_passes_through() {
        let router = ChoiceRouter::new().when(header_equals("kind", "a"), Arc::new(crate::processor::Noop));

        let mut exchange = Exchange::with_body("untouched");
        router.process(&mut exchange).await;

        assert!(!exchange.is_failed());
        assert_eq!(exchange.message().body.as_text(), Some("untouched"));
    }

    #[tokio::test]
    async fn test_require_match_records_routing_failure() {
        let router = ChoiceRouter::new()
            .when(header_equals("kind", "a"), Arc::new(crate::processor::Noop))
            .require_match(true);

        let mut exchange = Exchange::with_body("x");
        router.process(&mut exchange).await;

        assert!(exchange.is_failed());
        assert_eq!(
            exchange.exception().unwrap().kind(),
            ErrorKind::RoutingFailure
        );
    }

    #[tokio::test]
    async fn test_predicate_error_is_no_match() {
        let taken = Arc::new(AtomicUsize::new(0));
        let router = ChoiceRouter::new()
            .when(
                |_: &Exchange| -> Result<bool, ExchangeError> {
                    Err(ExchangeError::processing("broken predicate"))
                },
                Arc::new(crate::processor::Noop),
            )
            .otherwise(counter_branch(taken.clone()));

        let mut exchange = Exchange::with_body("x");
        router.process(&mut exchange).await;

        // The broken predicate falls through to the default branch.
        assert_eq!(taken.load(Ordering::SeqCst), 1);
        assert!(!exchange.is_failed());
    }
}
