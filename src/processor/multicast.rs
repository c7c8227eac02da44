//! Multicast: run several branches against copies of one exchange.
//!
//! Each branch receives its own `Exchange::copy()`, so branches share no
//! mutable state. Branches run sequentially in declared order, or in
//! parallel on an injected executor with a barrier before aggregation.
//! Aggregation always applies branch results in declared order, regardless
//! of completion order, so merge semantics stay deterministic.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::ExchangeError;
use crate::exchange::Exchange;

use super::Processor;

/// Merges branch results into a single outcome.
///
/// Called once per branch in declared order; `accumulated` is `None` for
/// the first branch.
pub trait AggregationStrategy: Send + Sync {
    /// Fold one branch result into the accumulated outcome.
    fn aggregate(&self, accumulated: Option<Exchange>, branch: Exchange) -> Exchange;
}

impl<F> AggregationStrategy for F
where
    F: Fn(Option<Exchange>, Exchange) -> Exchange + Send + Sync,
{
    fn aggregate(&self, accumulated: Option<Exchange>, branch: Exchange) -> Exchange {
        self(accumulated, branch)
    }
}

/// Default aggregation: the last branch's exchange wins.
pub struct UseLatest;

impl AggregationStrategy for UseLatest {
    fn aggregate(&self, _accumulated: Option<Exchange>, branch: Exchange) -> Exchange {
        branch
    }
}

/// Fan-out composite running each branch on its own exchange copy.
pub struct Multicast {
    branches: Vec<Arc<dyn Processor>>,
    parallel: bool,
    stop_on_failure: bool,
    aggregation: Arc<dyn AggregationStrategy>,
    executor: Option<Handle>,
}

impl Multicast {
    /// Create a sequential multicast with last-wins aggregation.
    pub fn new(branches: Vec<Arc<dyn Processor>>) -> Self {
        Self {
            branches,
            parallel: false,
            stop_on_failure: false,
            aggregation: Arc::new(UseLatest),
            executor: None,
        }
    }

    /// Dispatch branches concurrently instead of one after another.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Stop dispatching (sequential) or aggregating (parallel) after the
    /// first failed branch. Already-dispatched parallel branches are not
    /// interrupted. Default: run all branches, then surface the first
    /// failure in declared order.
    pub fn stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    /// Replace the aggregation strategy.
    pub fn aggregate_with(mut self, strategy: impl AggregationStrategy + 'static) -> Self {
        self.aggregation = Arc::new(strategy);
        self
    }

    /// Inject the executor used for parallel dispatch. Defaults to the
    /// runtime the multicast is running on.
    pub fn executor(mut self, handle: Handle) -> Self {
        self.executor = Some(handle);
        self
    }

    async fn run_sequential(&self, input: &Exchange) -> Vec<Option<Exchange>> {
        let mut results: Vec<Option<Exchange>> = Vec::with_capacity(self.branches.len());

        for (index, branch) in self.branches.iter().enumerate() {
            let mut copy = input.copy();
            branch.process(&mut copy).await;

            let failed = copy.is_failed();
            results.push(Some(copy));

            if failed && self.stop_on_failure {
                debug!(branch = index, "multicast stopping after failed branch");
                break;
            }
        }

        results
    }

    async fn run_parallel(&self, input: &Exchange) -> Vec<Option<Exchange>> {
        let handle = self
            .executor
            .clone()
            .unwrap_or_else(Handle::current);

        let mut join_set: JoinSet<(usize, Exchange)> = JoinSet::new();
        for (index, branch) in self.branches.iter().enumerate() {
            let branch = Arc::clone(branch);
            let mut copy = input.copy();
            join_set.spawn_on(
                async move {
                    branch.process(&mut copy).await;
                    (index, copy)
                },
                &handle,
            );
        }

        // Barrier: every branch completes before aggregation starts.
        let mut results: Vec<Option<Exchange>> = (0..self.branches.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, copy)) => results[index] = Some(copy),
                Err(e) => {
                    // A branch task died without handing its copy back.
                    warn!(error = %e, "multicast branch task failed to join");
                }
            }
        }

        // Synthesize a failure for any branch whose task was lost.
        for slot in results.iter_mut() {
            if slot.is_none() {
                let mut failed = input.copy();
                failed.set_exception(ExchangeError::processing("multicast branch task aborted"));
                *slot = Some(failed);
            }
        }

        results
    }
}

#[async_trait]
impl Processor for Multicast {
    async fn process(&self, exchange: &mut Exchange) {
        if self.branches.is_empty() {
            return;
        }

        let results = if self.parallel {
            self.run_parallel(exchange).await
        } else {
            self.run_sequential(exchange).await
        };

        // Aggregate in declared order; remember the first failure.
        let mut accumulated: Option<Exchange> = None;
        let mut first_failure: Option<(ExchangeError, bool)> = None;

        for result in results.into_iter().flatten() {
            let failed = result.is_failed();
            if failed && first_failure.is_none() {
                if let Some(e) = result.exception() {
                    first_failure = Some((e.clone(), result.is_handled()));
                }
            }

            accumulated = Some(self.aggregation.aggregate(accumulated, result));

            if failed && self.stop_on_failure {
                break;
            }
        }

        let Some(aggregated) = accumulated else {
            return;
        };

        // Fold the aggregated outcome back into the caller's exchange,
        // keeping its identity intact.
        exchange.set_out(aggregated.message().clone());
        let properties: Vec<(String, serde_json::Value)> = aggregated
            .properties()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        for (name, value) in properties {
            exchange.set_property(name, value);
        }

        if let Some((error, handled)) = first_failure {
            exchange.set_exception(error);
            exchange.set_handled(handled);
        }
    }
}
