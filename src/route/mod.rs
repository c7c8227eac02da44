//! Route lifecycle: a compiled processor graph with start/stop state and
//! in-flight accounting.
//!
//! A route admits exchanges only while `Started`. Stopping is graceful:
//! admission closes first, already-admitted exchanges drain to completion,
//! and the route reports any exchanges abandoned when the drain bound
//! elapses. State transitions are monotonic within a start/stop cycle.

pub mod builder;
pub mod registry;

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info, instrument, warn};

use crate::error::RouteError;
use crate::exchange::{Exchange, ExchangePattern};
use crate::processor::Processor;

pub use builder::RouteBuilder;
pub use registry::{RouteRegistry, RouteStatus};

/// Lifecycle state of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceState {
    Stopped = 0,
    Starting = 1,
    Started = 2,
    Stopping = 3,
    Shutdown = 4,
}

impl ServiceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Started,
            3 => Self::Stopping,
            4 => Self::Shutdown,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// A compiled route: id, root processor, and lifecycle state.
pub struct Route {
    id: String,
    root: Arc<dyn Processor>,
    state: AtomicU8,
    in_flight: AtomicUsize,
    drained: Notify,
}

impl Route {
    /// Create a stopped route around a compiled root processor.
    pub fn new(id: impl Into<String>, root: Arc<dyn Processor>) -> Self {
        Self {
            id: id.into(),
            root,
            state: AtomicU8::new(ServiceState::Stopped as u8),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    /// This route's id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Number of exchanges currently inside this route.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn transition(&self, from: ServiceState, to: ServiceState) -> Result<(), RouteError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|actual| RouteError::NotRunning {
                route_id: self.id.clone(),
                state: ServiceState::from_u8(actual).to_string(),
            })
    }

    /// Start admitting exchanges. Idempotent when already started.
    pub fn start(&self) -> Result<(), RouteError> {
        if self.state() == ServiceState::Started {
            return Ok(());
        }
        self.transition(ServiceState::Stopped, ServiceState::Starting)?;
        self.transition(ServiceState::Starting, ServiceState::Started)?;
        info!(route_id = %self.id, "route started");
        Ok(())
    }

    /// Stop the route gracefully: close admission, then wait up to
    /// `drain_timeout` for in-flight exchanges to complete. The route ends
    /// up `Stopped` either way; if the bound elapses the remaining
    /// exchanges are abandoned and reported in the error.
    pub async fn stop(&self, drain_timeout: Duration) -> Result<(), RouteError> {
        if self.state() == ServiceState::Stopped {
            return Ok(());
        }
        self.transition(ServiceState::Started, ServiceState::Stopping)?;
        info!(route_id = %self.id, in_flight = self.in_flight(), "route stopping, draining");

        let drain = async {
            loop {
                // Register the waiter before reading the counter so a
                // completion landing in between cannot lose its wakeup.
                let notified = self.drained.notified();
                if self.in_flight.load(Ordering::SeqCst) == 0 {
                    break;
                }
                notified.await;
            }
        };

        let result = match tokio::time::timeout(drain_timeout, drain).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let abandoned = self.in_flight.load(Ordering::SeqCst);
                warn!(
                    route_id = %self.id,
                    abandoned,
                    "drain timed out, abandoning in-flight exchanges"
                );
                Err(RouteError::DrainTimeout {
                    route_id: self.id.clone(),
                    abandoned,
                })
            }
        };

        self.transition(ServiceState::Stopping, ServiceState::Stopped)?;
        info!(route_id = %self.id, "route stopped");
        result
    }

    /// Final transition: a shut-down route can never be restarted.
    pub fn shutdown(&self) -> Result<(), RouteError> {
        let state = self.state();
        if state != ServiceState::Stopped {
            return Err(RouteError::NotStopped {
                route_id: self.id.clone(),
                state: state.to_string(),
            });
        }
        self.transition(ServiceState::Stopped, ServiceState::Shutdown)
    }

    /// Drive an exchange through this route to a terminal state.
    ///
    /// Admission requires the route to be `Started`. On return the
    /// exchange carries its terminal state: an unresolved failure is left
    /// as the exchange's exception, never silently dropped.
    #[instrument(skip(self, exchange), fields(route_id = %self.id, exchange_id = %exchange.id()))]
    pub async fn send(&self, exchange: &mut Exchange) -> Result<(), RouteError> {
        // Count first, check second: a concurrent stop() that observes the
        // state change will then also observe this exchange in flight.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.state() != ServiceState::Started {
            self.finish_one();
            return Err(RouteError::NotRunning {
                route_id: self.id.clone(),
                state: self.state().to_string(),
            });
        }

        self.root.process(exchange).await;

        if exchange.is_failed() {
            if exchange.pattern() == ExchangePattern::InOnly {
                // Fire-and-forget originators have no reply to inspect;
                // the failure surfaces here.
                error!(
                    exchange_id = %exchange.id(),
                    error = %exchange
                        .exception()
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                    "exchange finished with unrecovered failure"
                );
            }
        }

        self.finish_one();
        Ok(())
    }

    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}
