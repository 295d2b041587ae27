//! Per-client bookkeeping around generations: late results from superseded
//! requests are dropped, and the loading indicator is cleared exactly once
//! per request on every exit path.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("result of request #{stale} discarded; request #{latest} superseded it")]
pub struct Superseded {
    pub stale: u64,
    pub latest: u64,
}

#[derive(Debug, Default)]
struct IndicatorState {
    in_flight: usize,
    cleared: u64,
}

/// "Generating..." indicator. Shown while any guard is alive.
#[derive(Debug, Default)]
pub struct LoadingIndicator {
    state: Mutex<IndicatorState>,
}

impl LoadingIndicator {
    pub fn begin(self: &Arc<Self>) -> LoadingGuard {
        self.state.lock().in_flight += 1;
        LoadingGuard { indicator: Some(Arc::clone(self)) }
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().in_flight > 0
    }

    /// Number of times a guard has cleared the indicator.
    pub fn cleared_count(&self) -> u64 {
        self.state.lock().cleared
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.cleared += 1;
    }
}

#[must_use = "dropping the guard clears the loading indicator"]
pub struct LoadingGuard {
    indicator: Option<Arc<LoadingIndicator>>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        if let Some(indicator) = self.indicator.take() {
            indicator.clear();
        }
    }
}

#[derive(Debug, Default)]
pub struct FittingSession {
    latest: Mutex<u64>,
    loading: Arc<LoadingIndicator>,
}

impl FittingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a generation: newer tickets supersede older ones.
    pub fn begin(&self) -> (Ticket, LoadingGuard) {
        let mut latest = self.latest.lock();
        *latest += 1;
        (Ticket(*latest), self.loading.begin())
    }

    /// Hand back `value` only if no newer generation started meanwhile.
    pub fn commit<T>(&self, ticket: Ticket, value: T) -> Result<T, Superseded> {
        let latest = *self.latest.lock();
        if ticket.0 == latest {
            Ok(value)
        } else {
            info!("🗑️ Discarding late result of request #{} (latest #{})", ticket.0, latest);
            Err(Superseded { stale: ticket.0, latest })
        }
    }

    pub fn loading(&self) -> &Arc<LoadingIndicator> {
        &self.loading
    }

    pub fn is_idle(&self) -> bool {
        !self.loading.is_loading()
    }
}
