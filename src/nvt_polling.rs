// Recurring poll timer for the active route
use crate::nvt_models::RouteSelection;
use log::debug;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Generation number of a polling context. Every `start` hands out a new one,
/// so work tagged with an older id can be recognised as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PollingContext {
    pub id: ContextId,
    pub selection: RouteSelection,
}

struct ActivePoll {
    context: PollingContext,
    timer: JoinHandle<()>,
}

/// At most one timer is alive at any time.
pub struct PollingScheduler {
    interval: Duration,
    next_id: u64,
    active: Option<ActivePoll>,
}

impl PollingScheduler {
    pub fn new(interval: Duration) -> Self {
        PollingScheduler { interval, next_id: 0, active: None }
    }

    /// Cancel any running timer, run `tick` once right away, then every interval.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start<F>(&mut self, selection: RouteSelection, mut tick: F) -> ContextId
    where
        F: FnMut(ContextId) + Send + 'static,
    {
        self.stop();

        self.next_id += 1;
        let id = ContextId(self.next_id);

        tick(id);

        let period = self.interval;
        let timer = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks = IntervalStream::new(interval);
            while ticks.next().await.is_some() {
                tick(id);
            }
        });

        debug!("Polling {} every {:?} as {}", selection, period, id);
        self.active = Some(ActivePoll {
            context: PollingContext { id, selection },
            timer,
        });
        id
    }

    /// Cancel the timer and forget the context. No-op when idle.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.timer.abort();
            debug!("Stopped polling {} ({})", active.context.selection, active.context.id);
        }
    }

    pub fn current(&self) -> Option<&PollingContext> {
        self.active.as_ref().map(|a| &a.context)
    }

    pub fn is_current(&self, id: ContextId) -> bool {
        self.current().is_some_and(|context| context.id == id)
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
