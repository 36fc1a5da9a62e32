//! Per-account Gmail poller: cursor state machine over a history feed.
//!
//! Each tick:
//! 1. Uninitialized: fetch the high-water position and persist it
//! 2. Tracking(p): fetch entries after `p`, run each through the pipeline,
//!    persist the new position
//! 3. Resetting: the saved position expired at the source; jump to the
//!    current high-water position without replaying the gap
//!
//! A failed fetch or save leaves the state untouched for the next tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::channels::cursor::CursorStore;
use crate::channels::gmail::{self, HistorySource};
use crate::pipeline::{Pipeline, Rule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// No usable cursor yet.
    Uninitialized,
    Tracking(u64),
    /// Saved cursor expired; waiting on a fresh high-water position.
    Resetting,
}

/// Result of a single tick, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Initialized { position: u64 },
    Processed { entries: usize, position: u64 },
    Reset { position: u64 },
    /// Fetch or save failed; nothing changed.
    Skipped,
}

pub struct CursorPoller {
    account: String,
    source: Arc<dyn HistorySource>,
    store: Arc<dyn CursorStore>,
    pipeline: Pipeline,
    rules: Vec<Rule>,
    state: PollerState,
}

impl CursorPoller {
    pub fn new(
        account: impl Into<String>,
        source: Arc<dyn HistorySource>,
        store: Arc<dyn CursorStore>,
        pipeline: Pipeline,
        rules: Vec<Rule>,
    ) -> Self {
        Self {
            account: account.into(),
            source,
            store,
            pipeline,
            rules,
            state: PollerState::Uninitialized,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Resume from the persisted cursor, or initialize from the source.
    pub async fn start(&mut self) {
        match self.store.load(&self.account).await {
            Ok(Some(position)) if position > 0 => {
                info!(account = %self.account, position, "Gmail poller resuming");
                self.state = PollerState::Tracking(position);
            }
            Ok(_) => {
                info!(account = %self.account, "No saved Gmail cursor, initializing");
                self.initialize().await;
            }
            Err(e) => {
                warn!(account = %self.account, error = %e, "Failed to load Gmail cursor, initializing");
                self.initialize().await;
            }
        }
    }

    /// Advance the state machine by one step. Never fails.
    pub async fn run_poll_tick(&mut self) -> TickOutcome {
        match self.state {
            PollerState::Uninitialized => self.initialize().await,
            PollerState::Resetting => self.reset().await,
            PollerState::Tracking(position) => self.poll_from(position).await,
        }
    }

    async fn initialize(&mut self) -> TickOutcome {
        let position = match self.fetch_and_save_high_water().await {
            Ok(position) => position,
            Err(e) => {
                warn!(account = %self.account, error = %e, "Gmail poller initialization failed");
                return TickOutcome::Skipped;
            }
        };
        info!(account = %self.account, position, "Gmail poller initialized");
        self.state = PollerState::Tracking(position);
        TickOutcome::Initialized { position }
    }

    async fn reset(&mut self) -> TickOutcome {
        let position = match self.fetch_and_save_high_water().await {
            Ok(position) => position,
            Err(e) => {
                warn!(account = %self.account, error = %e, "Gmail cursor reset failed");
                return TickOutcome::Skipped;
            }
        };
        info!(account = %self.account, position, "Gmail cursor reset");
        self.state = PollerState::Tracking(position);
        TickOutcome::Reset { position }
    }

    async fn fetch_and_save_high_water(&self) -> crate::error::Result<u64> {
        let position = self.source.fetch_high_water_position().await?;
        self.store.save(&self.account, position).await?;
        Ok(position)
    }

    async fn poll_from(&mut self, position: u64) -> TickOutcome {
        let page = match self.source.fetch_history_since(position).await {
            Ok(page) => page,
            Err(e) if e.is_cursor_expired() => {
                warn!(account = %self.account, position, "Gmail history position expired, resetting");
                self.state = PollerState::Resetting;
                return self.reset().await;
            }
            Err(e) => {
                warn!(account = %self.account, position, error = %e, "Gmail poll failed");
                return TickOutcome::Skipped;
            }
        };

        let entries = page.entries.len();
        if entries > 0 {
            info!(account = %self.account, entries, "Gmail poll: new messages");
        }
        for msg in &page.entries {
            let event = gmail::normalize(&self.account, msg);
            let outcome = self.pipeline.process(event, &self.rules).await;
            debug!(account = %self.account, id = %msg.id, outcome = outcome.label(), "Processed message");
        }

        let next = page.new_position.max(position);
        if let Err(e) = self.store.save(&self.account, next).await {
            error!(account = %self.account, position = next, error = %e, "Failed to save Gmail cursor");
            return TickOutcome::Skipped;
        }
        self.state = PollerState::Tracking(next);
        TickOutcome::Processed {
            entries,
            position: next,
        }
    }
}

/// Cooperative stop signal for a poller task.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Resolves once `trigger` has been called.
    pub async fn triggered(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

/// Spawn a background task that ticks `poller` every `interval`.
///
/// Returns a `JoinHandle` and a shutdown signal. Triggering it stops further
/// ticks; a tick already running finishes first.
pub fn spawn_gmail_poller(
    mut poller: CursorPoller,
    interval: Duration,
) -> (JoinHandle<()>, Arc<ShutdownSignal>) {
    let shutdown = Arc::new(ShutdownSignal::default());
    let shutdown_signal = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            account = %poller.account(),
            interval_secs = interval.as_secs(),
            rules = poller.rules.len(),
            "Gmail poller started"
        );

        poller.start().await;

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip immediate first tick
        tick.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    info!(account = %poller.account(), "Gmail poller shutting down");
                    return;
                }
                _ = tick.tick() => {}
            }

            poller.run_poll_tick().await;
        }
    });

    (handle, shutdown_signal)
}
