//! Poller framework (spec §4.2): an abstract producer that snapshots a
//! hostname source on an interval and fans the snapshot out to
//! subscribers.
//!
//! The original companion models a subscriber as a `callable -> Queue`
//! pair with capacity 1 and drop-oldest-on-overflow semantics. A
//! [`tokio::sync::watch`] channel is the idiomatic Rust equivalent: every
//! subscriber holds its own [`watch::Receiver`], only the latest value is
//! retained, and a slow subscriber never blocks the producer. This is
//! exactly the backpressure policy spec §5 calls for ("snapshots are
//! full-state, so dropping intermediate snapshots is safe").

pub mod docker;
pub mod traefik;

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Default number of attempts the backoff helper makes before giving up
/// and surfacing the caller's fallback value (spec §4.2, default 5).
pub const DEFAULT_BACKOFF_MAX_RETRIES: u32 = 5;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Tags a hostname snapshot with the poller that produced it. Lower
/// numeric rank wins when the sync manager decides whether to re-sync an
/// already-synced hostname (spec §3 "Synced map").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HostnameSource {
    Container = 1,
    ProxyRouter = 2,
    Manual = 3,
}

impl HostnameSource {
    pub fn rank(self) -> u8 {
        self as u8
    }
}

/// A complete, idempotent view of the hostnames a single poller observed
/// at one tick (spec §3 "Hostname event").
#[derive(Debug, Clone)]
pub struct HostnameSnapshot {
    pub hostnames: Vec<String>,
    pub source: HostnameSource,
    pub timestamp: Instant,
}

impl HostnameSnapshot {
    pub fn empty(source: HostnameSource) -> Self {
        HostnameSnapshot {
            hostnames: Vec::new(),
            source,
            timestamp: Instant::now(),
        }
    }

    pub fn new(hostnames: Vec<String>, source: HostnameSource) -> Self {
        HostnameSnapshot {
            hostnames,
            source,
            timestamp: Instant::now(),
        }
    }
}

/// A retryable failure from a single fetch attempt. `fallback` is the
/// value [`async_backoff`] returns if every retry is exhausted; for
/// pollers this is always an empty snapshot, turning a transport error
/// into "nothing observed this tick" rather than a hard failure (spec §7
/// "Transport error").
#[derive(Debug)]
pub struct BackoffError<T> {
    pub fallback: T,
}

/// Retries `attempt` with exponential backoff until it succeeds or
/// `max_retries` attempts have been made, in which case the last
/// fallback value is returned. Every sleep between attempts is awaited,
/// spec §9 flags that the original implementation forgets to `await` one
/// of its backoff sleeps; this helper makes that impossible to repeat.
///
/// `cancel` is raced against every backoff sleep so a shutdown signal
/// aborts a mid-backoff poller immediately rather than waiting out the
/// rest of the retry schedule (spec §5 "Cancellation during a backoff
/// sleep aborts immediately").
pub async fn async_backoff<F, Fut, T>(mut attempt: F, max_retries: u32, cancel: &CancellationToken) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackoffError<T>>>,
{
    let mut backoff = DEFAULT_INITIAL_BACKOFF;
    let mut last_fallback = None;

    for attempt_num in 0..max_retries.max(1) {
        match attempt().await {
            Ok(value) => return value,
            Err(BackoffError { fallback }) => {
                tracing::warn!(
                    attempt = attempt_num + 1,
                    backoff_secs = backoff.as_secs(),
                    "fetch failed, backing off"
                );
                last_fallback = Some(fallback);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("backoff sleep cancelled");
                        return last_fallback.expect("just set above");
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(DEFAULT_MAX_BACKOFF);
            }
        }
    }

    last_fallback.expect("loop runs at least once since max_retries.max(1) >= 1")
}

/// Common poller contract (spec §4.2). Concrete pollers implement
/// [`Poller::fetch`] and the framework's default [`Poller::run`] handles
/// interval ticking, cancellation, an optional overall deadline, and
/// publishing to subscribers.
#[async_trait]
pub trait Poller: Send + Sync {
    fn source(&self) -> HostnameSource;
    fn poll_interval(&self) -> Duration;

    /// Takes one snapshot. Must not fail outright: transport errors are
    /// expected to be absorbed internally (via [`async_backoff`]) into an
    /// empty snapshot so one failed tick never stops the poller (spec
    /// §4.2 "Loop semantics"). `cancel` is passed through to
    /// [`async_backoff`] so a shutdown mid-retry aborts immediately.
    async fn fetch(&self, cancel: &CancellationToken) -> HostnameSnapshot;

    /// Registers a new subscriber; it observes every snapshot published
    /// from this point on, plus whatever is currently buffered.
    fn subscribe(&self) -> watch::Receiver<HostnameSnapshot>;

    /// Publishes a snapshot to all current subscribers (spec §4.2
    /// "emit()"). Dropped if nobody is subscribed.
    fn publish(&self, snapshot: HostnameSnapshot);

    /// Runs the poll loop until cancelled or, if `timeout` is set, until
    /// the overall deadline elapses.
    async fn run(&self, cancel: CancellationToken, timeout: Option<Duration>) {
        let deadline = timeout.map(|d| tokio::time::Instant::now() + d);
        let mut ticker = tokio::time::interval(self.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(source = ?self.source(), interval_secs = self.poll_interval().as_secs(), "starting poller");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(source = ?self.source(), "poller cancelled");
                    return;
                }
                _ = async {
                    if let Some(deadline) = deadline {
                        tokio::time::sleep_until(deadline).await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                }, if deadline.is_some() => {
                    tracing::info!(source = ?self.source(), "poller reached its deadline, stopping");
                    return;
                }
                _ = ticker.tick() => {
                    let snapshot = self.fetch(&cancel).await;
                    self.publish(snapshot);
                }
            }
        }
    }
}

/// Shared plumbing every concrete poller embeds: the watch channel that
/// stands in for the original's per-subscriber queue map.
pub struct Broadcaster {
    sender: watch::Sender<HostnameSnapshot>,
}

impl Broadcaster {
    pub fn new(source: HostnameSource) -> Self {
        let (sender, _receiver) = watch::channel(HostnameSnapshot::empty(source));
        Broadcaster { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<HostnameSnapshot> {
        self.sender.subscribe()
    }

    pub fn publish(&self, snapshot: HostnameSnapshot) {
        // No receivers yet is not an error: a poller may start emitting
        // before the sync manager has subscribed.
        let _ = self.sender.send(snapshot);
    }
}
