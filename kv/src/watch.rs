//! Level-triggered watch loops.
//!
//! A watch re-reads its key or prefix on every cycle and hands the current
//! value(s) to the callback, whether or not they changed since the last
//! cycle. Intermediate states between two polls are not observed. Failed
//! reads are logged and retried with exponential backoff; only
//! cancellation, a closed store or an invalid key end the loop.

use std::time::Duration;

use coordkv_codec::Codec;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::duration;
use crate::{Backend, KVResult, Record, WatchCursor};

/// Poll pacing for watches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WatchPolicy {
    /// Delay between two successful polls.
    #[serde(default = "default_interval", with = "duration")]
    pub interval: Duration,

    /// Upper bound of the delay after consecutive failures.
    #[serde(default = "default_max_backoff", with = "duration")]
    pub max_backoff: Duration,

    /// Random extra delay, as a fraction of the computed delay (0.0 to 1.0).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for WatchPolicy {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_backoff: default_max_backoff(),
            jitter: default_jitter(),
        }
    }
}

impl WatchPolicy {
    /// Floor applied to `interval`.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

    /// A policy polling every `interval`, with default backoff and jitter.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the next poll after `failures` consecutive failed polls,
    /// without jitter.
    pub fn base_delay(&self, failures: u32) -> Duration {
        let interval = self.interval.max(Self::MIN_INTERVAL);
        if failures == 0 {
            return interval;
        }
        let cap = self.max_backoff.max(interval);
        interval
            .saturating_mul(1u32 << failures.min(16))
            .min(cap)
    }

    /// [`base_delay`](Self::base_delay) plus random jitter.
    pub fn next_delay(&self, failures: u32) -> Duration {
        let base = self.base_delay(failures);
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if jitter == 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.0..=jitter);
        let extra = Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(base);
        base.saturating_add(extra)
    }
}

/// What a watch reads on every cycle.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Target<'a> {
    Key(&'a str),
    Prefix(&'a str),
}

impl Target<'_> {
    async fn poll(
        &self,
        backend: &dyn Backend,
        cursor: WatchCursor,
    ) -> KVResult<(Vec<Record>, WatchCursor)> {
        match *self {
            Target::Key(key) => {
                let (record, next) = backend.watch_get(key, cursor).await?;
                Ok((record.into_iter().collect(), next))
            }
            Target::Prefix(prefix) => backend.watch_scan(prefix, cursor).await,
        }
    }

    fn as_str(&self) -> &str {
        match *self {
            Target::Key(s) | Target::Prefix(s) => s,
        }
    }
}

/// Stop signals a watch loop listens to: the caller's token and the
/// store's shutdown token.
pub(crate) struct Stop<'a> {
    pub caller: &'a CancellationToken,
    pub shutdown: &'a CancellationToken,
}

impl Stop<'_> {
    fn is_set(&self) -> bool {
        self.caller.is_cancelled() || self.shutdown.is_cancelled()
    }

    async fn wait(&self) {
        tokio::select! {
            _ = self.caller.cancelled() => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    /// Sleeps for `delay`; returns false if stopped first.
    async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.wait() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Runs a watch until stopped, delivering `(key, value)` for every record
/// read on every cycle.
pub(crate) async fn run<C, F>(
    backend: &dyn Backend,
    codec: &C,
    policy: &WatchPolicy,
    stop: Stop<'_>,
    target: Target<'_>,
    mut deliver: F,
) -> KVResult<()>
where
    C: Codec,
    F: FnMut(&str, C::Value),
{
    let mut cursor = WatchCursor::default();
    let mut failures: u32 = 0;
    debug!(backend = backend.name(), watch = target.as_str(), "watch started");

    loop {
        let polled = tokio::select! {
            biased;
            _ = stop.wait() => break,
            polled = target.poll(backend, cursor) => polled,
        };

        match polled {
            Ok((records, next)) => {
                failures = 0;
                cursor = next;
                trace!(watch = target.as_str(), records = records.len(), "watch poll");
                for record in records {
                    let value = match codec.decode(&record.value) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(key = %record.key, error = %e, "watch: skipping undecodable value");
                            continue;
                        }
                    };
                    if stop.is_set() {
                        break;
                    }
                    deliver(&record.key, value);
                }
            }
            Err(e) if e.is_terminal() => {
                debug!(watch = target.as_str(), error = %e, "watch ended");
                return Err(e);
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                warn!(
                    watch = target.as_str(),
                    failures,
                    error = %e,
                    "watch: poll failed"
                );
            }
        }

        if !stop.sleep(policy.next_delay(failures)).await {
            break;
        }
    }

    debug!(watch = target.as_str(), "watch stopped");
    Ok(())
}

/// A watch running on its own task.
///
/// Dropping the handle leaves the watch running; call
/// [`cancel`](Self::cancel) or [`stop`](Self::stop) to end it.
#[derive(Debug)]
pub struct WatchHandle {
    cancel: CancellationToken,
    task: JoinHandle<KVResult<()>>,
}

impl WatchHandle {
    pub(crate) fn new(cancel: CancellationToken, task: JoinHandle<KVResult<()>>) -> Self {
        Self { cancel, task }
    }

    /// Signals the watch to stop without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns the token that stops this watch.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the watch and waits for its loop to exit.
    pub async fn stop(self) -> KVResult<()> {
        self.cancel.cancel();
        self.join().await
    }

    /// Waits for the watch to end on its own (terminal error or close).
    pub async fn join(self) -> KVResult<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Ok(()),
        }
    }
}
