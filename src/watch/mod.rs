//! Confirmation watching primitives
//!
//! - [`wait_for_result`]: bounded-retry polling loop shared by every chain family
//! - [`WatcherRegistry`]: dedup cache so concurrent watchers of the same
//!   transaction / task id share one in-flight poll

use crate::config::ExecutorConfig;
use crate::error::{ErrorCode, ExecutionError, ExecutionResult, SdkError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Poll until `poll` yields a value.
///
/// `Ok(None)` means "not yet" and polls again after `interval`. Errors are
/// retried until `max_retries` attempts have failed or `should_retry` vetoes
/// (it receives the number of failures so far and the error); the last error
/// is returned.
pub async fn wait_for_result<T, F, Fut, R>(
    mut poll: F,
    interval: Duration,
    max_retries: u32,
    should_retry: R,
) -> ExecutionResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ExecutionResult<Option<T>>>,
    R: Fn(u32, &ExecutionError) -> bool,
{
    let mut failures = 0u32;

    loop {
        match poll().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                trace!("Result not available yet, polling again in {:?}", interval);
            }
            Err(e) => {
                if !should_retry(failures, &e) {
                    return Err(e);
                }
                failures += 1;
                if failures >= max_retries {
                    debug!("Giving up after {} failed polls: {}", failures, e);
                    return Err(e);
                }
                debug!("Poll failed ({}/{}): {}", failures, max_retries, e);
            }
        }

        tokio::time::sleep(interval).await;
    }
}

/// Retry every error
pub fn always_retry(_failures: u32, _err: &ExecutionError) -> bool {
    true
}

/// Retry raw client errors and transient service failures, never a definitive answer
pub fn retry_transient(_failures: u32, err: &ExecutionError) -> bool {
    match err {
        ExecutionError::Chain(_) => true,
        ExecutionError::Sdk(e) => matches!(e.code, ErrorCode::Timeout | ErrorCode::ProviderUnavailable),
        ExecutionError::Ledger(_) | ExecutionError::Retry(_) => false,
    }
}

/// Polling parameters taken from the executor settings
#[derive(Debug, Clone, Copy)]
pub struct WatchParams {
    pub interval: Duration,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl From<&ExecutorConfig> for WatchParams {
    fn from(settings: &ExecutorConfig) -> Self {
        Self {
            interval: settings.poll_interval(),
            max_retries: settings.max_retries,
            timeout: settings.receipt_timeout(),
        }
    }
}

/// Canonical error for a watcher that outlived its timeout
pub fn timed_out(what: &str) -> SdkError {
    SdkError::new(ErrorCode::Timeout, format!("Timed out waiting for {}.", what))
}

type SharedWatch<T> = Shared<BoxFuture<'static, ExecutionResult<T>>>;

struct Inflight<T> {
    watcher: SharedWatch<T>,
    waiters: Arc<AtomicUsize>,
}

/// One waiter on an in-flight watcher. The last one to leave removes the
/// entry, whether it got a result, timed out or was cancelled.
struct WaiterGuard<'a, T> {
    inflight: &'a DashMap<String, Inflight<T>>,
    key: &'a str,
    waiters: Arc<AtomicUsize>,
}

impl<T> Drop for WaiterGuard<'_, T> {
    fn drop(&mut self) {
        if self.waiters.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        // a waiter may have joined since; it is counted under the shard lock
        self.inflight.remove_if(self.key, |_, current| {
            Arc::ptr_eq(&current.waiters, &self.waiters)
                && current.waiters.load(Ordering::SeqCst) == 0
        });
    }
}

/// In-flight watchers keyed by transaction hash / task id.
///
/// Created per executor instance and injected, so tests get a clean cache.
pub struct WatcherRegistry<T: Clone> {
    name: &'static str,
    inflight: DashMap<String, Inflight<T>>,
}

impl<T> WatcherRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inflight: DashMap::new(),
        }
    }

    /// Await the watcher for `key`, starting it with `start` only if none is in flight
    pub async fn watch<F>(&self, key: &str, start: F) -> ExecutionResult<T>
    where
        F: FnOnce() -> BoxFuture<'static, ExecutionResult<T>>,
    {
        let (watcher, waiters) = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                debug!("Joining in-flight {} watcher for {}", self.name, key);
                crate::metrics::record_watcher_dedup(self.name);
                let current = entry.get();
                current.waiters.fetch_add(1, Ordering::SeqCst);
                (current.watcher.clone(), current.waiters.clone())
            }
            Entry::Vacant(entry) => {
                let watcher = start().shared();
                let waiters = Arc::new(AtomicUsize::new(1));
                entry.insert(Inflight {
                    watcher: watcher.clone(),
                    waiters: waiters.clone(),
                });
                (watcher, waiters)
            }
        };

        let _guard = WaiterGuard {
            inflight: &self.inflight,
            key,
            waiters,
        };
        watcher.await
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    pub fn clear(&self) {
        self.inflight.clear();
    }
}
