//! Debounced idleness tracking for network activity.
//!
//! [`UriIdlingResource`] counts outstanding loads reported by the network
//! layer. Unlike a plain counter it does not report idle the moment the count
//! drops to zero: the count must stay at zero for the whole settle timeout.
//! A page whose responses each trigger another request goes 0 → 1 → 0 → 1
//! several times while loading, and none of those dips should count as idle.
//!
//! # State machine
//!
//! | Event                          | Effect                                  |
//! |--------------------------------|-----------------------------------------|
//! | `begin_load`, count 0 → 1      | busy, cancel pending idle transition    |
//! | `begin_load`, count N → N+1    | busy                                    |
//! | `end_load`, count N → 0        | schedule idle transition after timeout  |
//! | `end_load`, count N → N-1 > 0  | nothing                                 |
//! | idle transition fires          | idle, notify callback                   |
//! | idle transition fires, stale   | nothing                                 |
//!
//! # Thread Safety
//!
//! All entry points take `&self` and may be called from any thread. The
//! count and the idle flag share one atomic word, so the idle transition can
//! only land while the count is zero and a `begin_load` always clears it.
//! The pending task id is a separate atomic and may briefly name a task that
//! has already fired; cancelling such a task is a no-op.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::config::TrackerConfig;
use crate::error::IdleError;
use crate::pattern::{IgnoreList, UriPattern};
use crate::resource::{IdlingResource, LoadListener, ResourceCallback};
use crate::scheduler::{Scheduler, TaskId, TokioScheduler};
use crate::types::SettleTimeout;

/// Top bit of the state word: set while idle.
const IDLE: u64 = 1 << 63;
/// Remaining bits: outstanding load count.
const COUNT: u64 = IDLE - 1;

/// State shared with the scheduled idle transition.
struct Shared {
    name: String,
    /// Idle flag and outstanding count, see [`IDLE`] and [`COUNT`].
    state: AtomicU64,
    callback: RwLock<Option<Arc<dyn ResourceCallback>>>,
}

impl Shared {
    fn is_idle(&self) -> bool {
        self.state.load(Ordering::SeqCst) & IDLE != 0
    }

    fn outstanding(&self) -> u64 {
        self.state.load(Ordering::SeqCst) & COUNT
    }

    /// Clears the idle flag and increments the count. Returns the count
    /// before the increment.
    fn begin(&self) -> u64 {
        let previous = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |state| {
                Some(((state & COUNT) + 1) & COUNT)
            })
            .unwrap_or_else(|state| state);
        previous & COUNT
    }

    /// Decrements the count. Returns the count after the decrement, or
    /// `None` if it was already zero.
    fn end(&self) -> Option<u64> {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |state| {
                (state & COUNT != 0).then(|| state - 1)
            })
            .ok()
            .map(|previous| (previous & COUNT) - 1)
    }

    /// Body of the scheduled transition.
    ///
    /// Only a busy resource with no outstanding loads becomes idle. A stale
    /// timer that lost its cancellation race, or one that fires after the
    /// resource already settled, does nothing.
    fn settle(&self) {
        if let Err(state) =
            self.state
                .compare_exchange(0, IDLE, Ordering::SeqCst, Ordering::SeqCst)
        {
            tracing::debug!(
                resource = %self.name,
                outstanding = state & COUNT,
                idle = state & IDLE != 0,
                "skipping stale idle transition"
            );
            return;
        }
        tracing::debug!(resource = %self.name, "settled, transitioning to idle");
        self.notify();
    }

    /// Marks the resource idle regardless of the count and notifies.
    fn force_idle(&self) {
        self.state.fetch_or(IDLE, Ordering::SeqCst);
        self.notify();
    }

    fn notify(&self) {
        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback.on_transition_to_idle();
        }
    }
}

/// An [`IdlingResource`] that tracks network loads by URI.
///
/// See the [module documentation](self) for the state machine.
pub struct UriIdlingResource {
    shared: Arc<Shared>,
    settle_timeout: SettleTimeout,
    debug: bool,
    ignored: IgnoreList,
    /// Raw id of the pending idle transition, 0 when none.
    pending: AtomicU64,
    scheduler: Arc<dyn Scheduler>,
}

impl UriIdlingResource {
    /// Creates a resource that schedules its idle transition on the current
    /// Tokio runtime, with debug logging disabled.
    pub fn new(name: impl Into<String>, settle_timeout: Duration) -> Result<Self, IdleError> {
        let scheduler = TokioScheduler::current()?;
        Self::with_scheduler(name, settle_timeout, false, Arc::new(scheduler))
    }

    /// Creates a resource with an explicit scheduler.
    ///
    /// `debug` enables a log line for every counter change.
    pub fn with_scheduler(
        name: impl Into<String>,
        settle_timeout: Duration,
        debug: bool,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, IdleError> {
        let settle_timeout = SettleTimeout::new(settle_timeout)?;
        Ok(Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: AtomicU64::new(IDLE),
                callback: RwLock::new(None),
            }),
            settle_timeout,
            debug,
            ignored: IgnoreList::new(),
            pending: AtomicU64::new(0),
            scheduler,
        })
    }

    /// Builds a resource from configuration, registering its ignore patterns.
    pub fn from_config(
        config: &TrackerConfig,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, IdleError> {
        let patterns = config
            .ignore_patterns
            .iter()
            .map(|pattern| UriPattern::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        let resource = Self::with_scheduler(
            config.name.clone(),
            config.settle_timeout()?.get(),
            config.debug,
            scheduler,
        )?;
        for pattern in patterns {
            resource.ignore_uri(pattern);
        }
        Ok(resource)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub const fn settle_timeout(&self) -> SettleTimeout {
        self.settle_timeout
    }

    pub fn is_idle_now(&self) -> bool {
        self.shared.is_idle()
    }

    /// Number of loads begun and not yet ended.
    pub fn outstanding(&self) -> u64 {
        self.shared.outstanding()
    }

    /// Replaces the idle transition callback. Never invoked from this call.
    pub fn register_idle_transition_callback(&self, callback: Arc<dyn ResourceCallback>) {
        *self
            .shared
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Adds a pattern to the ignore list.
    ///
    /// URIs matching any ignored pattern (whole-string) are not counted.
    /// Patterns can only be added while the resource is idle: changing the
    /// filter mid-load would leave in-flight requests counted on one side
    /// and not the other. Calls made while busy are logged and dropped.
    pub fn ignore_uri(&self, pattern: UriPattern) {
        if !self.is_idle_now() {
            tracing::error!(
                resource = %self.shared.name,
                pattern = %pattern,
                "ignored patterns can only be added when the resource is idle"
            );
            return;
        }
        self.ignored.push(pattern);
    }

    /// Records the start of a request.
    pub fn begin_load(&self, uri: &str) {
        if self.uri_is_ignored(uri) {
            return;
        }
        let previous = self.shared.begin();
        if previous == 0 {
            self.cancel_pending();
        }
        if self.debug {
            tracing::info!(
                resource = %self.shared.name,
                count = previous + 1,
                "counter increased"
            );
        }
    }

    /// Records the completion of a request.
    ///
    /// When the count returns to zero the idle transition is scheduled for
    /// after the settle timeout.
    ///
    /// # Panics
    ///
    /// Panics if this call drives the count below zero, which means the
    /// caller ended more loads than it began.
    pub fn end_load(&self, uri: &str) {
        if self.uri_is_ignored(uri) {
            return;
        }
        let Some(count) = self.shared.end() else {
            panic!(
                "resource {}: counter has been corrupted! count=-1",
                self.shared.name
            );
        };
        if count == 0 {
            self.schedule_transition();
        }
        if self.debug {
            tracing::info!(resource = %self.shared.name, count, "counter decreased");
        }
    }

    /// Begins a load that ends when the returned guard is dropped.
    pub fn track(&self, uri: impl Into<String>) -> LoadGuard<'_> {
        let uri = uri.into();
        self.begin_load(&uri);
        LoadGuard {
            resource: self,
            uri,
        }
    }

    /// Runs the idle transition now instead of waiting for the timer.
    ///
    /// Any pending timer is cancelled so the transition is reported once.
    pub fn force_idle_transition(&self) {
        self.cancel_pending();
        self.shared.force_idle();
    }

    fn uri_is_ignored(&self, uri: &str) -> bool {
        let Some(pattern) = self.ignored.find_match(uri) else {
            return false;
        };
        tracing::info!(
            resource = %self.shared.name,
            uri,
            pattern = %pattern,
            "ignored URI"
        );
        true
    }

    fn schedule_transition(&self) {
        let shared = Arc::clone(&self.shared);
        let task = self
            .scheduler
            .schedule(self.settle_timeout.get(), Box::new(move || shared.settle()));
        tracing::debug!(
            resource = %self.shared.name,
            task = %task,
            timeout = %self.settle_timeout,
            "scheduled idle transition"
        );
        if let Some(previous) = TaskId::from_raw(self.pending.swap(task.get(), Ordering::SeqCst)) {
            self.scheduler.cancel(previous);
        }
    }

    fn cancel_pending(&self) {
        if let Some(task) = TaskId::from_raw(self.pending.swap(0, Ordering::SeqCst)) {
            self.scheduler.cancel(task);
            tracing::debug!(resource = %self.shared.name, task = %task, "cancelled idle transition");
        }
    }
}

impl fmt::Debug for UriIdlingResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UriIdlingResource")
            .field("name", &self.shared.name)
            .field("settle_timeout", &self.settle_timeout)
            .field("debug", &self.debug)
            .field("outstanding", &self.outstanding())
            .field("idle", &self.is_idle_now())
            .field("ignored", &self.ignored)
            .finish_non_exhaustive()
    }
}

impl IdlingResource for UriIdlingResource {
    fn name(&self) -> &str {
        Self::name(self)
    }

    fn is_idle_now(&self) -> bool {
        Self::is_idle_now(self)
    }

    fn register_idle_transition_callback(&self, callback: Arc<dyn ResourceCallback>) {
        Self::register_idle_transition_callback(self, callback);
    }
}

impl LoadListener for UriIdlingResource {
    fn begin_load(&self, uri: &str) {
        Self::begin_load(self, uri);
    }

    fn end_load(&self, uri: &str) {
        Self::end_load(self, uri);
    }
}

/// Ends its load on drop. Created by [`UriIdlingResource::track`].
#[must_use = "dropping the guard ends the load immediately"]
pub struct LoadGuard<'a> {
    resource: &'a UriIdlingResource,
    uri: String,
}

impl LoadGuard<'_> {
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl fmt::Debug for LoadGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadGuard")
            .field("resource", &self.resource.name())
            .field("uri", &self.uri)
            .finish()
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.resource.end_load(&self.uri);
    }
}
