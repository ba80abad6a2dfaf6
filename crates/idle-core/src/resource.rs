//! Traits at the two edges of a tracker.
//!
//! The test harness sees an [`IdlingResource`]: it polls
//! [`is_idle_now`](IdlingResource::is_idle_now) and registers one
//! [`ResourceCallback`] to be woken on each busy → idle edge.
//!
//! The network layer sees a [`LoadListener`]: it reports every request start
//! and finish.

use std::sync::Arc;

/// Notified when a resource becomes idle.
pub trait ResourceCallback: Send + Sync {
    fn on_transition_to_idle(&self);
}

impl<F> ResourceCallback for F
where
    F: Fn() + Send + Sync,
{
    fn on_transition_to_idle(&self) {
        self();
    }
}

/// Resource polled by a UI-test harness before each action.
pub trait IdlingResource: Send + Sync {
    /// Label used in diagnostics.
    fn name(&self) -> &str;

    /// Returns true if the resource is currently idle.
    fn is_idle_now(&self) -> bool;

    /// Replaces the transition callback.
    ///
    /// The callback is only invoked for transitions that happen after this
    /// call, never synchronously from it.
    fn register_idle_transition_callback(&self, callback: Arc<dyn ResourceCallback>);
}

/// Receives request lifecycle notifications from the network layer.
///
/// Every `begin_load` must be paired with exactly one later `end_load` for
/// the same logical request.
pub trait LoadListener: Send + Sync {
    fn begin_load(&self, uri: &str);

    fn end_load(&self, uri: &str);
}
