//! Delayed-action scheduling.
//!
//! The tracker never sleeps on the caller's thread. It hands its idle
//! transition to a [`Scheduler`], which runs it later unless cancelled.
//!
//! Two implementations are provided:
//! - [`TokioScheduler`]: runs actions on a Tokio runtime after a real delay.
//! - [`ManualScheduler`]: a virtual clock driven explicitly by tests.
//!
//! # Contract
//!
//! - An action runs at most once.
//! - After `cancel` returns, the cancelled action does not start.
//! - Cancelling an unknown, already fired, or already cancelled task is a no-op.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::error::IdleError;

/// A zero-argument action run once by a scheduler.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a scheduled action so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(NonZeroU64);

impl TaskId {
    /// Wraps a raw id. Returns `None` for zero.
    pub const fn from_raw(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Returns the raw, non-zero id.
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Hands out task ids starting at 1.
#[derive(Debug)]
struct TaskIds(AtomicU64);

impl TaskIds {
    const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    fn next(&self) -> TaskId {
        let raw = self.0.fetch_add(1, Ordering::Relaxed);
        TaskId::from_raw(raw).unwrap_or(TaskId(NonZeroU64::MIN))
    }
}

/// Runs actions after a delay.
pub trait Scheduler: Send + Sync {
    /// Schedules `action` to run once after `delay`.
    fn schedule(&self, delay: Duration, action: Action) -> TaskId;

    /// Cancels a scheduled action if it has not started yet.
    fn cancel(&self, task: TaskId);
}

/// Scheduler backed by a Tokio runtime.
///
/// Each action gets its own task that sleeps for the delay. Whether an action
/// fires or is cancelled is decided by whoever removes it from the task table
/// first, so the two never both happen.
pub struct TokioScheduler {
    handle: Handle,
    ids: TaskIds,
    tasks: Arc<Mutex<HashMap<TaskId, AbortHandle>>>,
}

impl TokioScheduler {
    /// Creates a scheduler that spawns onto `handle`.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            ids: TaskIds::new(),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Creates a scheduler bound to the runtime of the calling context.
    pub fn current() -> Result<Self, IdleError> {
        Ok(Self::new(Handle::try_current()?))
    }

    /// Number of actions that are scheduled and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, action: Action) -> TaskId {
        let id = self.ids.next();
        let tasks = Arc::clone(&self.tasks);

        // Hold the table lock across the spawn so the task cannot look itself
        // up before it has been registered.
        let mut table = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let claimed = tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id)
                .is_some();
            if claimed {
                tracing::trace!(task = %id, "firing scheduled action");
                action();
            }
        });
        table.insert(id, join.abort_handle());
        drop(table);

        tracing::trace!(task = %id, ?delay, "scheduled action");
        id
    }

    fn cancel(&self, task: TaskId) {
        let removed = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task);
        if let Some(abort) = removed {
            abort.abort();
            tracing::trace!(task = %task, "cancelled scheduled action");
        }
    }
}

struct ManualTask {
    due: Duration,
    action: Action,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    tasks: BTreeMap<TaskId, ManualTask>,
}

impl ManualState {
    /// Removes the earliest task due at or before `limit`. Ties go to the
    /// task scheduled first.
    fn take_due(&mut self, limit: Duration) -> Option<(TaskId, ManualTask)> {
        let id = self
            .tasks
            .iter()
            .filter(|(_, task)| task.due <= limit)
            .min_by_key(|(id, task)| (task.due, **id))
            .map(|(id, _)| *id)?;
        self.tasks.remove(&id).map(|task| (id, task))
    }
}

/// Deterministic scheduler for tests.
///
/// Time only moves when [`advance`](Self::advance) is called. Due actions run
/// synchronously on the calling thread, in due order. Actions may schedule or
/// cancel further work while running.
pub struct ManualScheduler {
    ids: TaskIds,
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            ids: TaskIds::new(),
            state: Mutex::new(ManualState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current virtual time, measured from creation.
    pub fn now(&self) -> Duration {
        self.state().now
    }

    /// Number of actions waiting to run.
    pub fn pending(&self) -> usize {
        self.state().tasks.len()
    }

    /// Moves the clock forward by `by`, running every action that becomes due.
    ///
    /// Returns the number of actions run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now().saturating_add(by);
        let mut ran = 0;
        loop {
            let next = {
                let mut state = self.state();
                let next = state.take_due(target);
                if let Some((_, task)) = &next {
                    state.now = state.now.max(task.due);
                }
                next
            };
            let Some((id, task)) = next else { break };
            tracing::trace!(task = %id, "running manual action");
            (task.action)();
            ran += 1;
        }
        let mut state = self.state();
        state.now = state.now.max(target);
        ran
    }

    /// Runs every pending action regardless of its due time, advancing the
    /// clock to the last one.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = {
                let mut state = self.state();
                let next = state.take_due(Duration::MAX);
                if let Some((_, task)) = &next {
                    state.now = state.now.max(task.due);
                }
                next
            };
            let Some((_, task)) = next else { break };
            (task.action)();
            ran += 1;
        }
        ran
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("pending", &state.tasks.len())
            .finish()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, action: Action) -> TaskId {
        let id = self.ids.next();
        let mut state = self.state();
        let due = state.now.saturating_add(delay);
        state.tasks.insert(id, ManualTask { due, action });
        id
    }

    fn cancel(&self, task: TaskId) {
        self.state().tasks.remove(&task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_action(counter: &Arc<AtomicUsize>) -> Action {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn task_id_rejects_zero() {
        assert!(TaskId::from_raw(0).is_none());
        assert_eq!(TaskId::from_raw(7).unwrap().get(), 7);
        assert_eq!(TaskId::from_raw(7).unwrap().to_string(), "task#7");
    }

    #[test]
    fn manual_runs_only_when_due() {
        let scheduler = ManualScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(Duration::from_millis(100), counter_action(&fired));

        assert_eq!(scheduler.advance(Duration::from_millis(99)), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 1);

        assert_eq!(scheduler.advance(Duration::from_millis(1)), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.now(), Duration::from_millis(100));
    }

    #[test]
    fn manual_cancel_prevents_run() {
        let scheduler = ManualScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let id = scheduler.schedule(Duration::from_millis(10), counter_action(&fired));
        scheduler.cancel(id);
        // Second cancel is a no-op.
        scheduler.cancel(id);

        assert_eq!(scheduler.advance(Duration::from_secs(1)), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn manual_runs_in_due_order() {
        let scheduler = ManualScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, delay) in [("late", 30), ("early", 10), ("tie-a", 20), ("tie-b", 20)] {
            let order = Arc::clone(&order);
            scheduler.schedule(
                Duration::from_millis(delay),
                Box::new(move || order.lock().unwrap().push(label)),
            );
        }

        assert_eq!(scheduler.advance(Duration::from_millis(30)), 4);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["early", "tie-a", "tie-b", "late"]
        );
    }

    #[test]
    fn manual_action_can_reschedule() {
        let scheduler = Arc::new(ManualScheduler::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let inner = {
            let scheduler = Arc::clone(&scheduler);
            let fired = Arc::clone(&fired);
            Box::new(move || {
                scheduler.schedule(Duration::from_millis(5), counter_action(&fired));
            })
        };
        scheduler.schedule(Duration::from_millis(5), inner);

        // Both the first action and the one it schedules fall within 10ms.
        assert_eq!(scheduler.advance(Duration::from_millis(10)), 2);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manual_run_all_ignores_due_time() {
        let scheduler = ManualScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(Duration::from_secs(60), counter_action(&fired));
        scheduler.schedule(Duration::from_secs(1), counter_action(&fired));

        assert_eq!(scheduler.run_all(), 2);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.now(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_fires_after_delay() {
        let scheduler = TokioScheduler::current().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(Duration::from_millis(100), counter_action(&fired));
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_cancel_prevents_fire() {
        let scheduler = TokioScheduler::current().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let id = scheduler.schedule(Duration::from_millis(100), counter_action(&fired));
        scheduler.cancel(id);
        scheduler.cancel(id);
        assert_eq!(scheduler.pending(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tokio_current_requires_runtime() {
        assert!(matches!(
            TokioScheduler::current(),
            Err(IdleError::NoRuntime(_))
        ));
    }
}
