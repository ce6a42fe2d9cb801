//! [`ReminderScheduler`] – one cancellable delayed action per session.
//!
//! Timers run on a private single-worker Tokio runtime so the rest of the
//! stack can stay synchronous.  Scheduling for a session that already has a
//! pending reminder aborts the old timer.  The scheduled action must
//! re-check that its session is still current when it fires; cancellation
//! alone cannot close the window between a timer expiring and the action
//! running.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cabinfuse_types::{CabinError, SessionId};
use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

type PendingMap = Arc<Mutex<HashMap<SessionId, Pending>>>;

pub struct ReminderScheduler {
    runtime: Option<Runtime>,
    pending: PendingMap,
    generation: AtomicU64,
    delay: Duration,
}

impl ReminderScheduler {
    /// Start the timer runtime.  Fails only if the OS refuses to spawn the
    /// worker thread.
    pub fn new(delay: Duration) -> Result<Self, CabinError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("cabinfuse-timer")
            .enable_time()
            .build()
            .map_err(|e| CabinError::Scheduler(e.to_string()))?;

        Ok(Self {
            runtime: Some(runtime),
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            delay,
        })
    }

    /// Run `action` after the configured delay unless cancelled or replaced.
    pub fn schedule<F>(&self, session_id: SessionId, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(runtime) = self.runtime.as_ref() else {
            return;
        };
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        let delay = self.delay;

        let mut guard = self.pending.lock();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut pending = pending.lock();
                if pending.get(&session_id).is_some_and(|p| p.generation == generation) {
                    pending.remove(&session_id);
                }
            }
            trace!(session = %session_id.short(), "reminder timer fired");
            action();
        });
        if let Some(previous) = guard.insert(session_id, Pending { generation, handle }) {
            previous.handle.abort();
            debug!(session = %session_id.short(), "reminder rescheduled");
        }
    }

    /// Cancel the pending reminder for `session_id`, if any.
    pub fn cancel(&self, session_id: SessionId) -> bool {
        match self.pending.lock().remove(&session_id) {
            Some(p) => {
                p.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Pending> = self.pending.lock().drain().map(|(_, p)| p).collect();
        for p in &drained {
            p.handle.abort();
        }
        drained.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        self.cancel_all();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let make = move || -> Box<dyn FnOnce() + Send> {
            let f = Arc::clone(&f);
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            })
        };
        (fired, make)
    }

    #[test]
    fn fires_after_delay() {
        let scheduler = ReminderScheduler::new(Duration::from_millis(50)).unwrap();
        let (fired, make) = counter();
        scheduler.schedule(SessionId::new(), make());
        assert_eq!(scheduler.pending_count(), 1);

        thread::sleep(Duration::from_millis(300));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn rescheduling_replaces_pending_timer() {
        let scheduler = ReminderScheduler::new(Duration::from_millis(50)).unwrap();
        let (fired, make) = counter();
        let id = SessionId::new();
        scheduler.schedule(id, make());
        scheduler.schedule(id, make());
        assert_eq!(scheduler.pending_count(), 1);

        thread::sleep(Duration::from_millis(300));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let scheduler = ReminderScheduler::new(Duration::from_millis(50)).unwrap();
        let (fired, make) = counter();
        let a = SessionId::new();
        scheduler.schedule(a, make());
        scheduler.schedule(SessionId::new(), make());

        assert!(scheduler.cancel(a));
        assert!(!scheduler.cancel(a));
        assert_eq!(scheduler.cancel_all(), 1);

        thread::sleep(Duration::from_millis(300));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_with_pending_timers_is_clean() {
        let scheduler = ReminderScheduler::new(Duration::from_secs(60)).unwrap();
        let (_, make) = counter();
        scheduler.schedule(SessionId::new(), make());
        drop(scheduler);
    }
}
