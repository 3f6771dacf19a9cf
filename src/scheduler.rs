//! Replace-or-cancel delayed task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Slot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// A single delayed job slot.
///
/// Scheduling replaces whatever was pending. Cancelling aborts it. Once the
/// delay elapses the job detaches itself from the slot before running, so a
/// later `cancel()` or `schedule()` never aborts a job that is already
/// executing its body.
///
/// Dropping the `DelayedTask` cancels the pending job.
pub struct DelayedTask {
    name: &'static str,
    slot: Arc<Mutex<Slot>>,
}

impl DelayedTask {
    /// Creates an empty slot. `name` is used in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Runs `job` after `delay`, replacing any pending job.
    ///
    /// Returns `false` without scheduling when called outside a Tokio runtime.
    pub fn schedule<F, Fut>(&self, delay: Duration, job: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(task = self.name, "no tokio runtime; delayed task not scheduled");
            return false;
        };

        let mut slot = self.slot.lock();
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
        slot.generation += 1;
        let generation = slot.generation;
        let shared = Arc::clone(&self.slot);
        let name = self.name;

        // The slot lock is held until `handle` is stored, so the job cannot
        // detach before there is anything to detach.
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = shared.lock();
                if slot.generation != generation {
                    return;
                }
                slot.handle = None;
            }
            tracing::trace!(task = name, "delayed task fired");
            job().await;
        });
        slot.handle = Some(handle);
        true
    }

    /// Aborts the pending job, if any. Returns `true` if one was pending.
    pub fn cancel(&self) -> bool {
        let mut slot = self.slot.lock();
        slot.generation += 1;
        match slot.handle.take() {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                if was_pending {
                    tracing::trace!(task = self.name, "delayed task cancelled");
                }
                was_pending
            }
            None => false,
        }
    }

    /// Returns `true` while a job is waiting for its delay to elapse.
    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for DelayedTask {
    fn drop(&mut self) {
        if let Some(handle) = self.slot.lock().handle.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for DelayedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedTask")
            .field("name", &self.name)
            .field("pending", &self.is_pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counter() -> (Arc<AtomicU32>, impl Fn() -> std::future::Ready<()> + Clone) {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let task = DelayedTask::new("test");
        let (count, job) = counter();

        assert!(task.schedule(Duration::from_millis(100), job));
        assert!(task.is_pending());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!task.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending() {
        let task = DelayedTask::new("test");
        let (count, job) = counter();

        for _ in 0..10 {
            task.schedule(Duration::from_millis(100), job.clone());
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let task = DelayedTask::new("test");
        let (count, job) = counter();

        task.schedule(Duration::from_millis(100), job);
        assert!(task.cancel());
        assert!(!task.cancel());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_does_not_abort_running_job() {
        let task = Arc::new(DelayedTask::new("test"));
        let finished = Arc::new(AtomicU32::new(0));

        let task_clone = Arc::clone(&task);
        let finished_clone = Arc::clone(&finished);
        task.schedule(Duration::from_millis(10), move || async move {
            // A running job may cancel its own slot (e.g. while rescheduling).
            task_clone.cancel();
            tokio::time::sleep(Duration::from_millis(50)).await;
            finished_clone.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (count, job) = counter();
        {
            let task = DelayedTask::new("test");
            task.schedule(Duration::from_millis(100), job);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_schedule_outside_runtime() {
        let task = DelayedTask::new("test");
        assert!(!task.schedule(Duration::from_millis(1), || async {}));
        assert!(!task.is_pending());
    }
}
