// Keyed periodic task scheduler
//
// Every task is one Tokio task ticking at a fixed rate. Tasks are tracked by
// key so a single one can be replaced or cancelled; cancelling takes effect
// at the next tick, never in the middle of a running execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("Task '{key}' has a zero period")]
    ZeroPeriod { key: String },
}

pub type Work = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct PeriodicTask {
    pub key: String,
    /// Wait before the first run
    pub delay: Duration,
    pub period: Duration,
    pub work: Work,
}

impl PeriodicTask {
    pub fn new<F>(key: impl Into<String>, delay: Duration, period: Duration, work: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            delay,
            period,
            work: Arc::new(work),
        }
    }
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("key", &self.key)
            .field("delay", &self.delay)
            .field("period", &self.period)
            .finish()
    }
}

#[derive(Clone)]
pub struct Scheduler {
    runtime: Handle,
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl Scheduler {
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn new() -> Self {
        Self {
            runtime: Handle::current(),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a task at a fixed rate, replacing any task with the same key
    pub fn schedule(&self, task: PeriodicTask) -> Result<(), ScheduleError> {
        let PeriodicTask {
            key,
            delay,
            period,
            work,
        } = task;

        if period.is_zero() {
            return Err(ScheduleError::ZeroPeriod { key });
        }

        debug!("Scheduling '{}' every {:?} after {:?}", key, period, delay);
        let handle = self.runtime.spawn(async move {
            let mut ticks = interval_at(Instant::now() + delay, period);
            loop {
                ticks.tick().await;
                work();
            }
        });

        if let Some(previous) = self.tasks.lock().insert(key, handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Returns false if no task had this key
    pub fn cancel(&self, key: &str) -> bool {
        match self.tasks.lock().remove(key) {
            Some(handle) => {
                debug!("Cancelling '{}'", key);
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every task
    pub fn stop(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain().collect();
        if tasks.is_empty() {
            return;
        }
        info!("Stopping {} periodic task(s)", tasks.len());
        for (_, handle) in tasks {
            handle.abort();
        }
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.tasks
            .lock()
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(key: &str, delay: u64, period: u64) -> (PeriodicTask, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let task = PeriodicTask::new(
            key,
            Duration::from_millis(delay),
            Duration::from_millis(period),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        (task, count)
    }

    #[tokio::test]
    async fn test_runs_at_fixed_rate() {
        let scheduler = Scheduler::new();
        let (task, count) = counting("motion", 0, 20);
        scheduler.schedule(task).unwrap();

        tokio::time::sleep(Duration::from_millis(110)).await;
        let runs = count.load(Ordering::SeqCst);
        assert!((3..=8).contains(&runs), "ran {} times", runs);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_initial_delay() {
        let scheduler = Scheduler::new();
        let (task, count) = counting("sonar", 80, 10);
        scheduler.schedule(task).unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(count.load(Ordering::SeqCst) > 0);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_zero_period_rejected() {
        let scheduler = Scheduler::new();
        let (task, _) = counting("bad", 0, 0);
        assert_eq!(
            scheduler.schedule(task),
            Err(ScheduleError::ZeroPeriod {
                key: "bad".to_string()
            })
        );
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_one_key() {
        let scheduler = Scheduler::new();
        let (touch, touch_count) = counting("touch", 0, 10);
        let (motion, motion_count) = counting("motion", 0, 10);
        scheduler.schedule(touch).unwrap();
        scheduler.schedule(motion).unwrap();

        assert!(scheduler.cancel("touch"));
        assert!(!scheduler.cancel("touch"));
        let frozen = touch_count.load(Ordering::SeqCst);
        let before = motion_count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(touch_count.load(Ordering::SeqCst), frozen);
        assert!(motion_count.load(Ordering::SeqCst) > before);
        assert!(scheduler.is_scheduled("motion"));
        assert!(!scheduler.is_scheduled("touch"));
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_stop_cancels_everything() {
        let scheduler = Scheduler::new();
        let (a, a_count) = counting("a", 0, 10);
        let (b, b_count) = counting("b", 0, 10);
        scheduler.schedule(a).unwrap();
        scheduler.schedule(b).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        scheduler.stop();
        assert!(scheduler.is_empty());
        // let any aborted task observe its cancellation
        tokio::task::yield_now().await;
        let frozen = (a_count.load(Ordering::SeqCst), b_count.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            (a_count.load(Ordering::SeqCst), b_count.load(Ordering::SeqCst)),
            frozen
        );
    }

    #[tokio::test]
    async fn test_same_key_replaces_task() {
        let scheduler = Scheduler::new();
        let (first, first_count) = counting("motion", 0, 10);
        let (second, second_count) = counting("motion", 0, 10);
        scheduler.schedule(first).unwrap();
        scheduler.schedule(second).unwrap();
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert!(second_count.load(Ordering::SeqCst) > 0);
        scheduler.stop();
    }
}
