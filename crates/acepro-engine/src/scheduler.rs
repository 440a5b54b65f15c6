//! Timer abstraction.
//!
//! Engine code never calls the runtime's clock or sleep directly, so a host
//! with its own event loop only has to provide this trait.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::Instant;

/// Boxed future returned by [`Scheduler`] methods.
pub type SchedulerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub trait Scheduler: Send + Sync + 'static {
    /// Monotonic now.
    fn now(&self) -> Instant;

    /// Cooperative sleep.
    fn sleep(&self, duration: Duration) -> SchedulerFuture;

    /// Run a background task.
    fn spawn(&self, task: SchedulerFuture);
}

/// Tokio-backed scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl TokioScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> SchedulerFuture {
        Box::pin(tokio::time::sleep(duration))
    }

    fn spawn(&self, task: SchedulerFuture) {
        tokio::spawn(task);
    }
}

/// Poll `condition` every `interval` until it holds or `timeout` elapses.
///
/// Returns how long it took, or `None` on timeout.
pub async fn wait_for<S, F>(
    scheduler: &S,
    timeout: Duration,
    interval: Duration,
    mut condition: F,
) -> Option<Duration>
where
    S: Scheduler + ?Sized,
    F: FnMut() -> bool,
{
    let start = scheduler.now();
    loop {
        if condition() {
            return Some(scheduler.now().saturating_duration_since(start));
        }
        if scheduler.now().saturating_duration_since(start) >= timeout {
            return None;
        }
        scheduler.sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_advances_virtual_clock() {
        let scheduler = TokioScheduler::new();
        let start = scheduler.now();
        scheduler.sleep(Duration::from_secs(5)).await;
        assert!(scheduler.now() - start >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_condition_and_timeout() {
        let scheduler = TokioScheduler::new();
        let mut polls = 0;
        let took = wait_for(&scheduler, Duration::from_secs(1), Duration::from_millis(100), || {
            polls += 1;
            polls == 4
        })
        .await;
        assert_eq!(took, Some(Duration::from_millis(300)));

        let never = wait_for(&scheduler, Duration::from_secs(1), Duration::from_millis(100), || false).await;
        assert_eq!(never, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_task_runs() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        let task_counter = Arc::clone(&counter);
        scheduler.spawn(Box::pin(async move {
            task_counter.fetch_add(1, Ordering::SeqCst);
        }));
        scheduler.sleep(Duration::from_millis(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
