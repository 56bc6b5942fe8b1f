//! Repeating actions while a button is held

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

pub const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_millis(100);
pub const MIN_REPEAT_INTERVAL: Duration = Duration::from_millis(20);

struct Repeat {
    task: JoinHandle<()>,
    // false once retired; held while the action runs
    live: Arc<Mutex<bool>>,
}

impl Repeat {
    /// Returns once no run of the action is in progress
    fn retire(self) {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.task.abort();
    }
}

fn run_if_live(live: &Mutex<bool>, action: &impl Fn()) -> bool {
    let live = live.lock().unwrap_or_else(PoisonError::into_inner);
    if *live {
        action();
    }
    *live
}

/// At most one repeat task per key
///
/// `release` and `stop_all` wait for a run already under way, so the action
/// never runs after they return. The action must not call back into the timers.
pub struct RepeatTimers<K> {
    period: Duration,
    runtime: Handle,
    timers: Mutex<HashMap<K, Repeat>>,
}

impl<K> RepeatTimers<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new(period: Duration, runtime: Handle) -> Self {
        Self {
            period: period.max(MIN_REPEAT_INTERVAL),
            runtime,
            timers: Mutex::new(HashMap::new()),
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<K, Repeat>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Runs `action` now, then once per period until `release(key)`
    ///
    /// Pressing a key that is already repeating replaces its timer.
    pub fn press<F>(&self, key: K, action: F)
    where
        F: Fn() + Send + 'static,
    {
        action();

        let period = self.period;
        let live = Arc::new(Mutex::new(true));
        let flag = Arc::clone(&live);
        let task = self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !run_if_live(&flag, &action) {
                    break;
                }
            }
        });

        debug!("repeat started for {:?}", key);
        let previous = self.timers().insert(key, Repeat { task, live });
        if let Some(previous) = previous {
            previous.retire();
        }
    }

    /// Returns false if `key` was not repeating
    pub fn release(&self, key: &K) -> bool {
        let removed = self.timers().remove(key);
        match removed {
            Some(repeat) => {
                repeat.retire();
                debug!("repeat stopped for {:?}", key);
                true
            }
            None => false,
        }
    }

    /// Cancels every timer; returns how many were running
    pub fn stop_all(&self) -> usize {
        let drained: Vec<_> = self.timers().drain().map(|(_, repeat)| repeat).collect();
        let stopped = drained.len();
        for repeat in drained {
            repeat.retire();
        }
        if stopped > 0 {
            debug!("stopped {} repeat timers", stopped);
        }
        stopped
    }

    pub fn is_active(&self, key: &K) -> bool {
        self.timers().contains_key(key)
    }

    pub fn active(&self) -> usize {
        self.timers().len()
    }
}

impl<K> Drop for RepeatTimers<K> {
    fn drop(&mut self) {
        let timers = self.timers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, repeat) in timers.drain() {
            repeat.retire();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn held_for_three_and_a_half_periods_runs_four_times() {
        let timers = RepeatTimers::new(Duration::from_millis(100), Handle::current());
        let (count, action) = counter();

        timers.press("volume_up", action);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);

        assert!(timers.release(&"volume_up"));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn repress_replaces_the_timer() {
        let timers = RepeatTimers::new(Duration::from_millis(100), Handle::current());
        let (count, action) = counter();
        let (second, other) = counter();

        timers.press(1u8, action);
        timers.press(1u8, other);
        assert_eq!(timers.active(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_cancels_every_key() {
        let timers = RepeatTimers::new(Duration::from_millis(100), Handle::current());
        let (a, action_a) = counter();
        let (b, action_b) = counter();
        timers.press("a", action_a);
        timers.press("b", action_b);

        assert_eq!(timers.stop_all(), 2);
        assert!(!timers.is_active(&"a"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert!(!timers.release(&"a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn release_waits_for_a_run_in_progress() {
        use std::sync::atomic::AtomicBool;

        let timers = RepeatTimers::new(MIN_REPEAT_INTERVAL, Handle::current());
        let started = Arc::new(AtomicBool::new(false));
        let runs = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (flag, run, done) = (started.clone(), runs.clone(), finished.clone());

        timers.press("carrier_up", move || {
            if run.fetch_add(1, Ordering::SeqCst) == 1 {
                flag.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
            }
            done.fetch_add(1, Ordering::SeqCst);
        });
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        tokio::task::block_in_place(|| timers.release(&"carrier_up"));
        assert_eq!(finished.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn period_has_a_floor() {
        let timers: RepeatTimers<u8> = RepeatTimers::new(Duration::from_millis(1), Handle::current());
        assert_eq!(timers.period(), MIN_REPEAT_INTERVAL);
    }
}
