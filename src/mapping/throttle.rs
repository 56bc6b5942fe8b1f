//! Leading+trailing throttle for continuous values
//!
//! The first value after a quiet window goes out at once. Values arriving inside
//! the window replace each other in a single pending slot, and one trailing
//! timer sends whatever is pending when the window closes. At most two sends
//! happen per window no matter how many values arrive.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

type Emit<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Slot<T> {
    last_sent: Option<Instant>,
    pending: Option<T>,
    trailing: Option<JoinHandle<()>>,
    // identifies the currently armed timer; a timer that lost a race sees a newer value
    armed: u64,
}

impl<T> Slot<T> {
    fn disarm(&mut self) {
        self.armed = self.armed.wrapping_add(1);
        if let Some(task) = self.trailing.take() {
            task.abort();
        }
    }
}

fn lock<T>(slot: &Mutex<Slot<T>>) -> MutexGuard<'_, Slot<T>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Throttle<T: Send + 'static> {
    name: String,
    window: Duration,
    runtime: Handle,
    slot: Arc<Mutex<Slot<T>>>,
    emit: Emit<T>,
}

impl<T: Send + 'static> Throttle<T> {
    /// `emit` runs on the submitting thread for leading sends and on `runtime`
    /// for trailing ones.
    pub fn new<F>(name: impl Into<String>, window: Duration, runtime: Handle, emit: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            window,
            runtime,
            slot: Arc::new(Mutex::new(Slot {
                last_sent: None,
                pending: None,
                trailing: None,
                armed: 0,
            })),
            emit: Arc::new(emit),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.slot).pending.is_some()
    }

    pub fn submit(&self, value: T) {
        let now = Instant::now();
        let mut slot = lock(&self.slot);

        let remaining = slot
            .last_sent
            .map(|sent| self.window.saturating_sub(now.duration_since(sent)))
            .unwrap_or(Duration::ZERO);

        if remaining.is_zero() {
            slot.disarm();
            slot.pending = None;
            slot.last_sent = Some(now);
            drop(slot);
            (self.emit)(value);
            return;
        }

        slot.pending = Some(value);
        slot.disarm();
        let armed = slot.armed;
        let shared = Arc::clone(&self.slot);
        let emit = Arc::clone(&self.emit);
        let name = self.name.clone();
        slot.trailing = Some(self.runtime.spawn(async move {
            tokio::time::sleep(remaining).await;
            // sent under the lock so `cancel` waits for a send in flight
            let mut slot = lock(&shared);
            if slot.armed != armed {
                return;
            }
            slot.trailing = None;
            if let Some(value) = slot.pending.take() {
                slot.last_sent = Some(Instant::now());
                debug!("{}: trailing send", name);
                emit(value);
            }
        }));
    }

    /// Drops the pending value and its timer
    ///
    /// A trailing send already under way finishes before this returns; nothing
    /// is emitted afterwards. `emit` must not call back into this throttle.
    pub fn cancel(&self) {
        let mut slot = lock(&self.slot);
        slot.disarm();
        if slot.pending.take().is_some() {
            debug!("{}: pending value dropped", self.name);
        }
    }
}

impl<T: Send + 'static> Drop for Throttle<T> {
    fn drop(&mut self) {
        lock(&self.slot).disarm();
    }
}
