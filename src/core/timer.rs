/*!
 * Debounce Timers
 * Keyed arm/cancel timers with a manual flush path
 *
 * Arming a key replaces any pending action for that key and restarts its
 * quiet period. The action runs once the period elapses without re-arming.
 * `flush` runs pending actions immediately, which keeps tests deterministic.
 *
 * Timers are tokio tasks; arming requires a running runtime.
 */

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

type TimerAction = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
type ActionSlot = Arc<Mutex<Option<TimerAction>>>;

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
    action: ActionSlot,
}

impl PendingTimer {
    fn cancel(self) {
        self.handle.abort();
        self.action.lock().take();
    }

    fn take_action(self) -> Option<TimerAction> {
        self.handle.abort();
        let action = self.action.lock().take();
        action
    }
}

/// Per-key debounce timer
pub struct DebounceTimer<K> {
    delay: Duration,
    pending: Arc<Mutex<HashMap<K, PendingTimer>>>,
    generation: Arc<AtomicU64>,
}

impl<K> Clone for DebounceTimer<K> {
    fn clone(&self) -> Self {
        Self {
            delay: self.delay,
            pending: Arc::clone(&self.pending),
            generation: Arc::clone(&self.generation),
        }
    }
}

impl<K> DebounceTimer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm `key` with the default delay
    pub fn arm<F, Fut>(&self, key: K, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.arm_after(key, self.delay, action);
    }

    /// Arm `key` with an explicit delay, replacing any pending action
    pub fn arm_after<F, Fut>(&self, key: K, delay: Duration, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let action: TimerAction = Box::new(move || action().boxed());
        let slot: ActionSlot = Arc::new(Mutex::new(Some(action)));
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        // Held across spawn so the task cannot observe the map before its own insert
        let mut pending = self.pending.lock();

        let task_pending = Arc::clone(&self.pending);
        let task_slot = Arc::clone(&slot);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut map = task_pending.lock();
                if map
                    .get(&task_key)
                    .is_some_and(|timer| timer.generation == generation)
                {
                    map.remove(&task_key);
                }
            }
            let action = task_slot.lock().take();
            if let Some(action) = action {
                action().await;
            }
        });

        if let Some(previous) = pending.insert(
            key,
            PendingTimer {
                generation,
                handle,
                action: slot,
            },
        ) {
            previous.cancel();
        }
    }

    /// Cancel a pending action. Returns false if nothing was armed.
    pub fn cancel(&self, key: &K) -> bool {
        let removed = self.pending.lock().remove(key);
        match removed {
            Some(timer) => {
                timer.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingTimer> = self.pending.lock().drain().map(|(_, t)| t).collect();
        let count = drained.len();
        drained.into_iter().for_each(PendingTimer::cancel);
        count
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.pending.lock().contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Run the pending action for `key` now. Returns false if nothing was armed.
    pub async fn flush(&self, key: &K) -> bool {
        let removed = self.pending.lock().remove(key);
        match removed.and_then(PendingTimer::take_action) {
            Some(action) => {
                action().await;
                true
            }
            None => false,
        }
    }

    /// Run every pending action now, in arming order
    pub async fn flush_all(&self) -> usize {
        let mut drained: Vec<PendingTimer> =
            self.pending.lock().drain().map(|(_, t)| t).collect();
        drained.sort_by_key(|timer| timer.generation);

        let mut ran = 0;
        for timer in drained {
            if let Some(action) = timer.take_action() {
                action().await;
                ran += 1;
            }
        }
        ran
    }
}
