//! Single-slot deferred task used for background progress writes.
//!
//! Every `schedule` call pushes the pending run back by the debounce delay,
//! but never past `max_wait` after the first call of the burst. Runs are
//! chained: a run starts only after the previous one finished, so the last
//! physical write is always the most recent snapshot.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

pub type DeferredFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type DeferredAction = Arc<dyn Fn() -> DeferredFuture + Send + Sync>;

#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<Inner>,
}

struct Inner {
    runtime: Handle,
    delay: Duration,
    max_wait: Duration,
    action: DeferredAction,
    slot: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    burst_started: Option<Instant>,
    pending: Option<JoinHandle<()>>,
    in_flight: Option<JoinHandle<()>>,
}

impl Debouncer {
    #[must_use]
    pub fn new(runtime: Handle, delay: Duration, max_wait: Duration, action: DeferredAction) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                delay,
                max_wait: max_wait.max(delay),
                action,
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    /// (Re)arm the timer. Whatever state the action reads at fire time is
    /// what gets written.
    pub fn schedule(&self) {
        let mut slot = self.inner.lock();
        let now = Instant::now();
        let burst_started = *slot.burst_started.get_or_insert(now);
        let deadline = (now + self.inner.delay).min(burst_started + self.inner.max_wait);

        if let Some(pending) = slot.pending.take() {
            pending.abort();
        }
        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;

        let inner = Arc::clone(&self.inner);
        slot.pending = Some(self.inner.runtime.spawn(async move {
            sleep_until(deadline).await;
            inner.fire(generation);
        }));
    }

    /// Drop the pending run, if any. A run already in flight is left alone.
    pub fn cancel(&self) {
        let mut slot = self.inner.lock();
        slot.disarm();
    }

    /// Cancel the pending run and wait for the in-flight one to finish.
    pub async fn settle(&self) {
        let in_flight = {
            let mut slot = self.inner.lock();
            slot.disarm();
            slot.in_flight.take()
        };
        if let Some(handle) = in_flight {
            let _ = handle.await;
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.lock().pending.is_some()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, generation: u64) {
        let mut slot = self.lock();
        if slot.generation != generation {
            return;
        }
        slot.pending = None;
        slot.burst_started = None;

        let previous = slot.in_flight.take();
        let run = (self.action)();
        slot.in_flight = Some(self.runtime.spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            run.await;
        }));
    }
}

impl Slot {
    fn disarm(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        self.generation = self.generation.wrapping_add(1);
        self.burst_started = None;
    }
}
