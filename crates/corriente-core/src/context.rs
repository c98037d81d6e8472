//! Per-run runtime context shared by the top block and every executor.
//!
//! Replaces process-wide globals: the top block constructs one
//! [`RuntimeContext`] and hands a clone to each executor. It carries the
//! buffer sizing policy plus the cooperative stop/pause signals and the
//! first fatal error of a run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::Notifier;
use crate::error::RuntimeError;

const DEFAULT_BUFFER_CAPACITY: usize = 8192;
const DEFAULT_WORK_QUANTUM: usize = 2048;

#[derive(Debug)]
struct ContextInner {
    buffer_capacity: usize,
    work_quantum: usize,
    stop: AtomicBool,
    pause: AtomicBool,
    fatal: Mutex<Option<RuntimeError>>,
    notifiers: Mutex<Vec<Arc<Notifier>>>,
}

/// Shared runtime configuration and control signals for one top block.
///
/// Cheap to clone; all clones observe the same signals.
#[derive(Clone, Debug)]
pub struct RuntimeContext {
    inner: Arc<ContextInner>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeContext {
    /// Context with default buffer sizing (8192-item buffers, 2048-item
    /// work quantum).
    pub fn new() -> Self {
        Self::with_capacities(DEFAULT_BUFFER_CAPACITY, DEFAULT_WORK_QUANTUM)
    }

    /// Context with explicit buffer capacity and work quantum, in items.
    ///
    /// The quantum is clamped to half the capacity so a single `work()`
    /// call can always fit its worst-case output.
    pub fn with_capacities(buffer_capacity: usize, work_quantum: usize) -> Self {
        let capacity = buffer_capacity.max(2);
        Self {
            inner: Arc::new(ContextInner {
                buffer_capacity: capacity,
                work_quantum: work_quantum.clamp(1, capacity / 2),
                stop: AtomicBool::new(false),
                pause: AtomicBool::new(false),
                fatal: Mutex::new(None),
                notifiers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Stream buffer capacity in items.
    pub fn buffer_capacity(&self) -> usize {
        self.inner.buffer_capacity
    }

    /// Maximum items per `work()` call.
    pub fn work_quantum(&self) -> usize {
        self.inner.work_quantum
    }

    /// Requests graceful shutdown: sources stop producing, downstream
    /// blocks drain what is already buffered.
    pub fn request_stop(&self) {
        self.inner.stop.store(true, Ordering::Release);
        self.notify_all();
    }

    /// Whether graceful shutdown was requested.
    pub fn is_stopped(&self) -> bool {
        self.inner.stop.load(Ordering::Acquire)
    }

    /// Requests immediate executor exit without end-of-stream marking —
    /// used by `lock()` (buffered data must survive) and by fatal errors.
    pub(crate) fn request_pause(&self) {
        self.inner.pause.store(true, Ordering::Release);
        self.notify_all();
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.inner.pause.load(Ordering::Acquire)
    }

    /// Records the first fatal error of the run and halts all executors.
    pub(crate) fn set_fatal(&self, err: RuntimeError) {
        {
            let mut fatal = self.inner.fatal.lock().expect("context poisoned");
            if fatal.is_none() {
                *fatal = Some(err);
            }
        }
        self.request_pause();
    }

    pub(crate) fn take_fatal(&self) -> Option<RuntimeError> {
        self.inner.fatal.lock().expect("context poisoned").take()
    }

    /// Re-arms the context for a fresh run.
    pub(crate) fn reset_run(&self) {
        self.inner.stop.store(false, Ordering::Release);
        self.inner.pause.store(false, Ordering::Release);
        *self.inner.fatal.lock().expect("context poisoned") = None;
        self.inner.notifiers.lock().expect("context poisoned").clear();
    }

    /// Re-arms the context when a paused run resumes: a stop requested while
    /// locked stays requested.
    pub(crate) fn resume_run(&self) {
        self.inner.pause.store(false, Ordering::Release);
        self.inner.notifiers.lock().expect("context poisoned").clear();
    }

    pub(crate) fn register_notifier(&self, notifier: Arc<Notifier>) {
        self.inner
            .notifiers
            .lock()
            .expect("context poisoned")
            .push(notifier);
    }

    fn notify_all(&self) {
        let notifiers = self.inner.notifiers.lock().expect("context poisoned");
        for n in notifiers.iter() {
            n.notify();
        }
    }
}
