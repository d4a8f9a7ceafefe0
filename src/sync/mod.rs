//! Small synchronization primitives shared by the background tasks.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// A mutex-guarded single-value slot. Used wherever one task parks a waiter
/// (an ack or reply channel) for another task to pick up exactly once.
pub(crate) struct SharedSlot<T> {
    slot: Arc<Mutex<Option<T>>>,
}

// Not derived: a derived impl would demand T: Clone, but cloning the slot
// only clones the Arc.
impl<T> Clone for SharedSlot<T> {
    fn clone(&self) -> Self {
        SharedSlot {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> SharedSlot<T> {
    pub(crate) fn new() -> Self {
        SharedSlot {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Park a value, discarding whatever was there before.
    pub(crate) fn put(&self, value: T) {
        self.lock().replace(value);
    }

    /// Claim the parked value, leaving the slot empty.
    pub(crate) fn take(&self) -> Option<T> {
        self.lock().take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        self.slot.lock().expect("SharedSlot mutex poisoned")
    }
}

/// Create a linked shutdown pair. Dropping the guard resolves the signal,
/// which listener loops `select!` against their socket reads.
pub(crate) fn shutdown_pair() -> (ShutdownGuard, ShutdownSignal) {
    let (tx, rx) = oneshot::channel();

    (ShutdownGuard { _tx: tx }, ShutdownSignal { rx })
}

pub(crate) struct ShutdownGuard {
    _tx: oneshot::Sender<()>,
}

pub(crate) struct ShutdownSignal {
    rx: oneshot::Receiver<()>,
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Resolves whether the guard sent a value or was simply dropped.
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(_) => Poll::Ready(()),
        }
    }
}
