use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel as cb;
use parking_lot::Mutex;

struct Inner {
    cancelled: AtomicBool,
    children: Mutex<Vec<Weak<Inner>>>,
    // Never sent on. Dropping it on cancel disconnects `signal`, which wakes
    // every receiver blocked on it, `select!` arms included.
    trigger: Mutex<Option<cb::Sender<()>>>,
    signal: cb::Receiver<()>,
}

impl Inner {
    fn new() -> Self {
        let (trigger, signal) = cb::bounded(0);
        Self {
            cancelled: AtomicBool::new(false),
            children: Mutex::new(Vec::new()),
            trigger: Mutex::new(Some(trigger)),
            signal,
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        drop(self.trigger.lock().take());
        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// Cooperative cancellation signal shared between threads.
///
/// Cancelling a token cancels every token derived from it with
/// [`child_token`](Self::child_token); cancelling a child leaves the parent alone.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new()),
        }
    }

    pub fn child_token(&self) -> Self {
        let child = Self::new();
        let mut children = self.inner.children.lock();
        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));
        drop(children);
        // The parent may have been cancelled before the child was registered.
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks until cancelled or `timeout` elapses. Returns whether the token
    /// is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.inner.signal.recv_timeout(timeout) {
            Err(cb::RecvTimeoutError::Disconnected) => true,
            _ => self.is_cancelled(),
        }
    }

    /// Channel that becomes disconnected once the token is cancelled. Nothing
    /// is ever received on it; use it as a `select!` arm next to real work.
    pub fn signal(&self) -> &cb::Receiver<()> {
        &self.inner.signal
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
