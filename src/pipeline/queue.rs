//! A bounded/unbounded channel wrapper that tracks in-flight items so the
//! coordinator can wait for a queue to fully drain (every enqueued item has
//! finished processing, not merely been dequeued).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

struct Inflight {
    count: AtomicI64,
    notify: Notify,
}

impl Inflight {
    fn new() -> Self {
        Self {
            count: AtomicI64::new(0),
            notify: Notify::new(),
        }
    }

    fn inc(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn dec(&self) {
        let prev = self.count.fetch_sub(1, Ordering::SeqCst);
        if prev <= 1 {
            self.notify.notify_waiters();
        }
    }

    async fn wait_drained(&self) {
        loop {
            if self.count.load(Ordering::SeqCst) <= 0 {
                return;
            }
            let notified = self.notify.notified();
            if self.count.load(Ordering::SeqCst) <= 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Sending half: every send increments the in-flight counter. Consumers must
/// call [`Done::mark_done`] once they have fully finished processing an
/// item (which, for the work queue, means the whole `fetch_all` call, not
/// just the dequeue).
#[derive(Clone)]
pub struct TrackedSender<T> {
    inner: flume::Sender<T>,
    inflight: Arc<Inflight>,
}

impl<T> TrackedSender<T> {
    pub async fn send(&self, item: T) -> Result<(), flume::SendError<T>> {
        self.inflight.inc();
        let result = self.inner.send_async(item).await;
        if result.is_err() {
            self.inflight.dec();
        }
        result
    }

    /// Blocks until every item sent on this channel has been marked done.
    pub async fn wait_drained(&self) {
        self.inflight.wait_drained().await;
    }
}

/// Receiving half paired with [`TrackedSender`]. Wraps the raw item in
/// [`Done`] so the receiver cannot forget to mark it complete.
#[derive(Clone)]
pub struct TrackedReceiver<T> {
    inner: flume::Receiver<T>,
    inflight: Arc<Inflight>,
}

impl<T> TrackedReceiver<T> {
    pub async fn recv(&self) -> Option<Done<T>> {
        match self.inner.recv_async().await {
            Ok(item) => Some(Done {
                item: Some(item),
                inflight: self.inflight.clone(),
            }),
            Err(_) => None,
        }
    }
}

/// An item dequeued from a [`TrackedReceiver`]. Dropping it (or calling
/// [`Done::mark_done`] explicitly) decrements the in-flight counter.
pub struct Done<T> {
    item: Option<T>,
    inflight: Arc<Inflight>,
}

impl<T> Done<T> {
    #[must_use]
    pub fn into_inner(mut self) -> T {
        self.item.take().expect("Done always holds an item until dropped")
    }
}

impl<T> Drop for Done<T> {
    fn drop(&mut self) {
        self.inflight.dec();
    }
}

/// Creates a bounded tracked channel of the given capacity.
pub fn bounded<T>(capacity: usize) -> (TrackedSender<T>, TrackedReceiver<T>) {
    let (tx, rx) = flume::bounded(capacity);
    let inflight = Arc::new(Inflight::new());
    (
        TrackedSender {
            inner: tx,
            inflight: inflight.clone(),
        },
        TrackedReceiver { inner: rx, inflight },
    )
}

/// Creates an unbounded tracked channel.
pub fn unbounded<T>() -> (TrackedSender<T>, TrackedReceiver<T>) {
    let (tx, rx) = flume::unbounded();
    let inflight = Arc::new(Inflight::new());
    (
        TrackedSender {
            inner: tx,
            inflight: inflight.clone(),
        },
        TrackedReceiver { inner: rx, inflight },
    )
}
