//! Multicast fan-out used for the engine's change and result buses. An
//! explicit subscriber list of unbounded senders: slow consumers buffer, they
//! never lose events.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

pub struct EventBus<T> {
    inner: Arc<BusInner<T>>,
}

struct BusInner<T> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<T>>>,
    closed: AtomicBool,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self { Self::new() }
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self { inner: Arc::new(BusInner { subscribers: Mutex::new(Vec::new()), closed: AtomicBool::new(false) }) }
    }

    /// Attach a new subscriber. A late subscriber only sees items published
    /// after this call; subscribing to a closed bus yields an immediately
    /// completed stream.
    pub fn subscribe(&self) -> BusSubscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.inner.closed.load(Ordering::Acquire) {
            self.inner.subscribers.lock().unwrap().push(tx);
        }
        BusSubscription { rx }
    }

    pub fn subscriber_count(&self) -> usize { self.inner.subscribers.lock().unwrap().len() }

    pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::Acquire) }

    /// Complete every subscriber stream and reject further publishes.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.subscribers.lock().unwrap().clear();
    }
}

impl<T: Clone> EventBus<T> {
    /// Deliver `item` to every live subscriber, pruning the ones that went
    /// away. Returns false when the bus is closed.
    pub fn publish(&self, item: T) -> bool {
        if self.inner.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut subscribers = self.inner.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(item.clone()).is_ok());
        true
    }
}

/// One subscriber's view of the bus; a [`Stream`] that ends when the bus is
/// closed.
pub struct BusSubscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> BusSubscription<T> {
    pub async fn recv(&mut self) -> Option<T> { self.rx.recv().await }
}

impl<T> Stream for BusSubscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> { self.rx.poll_recv(cx) }
}
