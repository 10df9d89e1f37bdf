//! Event publishing/subscription abstraction.
//!
//! The bus distributes events after they have been made durable. Delivery is
//! at-least-once and best effort: the store is the source of truth, so a
//! consumer that misses a notification can always fall back to reading the
//! ledger. Consumers must be idempotent.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

/// Everything published on a bus after `subscribe()`, in publication order.
///
/// ```ignore
/// let subscription = bus.subscribe();
/// while !shutdown.load(Ordering::Relaxed) {
///     if let Some(envelope) = subscription.next_timeout(Duration::from_secs(1)) {
///         handle(envelope);
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Next message, waiting at most `timeout`. `None` on timeout or once the
    /// bus has been dropped.
    pub fn next_timeout(&self, timeout: Duration) -> Option<M> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Next message if one is already queued.
    pub fn poll(&self) -> Option<M> {
        self.receiver.try_recv().ok()
    }

    /// Everything currently queued, without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Blocking iteration until the bus is dropped.
impl<M> IntoIterator for Subscription<M> {
    type Item = M;
    type IntoIter = mpsc::IntoIter<M>;

    fn into_iter(self) -> Self::IntoIter {
        self.receiver.into_iter()
    }
}

/// Transport-agnostic pub/sub with broadcast semantics.
///
/// Messages from a single publisher arrive in publication order; no ordering
/// is promised between concurrent publishers. A failed `publish` never means
/// the underlying write failed.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
