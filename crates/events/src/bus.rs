//! Fan-out of committed authority facts to their subscribers.
//!
//! The bus carries change notifications to audit writers and notifiers and
//! keeps no history of its own. A subscriber sees what was published after
//! it subscribed, in publish order per publisher, and must tolerate
//! redelivery when a broker-backed bus retries.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use thiserror::Error;

/// Every publisher feeding a subscription has been dropped.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("event bus closed")]
pub struct BusClosed;

/// Receiving end handed out by [`EventBus::subscribe`].
///
/// An audit writer typically polls with [`Subscription::recv_within`] so it
/// can flush between bursts and stop once the bus is gone:
///
/// ```ignore
/// while let Ok(next) = subscription.recv_within(Duration::from_secs(1)) {
///     match next {
///         Some(event) => writer.append(&event.payload())?,
///         None => writer.flush()?,
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

    /// Next queued message, if any. Never blocks.
    pub fn try_recv(&self) -> Option<M> {
        self.receiver.try_recv().ok()
    }

    /// Waits up to `timeout`. `Ok(None)` means nothing arrived in time.
    pub fn recv_within(&self, timeout: Duration) -> Result<Option<M>, BusClosed> {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BusClosed),
        }
    }

    /// Everything queued right now, oldest first.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }

    /// Like [`Subscription::drain`], keeping only messages that satisfy
    /// `keep`. The rest are consumed and dropped.
    pub fn drain_where(&self, mut keep: impl FnMut(&M) -> bool) -> Vec<M> {
        self.receiver.try_iter().filter(|m| keep(m)).collect()
    }
}

/// Publishing side of the notification channel.
///
/// A failed `publish` is reported to the caller and nothing more: the
/// mutation it describes has already committed and stays committed.
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
