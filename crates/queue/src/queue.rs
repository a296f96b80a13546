//! Queue consumption contract.
//!
//! ## Delivery Guarantees
//!
//! Implementations provide **at-least-once** delivery from one durable queue
//! shared by competing consumers (each message goes to one worker at a time).
//! Settlement is explicit:
//!
//! - `ack` removes the message for good
//! - `reject(requeue = false)` removes it and dead-letters it
//! - `reject(requeue = true)` returns it so any worker can retry it
//!
//! ## Flow Control
//!
//! A worker holds at most **one** unsettled delivery. `next_delivery` must not
//! be called again until the previous delivery has been settled;
//! implementations report [`QueueError::InFlight`] when that rule is broken.
//!
//! ## Usage Pattern
//!
//! ```ignore
//! loop {
//!     match queue.next_delivery(Duration::from_secs(1))? {
//!         Some(delivery) => {
//!             let disposition = process(&delivery);
//!             queue.settle(&delivery.tag, disposition)?;
//!         }
//!         None => continue, // timeout: check for shutdown
//!     }
//! }
//! ```

use std::time::Duration;

use idh_core::Disposition;

use crate::delivery::{Delivery, DeliveryTag};

/// Errors surfaced by a queue implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command error: {0}")]
    Command(String),

    #[error("delivery {0} is still unsettled")]
    InFlight(DeliveryTag),

    #[error("unknown or already settled delivery: {0}")]
    UnknownDelivery(DeliveryTag),

    #[error("queue is closed")]
    Closed,
}

impl QueueError {
    /// The connection is gone; the consumer cannot continue on this queue handle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueueError::Connection(_) | QueueError::Closed)
    }
}

/// A durable work queue bound to one worker.
pub trait MessageQueue: Send {
    /// Block for up to `timeout` waiting for the next delivery.
    ///
    /// `Ok(None)` means the timeout elapsed without a message.
    fn next_delivery(&mut self, timeout: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Acknowledge (discard) a delivery.
    fn ack(&mut self, tag: &DeliveryTag) -> Result<(), QueueError>;

    /// Reject a delivery, optionally returning it to the queue.
    fn reject(&mut self, tag: &DeliveryTag, requeue: bool) -> Result<(), QueueError>;

    /// Release the broker connection. Further calls fail with [`QueueError::Closed`].
    fn close(&mut self) -> Result<(), QueueError>;

    /// Settle a delivery according to a [`Disposition`].
    fn settle(&mut self, tag: &DeliveryTag, disposition: Disposition) -> Result<(), QueueError> {
        match disposition {
            Disposition::Ack => self.ack(tag),
            Disposition::Reject => self.reject(tag, false),
            Disposition::Requeue => self.reject(tag, true),
        }
    }
}

