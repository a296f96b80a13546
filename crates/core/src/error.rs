//! Failure classes and the message dispositions they imply.
//!
//! The class of a failure, not its message, decides what happens to the queue
//! message that triggered it:
//!
//! | Class | Job row | Message |
//! |-------|---------|---------|
//! | `Data` | `FAILED` if the row was found | reject, no redelivery |
//! | `Analysis` | `FAILED` with cause | acknowledge |
//! | `Infrastructure` | last committed state | reject with redelivery |

use serde::{Deserialize, Serialize};

/// Three disjoint failure classes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed payload or unknown job. Permanent.
    Data,
    /// Input-specific failure that has been recorded on the job. Deterministic.
    Analysis,
    /// Store/broker unavailable or an unexpected fault. Transient.
    Infrastructure,
}

impl ErrorClass {
    pub fn disposition(&self) -> Disposition {
        match self {
            ErrorClass::Data => Disposition::Reject,
            ErrorClass::Analysis => Disposition::Ack,
            ErrorClass::Infrastructure => Disposition::Requeue,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Data => "data",
            ErrorClass::Analysis => "analysis",
            ErrorClass::Infrastructure => "infrastructure",
        }
    }
}

impl core::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a delivery is settled with the broker. Exactly one per delivery.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Acknowledge: the outcome is durable, discard the message.
    Ack,
    /// Reject without redelivery (dead-letter).
    Reject,
    /// Reject and return the message to the queue.
    Requeue,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Reject => "reject",
            Disposition::Requeue => "requeue",
        }
    }
}

impl core::fmt::Display for Disposition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
