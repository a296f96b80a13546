//! Redis Streams-backed work queue (durable, at-least-once delivery).
//!
//! - **Stream Key**: the queue name (e.g. `analysis_queue`); producers `XADD`
//!   entries with a `payload` field holding the JSON task descriptor
//! - **Consumer Group**: shared by all workers, so each entry goes to one worker
//! - **Consumer**: one per worker process
//! - **Dead-Letter Stream**: `<queue>:dlq`
//!
//! ## Settlement
//!
//! | Disposition | Commands (one `MULTI`/`EXEC`) |
//! |-------------|-------------------------------|
//! | ack | `XACK` |
//! | reject | `XADD <queue>:dlq` + `XACK` |
//! | requeue | `XADD <queue>` with `attempt + 1` + `XACK` |
//!
//! On start the consumer first re-reads its own pending entries (delivered
//! before a crash, never settled), then blocks for new ones.

use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{Commands, RedisError};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use idh_queue::{Delivery, DeliveryTag, MessageQueue, QueueError};

const PAYLOAD_FIELD: &str = "payload";
const ATTEMPT_FIELD: &str = "attempt";

/// Where and as whom to consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisStreamsConfig {
    pub redis_url: String,
    pub stream_key: String,
    pub group: String,
    pub consumer: String,
}

impl RedisStreamsConfig {
    pub fn dlq_key(&self) -> String {
        format!("{}:dlq", self.stream_key)
    }
}

#[derive(Debug)]
struct InFlight {
    tag: DeliveryTag,
    payload: Vec<u8>,
    attempt: u32,
}

/// One worker's connection to the work stream.
pub struct RedisStreamsQueue {
    config: RedisStreamsConfig,
    conn: Option<redis::Connection>,
    in_flight: Option<InFlight>,
    pending_drained: bool,
}

impl core::fmt::Debug for RedisStreamsQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStreamsQueue")
            .field("config", &self.config)
            .field("connected", &self.conn.is_some())
            .field("in_flight", &self.in_flight.as_ref().map(|m| &m.tag))
            .finish()
    }
}

impl RedisStreamsQueue {
    /// Connect and ensure the consumer group exists (idempotent).
    pub fn connect(config: RedisStreamsConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let mut conn = client.get_connection().map_err(map_redis_error)?;

        // MKSTREAM creates the stream; "0" lets a new group see existing entries.
        let created: Result<(), RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&config.stream_key)
            .arg(&config.group)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);
        match created {
            Ok(()) => info!(stream = %config.stream_key, group = %config.group, "consumer group created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(map_redis_error(e)),
        }

        info!(
            stream = %config.stream_key,
            group = %config.group,
            consumer = %config.consumer,
            "connected to broker"
        );
        Ok(Self {
            config,
            conn: Some(conn),
            in_flight: None,
            pending_drained: false,
        })
    }

    fn conn(&mut self) -> Result<&mut redis::Connection, QueueError> {
        self.conn.as_mut().ok_or(QueueError::Closed)
    }

    /// Read at most one entry: own pending entries first, then new ones.
    fn read_one(&mut self, timeout: Duration) -> Result<Option<(StreamId, bool)>, QueueError> {
        let stream_key = self.config.stream_key.clone();
        let opts = StreamReadOptions::default()
            .group(&self.config.group, &self.config.consumer)
            .count(1);

        if !self.pending_drained {
            let reply: Option<StreamReadReply> = self
                .conn()?
                .xread_options(&[&stream_key], &["0"], &opts)
                .map_err(map_redis_error)?;
            match first_entry(reply) {
                Some(entry) => return Ok(Some((entry, true))),
                None => {
                    debug!("no pending entries left for this consumer");
                    self.pending_drained = true;
                }
            }
        }

        let block_ms = timeout.as_millis().clamp(1, usize::MAX as u128) as usize;
        let reply: Option<StreamReadReply> = self
            .conn()?
            .xread_options(&[&stream_key], &[">"], &opts.block(block_ms))
            .map_err(map_redis_error)?;
        Ok(first_entry(reply).map(|entry| (entry, false)))
    }

    fn in_flight_for(&self, tag: &DeliveryTag) -> Result<&InFlight, QueueError> {
        match &self.in_flight {
            Some(current) if &current.tag == tag => Ok(current),
            _ => Err(QueueError::UnknownDelivery(tag.clone())),
        }
    }
}

impl MessageQueue for RedisStreamsQueue {
    fn next_delivery(&mut self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        self.conn()?;
        if let Some(current) = &self.in_flight {
            return Err(QueueError::InFlight(current.tag.clone()));
        }

        let Some((entry, was_pending)) = self.read_one(timeout)? else {
            return Ok(None);
        };

        let payload: Vec<u8> = entry
            .map
            .get(PAYLOAD_FIELD)
            .and_then(|v| redis::from_redis_value(v).ok())
            .unwrap_or_default();
        let attempt: u32 = entry
            .map
            .get(ATTEMPT_FIELD)
            .and_then(|v| redis::from_redis_value(v).ok())
            .unwrap_or(0);

        let tag = DeliveryTag::new(entry.id);
        // An entry re-read from the pending list was handed out before.
        let redelivery_count = attempt + u32::from(was_pending);
        self.in_flight = Some(InFlight {
            tag: tag.clone(),
            payload: payload.clone(),
            attempt,
        });

        Ok(Some(Delivery {
            tag,
            payload,
            redelivery_count,
        }))
    }

    #[instrument(skip(self), fields(stream = %self.config.stream_key), err)]
    fn ack(&mut self, tag: &DeliveryTag) -> Result<(), QueueError> {
        self.in_flight_for(tag)?;
        let (stream, group) = (self.config.stream_key.clone(), self.config.group.clone());

        let _: u64 = self
            .conn()?
            .xack(&stream, &group, &[tag.as_str()])
            .map_err(map_redis_error)?;

        self.in_flight = None;
        Ok(())
    }

    #[instrument(skip(self), fields(stream = %self.config.stream_key), err)]
    fn reject(&mut self, tag: &DeliveryTag, requeue: bool) -> Result<(), QueueError> {
        let (payload, attempt) = {
            let current = self.in_flight_for(tag)?;
            (current.payload.clone(), current.attempt)
        };
        let (stream, group, dlq) = (
            self.config.stream_key.clone(),
            self.config.group.clone(),
            self.config.dlq_key(),
        );

        let mut pipe = redis::pipe();
        pipe.atomic();
        if requeue {
            pipe.cmd("XADD")
                .arg(&stream)
                .arg("*")
                .arg(PAYLOAD_FIELD)
                .arg(&payload)
                .arg(ATTEMPT_FIELD)
                .arg(attempt + 1)
                .ignore();
        } else {
            pipe.cmd("XADD")
                .arg(&dlq)
                .arg("*")
                .arg(PAYLOAD_FIELD)
                .arg(&payload)
                .arg(ATTEMPT_FIELD)
                .arg(attempt)
                .arg("original_id")
                .arg(tag.as_str())
                .arg("failed_at")
                .arg(chrono::Utc::now().to_rfc3339())
                .ignore();
        }
        pipe.cmd("XACK").arg(&stream).arg(&group).arg(tag.as_str()).ignore();

        pipe.query::<()>(self.conn()?).map_err(map_redis_error)?;

        if !requeue {
            warn!(delivery_tag = %tag, dlq = %dlq, "message sent to dead-letter stream");
        }
        self.in_flight = None;
        Ok(())
    }

    fn close(&mut self) -> Result<(), QueueError> {
        // Unsettled entries stay pending for this consumer and are re-read on restart.
        if let Some(current) = self.in_flight.take() {
            warn!(delivery_tag = %current.tag, "closing with an unsettled delivery");
        }
        if self.conn.take().is_some() {
            info!(stream = %self.config.stream_key, "broker connection closed");
        }
        Ok(())
    }
}

fn first_entry(reply: Option<StreamReadReply>) -> Option<StreamId> {
    reply?
        .keys
        .into_iter()
        .next()
        .and_then(|key| key.ids.into_iter().next())
}

fn map_redis_error(err: RedisError) -> QueueError {
    if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() || err.is_timeout() {
        QueueError::Connection(err.to_string())
    } else {
        QueueError::Command(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding(tag: &str) -> RedisStreamsQueue {
        RedisStreamsQueue {
            config: RedisStreamsConfig {
                redis_url: "redis://127.0.0.1:6379".to_string(),
                stream_key: "analysis_queue".to_string(),
                group: "analysis-workers".to_string(),
                consumer: "w1".to_string(),
            },
            conn: None,
            in_flight: Some(InFlight {
                tag: DeliveryTag::new(tag),
                payload: b"{}".to_vec(),
                attempt: 2,
            }),
            pending_drained: true,
        }
    }

    #[test]
    fn in_flight_lookup_leaves_the_delivery_unsettled() {
        let queue = holding("1-0");
        let current = queue.in_flight_for(&DeliveryTag::new("1-0")).unwrap();
        assert_eq!(current.attempt, 2);
        assert!(queue.in_flight.is_some());

        assert_eq!(
            queue.in_flight_for(&DeliveryTag::new("2-0")).unwrap_err(),
            QueueError::UnknownDelivery(DeliveryTag::new("2-0"))
        );
    }

    #[test]
    fn settling_a_foreign_tag_fails_before_touching_the_broker() {
        let mut queue = holding("1-0");
        assert_eq!(
            queue.ack(&DeliveryTag::new("9-0")),
            Err(QueueError::UnknownDelivery(DeliveryTag::new("9-0")))
        );
        assert_eq!(
            queue.reject(&DeliveryTag::new("9-0"), true),
            Err(QueueError::UnknownDelivery(DeliveryTag::new("9-0")))
        );
        assert!(queue.in_flight.is_some());
    }

    #[test]
    fn dead_letter_stream_is_suffixed() {
        assert_eq!(holding("1-0").config.dlq_key(), "analysis_queue:dlq");
    }
}
