//! In-memory work queue for tests/dev.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::delivery::{Delivery, DeliveryTag};
use crate::queue::{MessageQueue, QueueError};

#[derive(Debug, Clone)]
struct Message {
    payload: Vec<u8>,
    redelivery_count: u32,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Message>,
    in_flight: Option<(DeliveryTag, Message)>,
    acked: Vec<Vec<u8>>,
    dead_letters: Vec<Vec<u8>>,
    requeued: usize,
    next_tag: u64,
    closed: bool,
    disconnected: bool,
}

/// In-memory durable-queue stand-in.
///
/// - No IO
/// - Single consumer, one unsettled delivery at a time
/// - Cloning yields another handle on the same queue (publish / inspect from tests)
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    inner: Arc<(Mutex<State>, Condvar)>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.0.lock().unwrap()
    }

    /// Enqueue a raw payload.
    pub fn publish(&self, payload: impl Into<Vec<u8>>) {
        let mut state = self.state();
        state.ready.push_back(Message {
            payload: payload.into(),
            redelivery_count: 0,
        });
        self.inner.1.notify_all();
    }

    /// Messages waiting to be delivered.
    pub fn ready_len(&self) -> usize {
        self.state().ready.len()
    }

    /// Whether a delivery is currently unsettled.
    pub fn has_in_flight(&self) -> bool {
        self.state().in_flight.is_some()
    }

    /// Payloads acknowledged so far.
    pub fn acked(&self) -> Vec<Vec<u8>> {
        self.state().acked.clone()
    }

    /// Payloads rejected without redelivery.
    pub fn dead_letters(&self) -> Vec<Vec<u8>> {
        self.state().dead_letters.clone()
    }

    /// Number of requeue operations performed.
    pub fn requeued(&self) -> usize {
        self.state().requeued
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Simulate losing the broker connection: every later call fails.
    pub fn disconnect(&self) {
        self.state().disconnected = true;
        self.inner.1.notify_all();
    }

    fn check_open(state: &State) -> Result<(), QueueError> {
        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.disconnected {
            return Err(QueueError::Connection("connection reset".to_string()));
        }
        Ok(())
    }

    fn take_in_flight(state: &mut State, tag: &DeliveryTag) -> Result<Message, QueueError> {
        match state.in_flight.take() {
            Some((current, message)) if &current == tag => Ok(message),
            other => {
                state.in_flight = other;
                Err(QueueError::UnknownDelivery(tag.clone()))
            }
        }
    }
}

impl MessageQueue for InMemoryQueue {
    fn next_delivery(&mut self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + timeout;
        let (lock, ready) = &*self.inner;
        let mut state = lock.lock().unwrap();

        loop {
            Self::check_open(&state)?;
            if let Some((tag, _)) = &state.in_flight {
                return Err(QueueError::InFlight(tag.clone()));
            }

            if let Some(message) = state.ready.pop_front() {
                state.next_tag += 1;
                let tag = DeliveryTag::new(state.next_tag.to_string());
                let delivery = Delivery {
                    tag: tag.clone(),
                    payload: message.payload.clone(),
                    redelivery_count: message.redelivery_count,
                };
                state.in_flight = Some((tag, message));
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = ready.wait_timeout(state, deadline - now).unwrap().0;
        }
    }

    fn ack(&mut self, tag: &DeliveryTag) -> Result<(), QueueError> {
        let mut state = self.state();
        Self::check_open(&state)?;
        let message = Self::take_in_flight(&mut state, tag)?;
        state.acked.push(message.payload);
        Ok(())
    }

    fn reject(&mut self, tag: &DeliveryTag, requeue: bool) -> Result<(), QueueError> {
        let mut state = self.state();
        Self::check_open(&state)?;
        let mut message = Self::take_in_flight(&mut state, tag)?;

        if requeue {
            message.redelivery_count += 1;
            state.ready.push_back(message);
            state.requeued += 1;
            self.inner.1.notify_all();
        } else {
            state.dead_letters.push(message.payload);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), QueueError> {
        let mut state = self.state();
        // An unsettled delivery goes back to the queue, as a broker would do.
        if let Some((_, mut message)) = state.in_flight.take() {
            message.redelivery_count += 1;
            state.ready.push_front(message);
        }
        state.closed = true;
        self.inner.1.notify_all();
        Ok(())
    }
}
