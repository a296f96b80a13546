//! Queue consumer loop.
//!
//! - Exactly one unsettled delivery at a time: fetch, process, settle, repeat
//! - Every delivery is settled exactly once, by the disposition of its outcome
//! - Stops on a shutdown signal or a fatal broker error; the queue is closed
//!   on every exit path

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use idh_core::{Disposition, ErrorClass, TaskDescriptor};
use idh_queue::{Delivery, MessageQueue, QueueError};

use crate::engine::{JobEngine, JobOutcome, ProcessError};
use crate::jobs::JobStore;

/// Counters kept by a running consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub deliveries: u64,
    pub acked: u64,
    pub rejected: u64,
    pub requeued: u64,
    pub completed: u64,
    pub failed: u64,
    pub duplicates: u64,
    pub data_errors: u64,
    pub infrastructure_errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsumerError {
    #[error("broker failure: {0}")]
    Broker(#[from] QueueError),
}

/// Handle to control and join a consumer thread.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<Result<ConsumerStats, ConsumerError>>>,
    stats: Arc<Mutex<ConsumerStats>>,
}

impl ConsumerHandle {
    /// Request graceful shutdown and wait for the loop to stop.
    ///
    /// The current delivery, if any, is finished and settled first.
    pub fn shutdown(mut self) -> Result<ConsumerStats, ConsumerError> {
        let _ = self.shutdown.send(());
        self.join()
    }

    /// Wait for the loop to stop on its own (broker failure).
    pub fn join(&mut self) -> Result<ConsumerStats, ConsumerError> {
        match self.join.take() {
            Some(join) => join.join().unwrap_or_else(|_| {
                Err(ConsumerError::Broker(QueueError::Connection(
                    "consumer thread panicked".to_string(),
                )))
            }),
            None => Ok(self.stats()),
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.lock().unwrap().clone()
    }
}

/// Binds one queue to one engine.
pub struct QueueConsumer<Q, S> {
    queue: Q,
    engine: JobEngine<S>,
    poll_interval: Duration,
    max_redeliveries: Option<u32>,
    stats: Arc<Mutex<ConsumerStats>>,
}

impl<Q, S> QueueConsumer<Q, S>
where
    Q: MessageQueue,
    S: JobStore,
{
    pub fn new(queue: Q, engine: JobEngine<S>, poll_interval: Duration) -> Self {
        Self {
            queue,
            engine,
            poll_interval,
            max_redeliveries: None,
            stats: Arc::new(Mutex::new(ConsumerStats::default())),
        }
    }

    /// Dead-letter instead of requeueing once a message has been redelivered
    /// `max` times. `None` requeues forever.
    pub fn with_max_redeliveries(mut self, max: Option<u32>) -> Self {
        self.max_redeliveries = max;
        self
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.lock().unwrap().clone()
    }

    /// Consume until `shutdown` receives a message or the broker fails.
    ///
    /// Returns the final counters on a clean shutdown.
    pub fn run(mut self, shutdown: &mpsc::Receiver<()>) -> Result<ConsumerStats, ConsumerError> {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "consumer started");

        let result = self.consume(shutdown);

        if let Err(e) = self.queue.close() {
            warn!(error = %e, "failed to close broker connection");
        }

        let stats = self.stats();
        match &result {
            Ok(()) => info!(?stats, "consumer stopped"),
            Err(e) => error!(error = %e, ?stats, "consumer stopped on broker failure"),
        }
        result.map(|()| stats).map_err(ConsumerError::Broker)
    }

    /// Run the loop on a dedicated thread.
    pub fn spawn(self, name: &str) -> std::io::Result<ConsumerHandle>
    where
        Q: 'static,
        S: 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = self.stats.clone();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || self.run(&shutdown_rx))?;

        Ok(ConsumerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }

    fn consume(&mut self, shutdown: &mpsc::Receiver<()>) -> Result<(), QueueError> {
        loop {
            // Shutdown check (non-blocking)
            if shutdown.try_recv().is_ok() {
                info!("shutdown requested");
                return Ok(());
            }

            match self.queue.next_delivery(self.poll_interval) {
                Ok(Some(delivery)) => {
                    self.handle(&delivery)?;
                }
                Ok(None) => continue,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "failed to receive delivery; retrying");
                    thread::sleep(self.poll_interval);
                }
            }
        }
    }

    /// Decode, process and settle one delivery. Any settle failure is returned;
    /// the loop does not try to settle the same delivery again.
    #[instrument(
        skip(self, delivery),
        fields(delivery_tag = %delivery.tag, redelivery_count = delivery.redelivery_count)
    )]
    pub fn handle(&mut self, delivery: &Delivery) -> Result<Disposition, QueueError> {
        let result = TaskDescriptor::decode(&delivery.payload)
            .map_err(ProcessError::from)
            .and_then(|task| self.engine.process(&task));

        let mut disposition = match &result {
            Ok(outcome) => {
                self.record_outcome(outcome);
                Disposition::Ack
            }
            Err(err) => {
                let class = err.class();
                match class {
                    ErrorClass::Infrastructure => {
                        error!(error = %err, class = %class, "delivery failed")
                    }
                    _ => warn!(error = %err, class = %class, "delivery failed"),
                }
                self.record_error(class);
                class.disposition()
            }
        };

        if disposition == Disposition::Requeue {
            if let Some(max) = self.max_redeliveries {
                if delivery.redelivery_count >= max {
                    warn!(max, "redelivery limit reached; dead-lettering");
                    disposition = Disposition::Reject;
                }
            }
        }

        self.queue.settle(&delivery.tag, disposition)?;
        self.record_disposition(disposition);
        info!(disposition = %disposition, "delivery settled");
        Ok(disposition)
    }

    fn record_outcome(&self, outcome: &JobOutcome) {
        let mut stats = self.stats.lock().unwrap();
        stats.deliveries += 1;
        match outcome {
            JobOutcome::Completed { .. } => stats.completed += 1,
            JobOutcome::Failed { .. } => stats.failed += 1,
            JobOutcome::Duplicate { .. } => stats.duplicates += 1,
        }
    }

    fn record_error(&self, class: ErrorClass) {
        let mut stats = self.stats.lock().unwrap();
        stats.deliveries += 1;
        match class {
            ErrorClass::Data => stats.data_errors += 1,
            ErrorClass::Infrastructure => stats.infrastructure_errors += 1,
            ErrorClass::Analysis => stats.failed += 1,
        }
    }

    fn record_disposition(&self, disposition: Disposition) {
        let mut stats = self.stats.lock().unwrap();
        match disposition {
            Disposition::Ack => stats.acked += 1,
            Disposition::Reject => stats.rejected += 1,
            Disposition::Requeue => stats.requeued += 1,
        }
    }
}
