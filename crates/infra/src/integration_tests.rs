//! Integration tests for the full delivery pipeline.
//!
//! Tests: Queue → Consumer → Engine → Strategy → JobStore
//!
//! Verifies:
//! - Each outcome class settles the delivery the right way
//! - Redelivered messages never re-run a job
//! - A store outage leaves the job at its last committed state
//! - Artifact load failures surface as recorded analysis errors

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use proptest::prelude::*;
    use serde_json::json;

    use idh_analysis::strategies::AnomalyDetection;
    use idh_analysis::{
        AnalysisError, AnalysisOutput, ArtifactBundle, ArtifactCache, LoadError, StrategyRegistry,
    };
    use idh_core::{DataSourceId, Disposition, JobId, JobRecord, JobStatus, JobUpdate, TaskDescriptor};
    use idh_queue::{InMemoryQueue, MessageQueue};

    use crate::consumer::QueueConsumer;
    use crate::engine::JobEngine;
    use crate::jobs::{InMemoryJobStore, JobStore, StoreError};

    const TICK: Duration = Duration::from_millis(5);

    /// Store wrapper whose `fail_at`-th update attempt (1-based) fails once,
    /// as does its `fetch_fail_at`-th read. Zero never fails.
    struct FlakyStore {
        inner: Arc<InMemoryJobStore>,
        fail_at: usize,
        attempts: AtomicUsize,
        fetch_fail_at: usize,
        fetches: AtomicUsize,
    }

    impl FlakyStore {
        fn new(inner: Arc<InMemoryJobStore>, fail_at: usize) -> Self {
            Self {
                inner,
                fail_at,
                attempts: AtomicUsize::new(0),
                fetch_fail_at: 0,
                fetches: AtomicUsize::new(0),
            }
        }

        fn failing_fetch(inner: Arc<InMemoryJobStore>, fetch_fail_at: usize) -> Self {
            Self {
                fetch_fail_at,
                ..Self::new(inner, 0)
            }
        }

        fn outage(counter: &AtomicUsize, fail_at: usize) -> Result<(), StoreError> {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt == fail_at {
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            Ok(())
        }
    }

    impl JobStore for FlakyStore {
        fn fetch(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
            Self::outage(&self.fetches, self.fetch_fail_at)?;
            self.inner.fetch(id)
        }

        fn update(&self, id: JobId, update: &JobUpdate) -> Result<JobRecord, StoreError> {
            Self::outage(&self.attempts, self.fail_at)?;
            self.inner.update(id, update)
        }

        fn update_if(
            &self,
            id: JobId,
            expected: JobStatus,
            update: &JobUpdate,
        ) -> Result<Option<JobRecord>, StoreError> {
            Self::outage(&self.attempts, self.fail_at)?;
            self.inner.update_if(id, expected, update)
        }

        fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping()
        }

        fn find_stale_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError> {
            self.inner.find_stale_running(cutoff)
        }
    }

    fn registry() -> StrategyRegistry {
        StrategyRegistry::new()
            .with("X", |_: &Path| -> Result<AnalysisOutput, AnalysisError> {
                Ok(AnalysisOutput::new("done", json!({ "values": [1, 2, 3] })))
            })
            .with("BAD", |_: &Path| -> Result<AnalysisOutput, AnalysisError> {
                Err(AnalysisError::InsufficientData("0 rows".to_string()))
            })
    }

    fn file_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("input.csv"), "a;b\n1;2\n").unwrap();
        dir
    }

    fn pending(store: &InMemoryJobStore, id: i64, kind: &str) -> JobId {
        let id = JobId::new(id);
        store.insert(JobRecord::pending(id, DataSourceId::new(1), kind));
        id
    }

    /// Handle every message currently available, including requeued ones.
    fn drain<S: JobStore>(
        consumer: &mut QueueConsumer<InMemoryQueue, S>,
        queue: &InMemoryQueue,
    ) -> Vec<Disposition> {
        let mut settled = Vec::new();
        let mut q = queue.clone();
        while let Some(delivery) = q.next_delivery(TICK).unwrap() {
            settled.push(consumer.handle(&delivery).unwrap());
            assert!(settled.len() < 20, "queue never drained");
        }
        settled
    }

    #[test]
    fn missing_input_file_fails_the_job_and_acks() {
        let root = file_root();
        let queue = InMemoryQueue::new();
        let store = InMemoryJobStore::arc();
        let id = pending(&store, 1, "X");
        let mut consumer = QueueConsumer::new(
            queue.clone(),
            JobEngine::new(store.clone(), Arc::new(registry()), root.path()),
            TICK,
        );

        queue.publish(r#"{"analysisResultId":1,"filePath":"missing.csv","analysisType":"X"}"#);

        assert_eq!(drain(&mut consumer, &queue), vec![Disposition::Ack]);
        let job = store.fetch(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("missing.csv"));
        assert_eq!(
            store.status_history(id),
            vec![JobStatus::Running, JobStatus::Failed]
        );
        assert_eq!(queue.acked().len(), 1);
    }

    #[test]
    fn descriptor_without_job_id_is_rejected_without_writes() {
        let root = file_root();
        let queue = InMemoryQueue::new();
        let store = InMemoryJobStore::arc();
        pending(&store, 1, "X");
        let mut consumer = QueueConsumer::new(
            queue.clone(),
            JobEngine::new(store.clone(), Arc::new(registry()), root.path()),
            TICK,
        );

        queue.publish(r#"{"filePath":"input.csv","analysisType":"X"}"#);

        assert_eq!(drain(&mut consumer, &queue), vec![Disposition::Reject]);
        assert_eq!(queue.dead_letters().len(), 1);
        assert_eq!(queue.requeued(), 0);
        assert!(store.writes().is_empty());
    }

    #[test]
    fn redelivery_of_completed_job_is_acked_without_writes() {
        let root = file_root();
        let queue = InMemoryQueue::new();
        let store = InMemoryJobStore::arc();
        let mut done = JobRecord::pending(JobId::new(2), DataSourceId::new(1), "X");
        done.status = JobStatus::Completed;
        done.result_summary = Some("done".to_string());
        store.insert(done.clone());
        let mut consumer = QueueConsumer::new(
            queue.clone(),
            JobEngine::new(store.clone(), Arc::new(registry()), root.path()),
            TICK,
        );

        queue.publish(TaskDescriptor::new(JobId::new(2), "input.csv", "X").encode());

        assert_eq!(drain(&mut consumer, &queue), vec![Disposition::Ack]);
        assert!(store.writes().is_empty());
        assert_eq!(store.fetch(JobId::new(2)).unwrap(), Some(done));
        assert_eq!(consumer.stats().duplicates, 1);
    }

    #[test]
    fn store_outage_at_finalize_requeues_and_leaves_job_running() {
        let root = file_root();
        let queue = InMemoryQueue::new();
        let inner = InMemoryJobStore::arc();
        let id = pending(&inner, 3, "X");
        // Update 1 is the claim, update 2 the finalize.
        let store = Arc::new(FlakyStore::new(inner.clone(), 2));
        let mut consumer = QueueConsumer::new(
            queue.clone(),
            JobEngine::new(store, Arc::new(registry()), root.path()),
            TICK,
        );

        queue.publish(TaskDescriptor::new(id, "input.csv", "X").encode());

        let mut q = queue.clone();
        let delivery = q.next_delivery(TICK).unwrap().unwrap();
        assert_eq!(consumer.handle(&delivery), Ok(Disposition::Requeue));
        assert_eq!(queue.requeued(), 1);
        let job = inner.fetch(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.result_summary, None);

        // The redelivery finds the job claimed and does not run it again.
        assert_eq!(drain(&mut consumer, &queue), vec![Disposition::Ack]);
        assert_eq!(inner.status_history(id), vec![JobStatus::Running]);
        assert_eq!(consumer.stats().infrastructure_errors, 1);
    }

    #[test]
    fn store_outage_at_fetch_requeues_without_writes() {
        let root = file_root();
        let queue = InMemoryQueue::new();
        let inner = InMemoryJobStore::arc();
        let id = pending(&inner, 4, "X");
        let store = Arc::new(FlakyStore::failing_fetch(inner.clone(), 1));
        let mut consumer = QueueConsumer::new(
            queue.clone(),
            JobEngine::new(store, Arc::new(registry()), root.path()),
            TICK,
        );

        queue.publish(TaskDescriptor::new(id, "input.csv", "X").encode());

        let mut q = queue.clone();
        let delivery = q.next_delivery(TICK).unwrap().unwrap();
        assert_eq!(consumer.handle(&delivery), Ok(Disposition::Requeue));
        assert_eq!(queue.requeued(), 1);
        assert!(inner.writes().is_empty());
        assert_eq!(inner.fetch(id).unwrap().unwrap().status, JobStatus::Pending);

        // Nothing was claimed, so the redelivery runs the job normally.
        assert_eq!(drain(&mut consumer, &queue), vec![Disposition::Ack]);
        assert_eq!(
            inner.status_history(id),
            vec![JobStatus::Running, JobStatus::Completed]
        );
        assert_eq!(consumer.stats().infrastructure_errors, 1);
    }

    #[test]
    fn real_job_after_failed_prewarm_loads_again_and_fails() {
        let root = file_root();
        let calls = Arc::new(AtomicUsize::new(0));
        let loader_calls = calls.clone();
        let cache = Arc::new(ArtifactCache::new(
            move |kind: &str| -> Result<ArtifactBundle, LoadError> {
                loader_calls.fetch_add(1, Ordering::SeqCst);
                Err(LoadError::Missing {
                    path: format!("models/{kind}.json"),
                })
            },
            ["K"],
        ));

        let failed = cache.prewarm();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "K");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let registry = StrategyRegistry::new().with("K", AnomalyDetection::new(cache.clone(), "K"));
        let queue = InMemoryQueue::new();
        let store = InMemoryJobStore::arc();
        let id = pending(&store, 4, "K");
        let mut consumer = QueueConsumer::new(
            queue.clone(),
            JobEngine::new(store.clone(), Arc::new(registry), root.path()),
            TICK,
        );

        queue.publish(TaskDescriptor::new(id, "input.csv", "K").encode());

        assert_eq!(drain(&mut consumer, &queue), vec![Disposition::Ack]);
        let job = store.fetch(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("artifact not found: models/K.json")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.is_loaded("K"));
    }

    #[test]
    fn consumer_thread_processes_published_jobs() {
        let root = file_root();
        let queue = InMemoryQueue::new();
        let store = InMemoryJobStore::arc();
        let ok = pending(&store, 10, "X");
        let bad = pending(&store, 11, "BAD");
        let handle = QueueConsumer::new(
            queue.clone(),
            JobEngine::new(store.clone(), Arc::new(registry()), root.path()),
            TICK,
        )
        .spawn("integration-consumer")
        .unwrap();

        queue.publish(TaskDescriptor::new(ok, "input.csv", "X").encode());
        queue.publish(TaskDescriptor::new(bad, "input.csv", "BAD").encode());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while queue.acked().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(TICK);
        }

        let stats = handle.shutdown().unwrap();
        assert_eq!(stats.acked, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(store.fetch(ok).unwrap().unwrap().status, JobStatus::Completed);
        let failed = store.fetch(bad).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("insufficient data: 0 rows"));
    }

    fn is_prefix_of_lifecycle(history: &[JobStatus]) -> bool {
        let mut current = JobStatus::Pending;
        history.iter().all(|&next| {
            let ok = current.can_transition_to(next);
            current = next;
            ok
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: delivering the same descriptor any number of times runs
        /// the job once and acknowledges every delivery.
        #[test]
        fn duplicate_deliveries_run_the_job_once(
            copies in 1usize..6,
            succeed in any::<bool>(),
        ) {
            let root = file_root();
            let queue = InMemoryQueue::new();
            let store = InMemoryJobStore::arc();
            let kind = if succeed { "X" } else { "BAD" };
            let id = pending(&store, 1, kind);
            let mut consumer = QueueConsumer::new(
                queue.clone(),
                JobEngine::new(store.clone(), Arc::new(registry()), root.path()),
                TICK,
            );

            for _ in 0..copies {
                queue.publish(TaskDescriptor::new(id, "input.csv", kind).encode());
            }

            let settled = drain(&mut consumer, &queue);
            prop_assert_eq!(settled, vec![Disposition::Ack; copies]);
            let terminal = if succeed { JobStatus::Completed } else { JobStatus::Failed };
            prop_assert_eq!(store.status_history(id), vec![JobStatus::Running, terminal]);
            prop_assert_eq!(consumer.stats().duplicates, copies as u64 - 1);
        }

        /// Property: whichever write fails, the persisted statuses are a
        /// prefix of PENDING → RUNNING → terminal and the queue drains.
        #[test]
        fn persisted_statuses_follow_the_lifecycle(
            fail_at in 0usize..4,
            succeed in any::<bool>(),
        ) {
            let root = file_root();
            let queue = InMemoryQueue::new();
            let inner = InMemoryJobStore::arc();
            let kind = if succeed { "X" } else { "BAD" };
            let id = pending(&inner, 1, kind);
            let mut consumer = QueueConsumer::new(
                queue.clone(),
                JobEngine::new(Arc::new(FlakyStore::new(inner.clone(), fail_at)), Arc::new(registry()), root.path()),
                TICK,
            );

            queue.publish(TaskDescriptor::new(id, "input.csv", kind).encode());
            drain(&mut consumer, &queue);

            let history = inner.status_history(id);
            prop_assert!(is_prefix_of_lifecycle(&history), "history {:?}", history);
            let status = inner.fetch(id).unwrap().unwrap().status;
            prop_assert_ne!(status, JobStatus::Pending);
            prop_assert_eq!(queue.ready_len(), 0);
            prop_assert!(!queue.has_in_flight());
        }
    }
}
