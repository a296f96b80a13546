use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};

use idh_analysis::strategies::AnomalyDetection;
use idh_analysis::{
    AnalysisError, AnalysisOutput, AnalysisStrategy, ArtifactBundle, ArtifactCache, DenseNetwork,
    LoadError, StrategyRegistry,
};
use idh_analysis::model::{DenseLayerSpec, DenseNetworkSpec};
use idh_core::{DataSourceId, JobId, JobRecord, JobStatus, TaskDescriptor};
use idh_infra::{InMemoryJobStore, JobEngine};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

fn echo_engine(root: &Path) -> (Arc<InMemoryJobStore>, JobEngine<Arc<InMemoryJobStore>>) {
    let registry = StrategyRegistry::new().with("ECHO", |_: &Path| -> Result<AnalysisOutput, AnalysisError> {
        Ok(AnalysisOutput::new("ok", json!({ "n": 1 })))
    });
    let store = InMemoryJobStore::arc();
    let engine = JobEngine::new(store.clone(), Arc::new(registry), root);
    (store, engine)
}

fn input_root() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("input.csv"), "x").unwrap();
    dir
}

fn bench_engine_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_process");
    let root = input_root();
    let (store, engine) = echo_engine(root.path());
    let task = TaskDescriptor::new(JobId::new(1), "input.csv", "ECHO");

    // Full lifecycle: fetch, claim, run, complete.
    group.bench_function("pending_to_completed", |b| {
        b.iter_batched(
            || store.insert(JobRecord::pending(JobId::new(1), DataSourceId::new(1), "ECHO")),
            |()| black_box(engine.process(&task).unwrap()),
            BatchSize::SmallInput,
        );
    });

    // Idempotency guard only: one read, no writes.
    group.bench_function("duplicate_delivery", |b| {
        let mut done = JobRecord::pending(JobId::new(1), DataSourceId::new(1), "ECHO");
        done.status = JobStatus::Completed;
        store.insert(done);
        b.iter(|| black_box(engine.process(&task).unwrap()));
    });

    group.finish();
}

fn identity_network(width: usize) -> DenseNetwork {
    let weights = (0..width)
        .map(|i| (0..width).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();
    DenseNetwork::from_spec(DenseNetworkSpec {
        layers: vec![DenseLayerSpec {
            weights,
            bias: vec![0.0; width],
            activation: Default::default(),
        }],
    })
    .unwrap()
}

fn sensor_csv(rows: usize) -> String {
    let mut columns = vec![AnomalyDetection::TIME_COLUMN];
    columns.extend(AnomalyDetection::SENSOR_COLUMNS);
    let mut csv = columns.join(";");
    csv.push('\n');
    for row in 0..rows {
        let values: Vec<String> = (0..AnomalyDetection::SENSOR_COLUMNS.len())
            .map(|col| format!("{:.3}", ((row * 7 + col) % 13) as f64 / 13.0))
            .collect();
        csv.push_str(&format!("2024-01-01 00:{:02}:00;{}\n", row % 60, values.join(";")));
    }
    csv
}

fn bench_anomaly_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("anomaly_detection");
    let width = AnomalyDetection::WINDOW * AnomalyDetection::SENSOR_COLUMNS.len();
    let network = Arc::new(identity_network(width));
    let cache = Arc::new(ArtifactCache::new(
        move |_: &str| -> Result<ArtifactBundle, LoadError> {
            Ok(ArtifactBundle::new(network.clone()).with_threshold(AnomalyDetection::DEFAULT_THRESHOLD))
        },
        ["ANOMALY_DETECTION"],
    ));
    let strategy = AnomalyDetection::new(cache, "ANOMALY_DETECTION");
    let dir = tempfile::tempdir().unwrap();

    for rows in [100usize, 1_000] {
        let path = dir.path().join(format!("sensors-{rows}.csv"));
        std::fs::write(&path, sensor_csv(rows)).unwrap();

        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::new("execute", rows), &path, |b, path| {
            b.iter(|| black_box(strategy.execute(path).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_engine_process, bench_anomaly_detection);
criterion_main!(benches);
