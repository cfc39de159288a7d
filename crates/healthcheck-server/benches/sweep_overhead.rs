// Measures what metrics recording adds on top of a sweep

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use healthcheck_engine::probes::ApplicationLifetime;
use healthcheck_engine::{HealthCheckEngine, Report};
use healthcheck_server::{Config, MetricsRegistry, build_registry};
use std::hint::black_box;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn lifecycle_engine(count: usize) -> HealthCheckEngine {
    let mut yaml = String::from("probes:\n");
    for i in 0..count {
        yaml.push_str(&format!("  - kind: lifecycle\n    name: app-{i}\n"));
    }
    let config = Config::from_yaml(&yaml).unwrap();
    let lifetime = ApplicationLifetime::new();
    lifetime.notify_started();
    HealthCheckEngine::new(build_registry(&config, reqwest::Client::new(), &lifetime).unwrap())
}

fn bench_metrics_recording(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics_recording");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let report: Report = rt.block_on(lifecycle_engine(20).run(&CancellationToken::new()));

    group.bench_function("disabled", |b| {
        let metrics: Option<Arc<MetricsRegistry>> = None;
        b.iter(|| {
            if let Some(ref m) = metrics {
                m.record_report(black_box(&report));
            }
        });
    });

    group.bench_function("enabled", |b| {
        let metrics = Some(Arc::new(MetricsRegistry::new()));
        b.iter(|| {
            if let Some(ref m) = metrics {
                m.record_report(black_box(&report));
            }
        });
    });

    group.finish();
}

fn bench_sweep_with_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep_with_metrics");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let metrics = MetricsRegistry::new();

    for count in [1, 10, 100].iter() {
        let engine = lifecycle_engine(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let report = engine.run(&CancellationToken::new()).await;
                    metrics.record_report(&report);
                    black_box(report)
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_metrics_recording, bench_sweep_with_metrics);
criterion_main!(benches);
