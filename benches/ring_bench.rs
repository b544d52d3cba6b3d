use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;
use task_ring::config::DispatcherConfig;
use task_ring::task::LoggingActionHandler;
use task_ring::{DistributedTaskService, InMemoryTaskStore, Membership, TargetApp, TaskAction, TaskRing};
use tokio::runtime::Runtime;

fn servers(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("server-{}", i)).collect()
}

fn ring_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("task_ring");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));

    for count in [3usize, 16, 64] {
        let ring = TaskRing::with_servers(100, servers(count));
        group.bench_with_input(BenchmarkId::new("locate", count), &ring, |b, ring| {
            let mut app_id = 0i64;
            b.iter(|| {
                app_id += 1;
                black_box(ring.locate(&app_id.to_string()).ok());
            })
        });
    }

    group.bench_function("add_server", |b| {
        b.iter_batched(
            || TaskRing::with_servers(100, servers(16)),
            |mut ring| {
                black_box(ring.add_server("server-new"));
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn poll_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("dispatch");
    group.sample_size(20);

    group.bench_function("poll_once_500_tasks", |b| {
        b.iter(|| {
            rt.block_on(async {
                let service = DistributedTaskService::new(
                    Arc::new(Membership::default()),
                    Arc::new(InMemoryTaskStore::new()),
                    Arc::new(LoggingActionHandler),
                    DispatcherConfig::default(),
                );
                service.init(["s1"], "s1").unwrap();

                for app_id in 1..=500 {
                    service
                        .save_distributed_task(&TargetApp::flink(app_id, "bench"), false, TaskAction::Start)
                        .await
                        .unwrap();
                }
                black_box(service.poll_once().await.unwrap());
            });
        })
    });

    group.finish();
}

criterion_group!(benches, ring_benchmark, poll_benchmark);
criterion_main!(benches);
