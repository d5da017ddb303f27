//! Broker evaluation benchmark
//!
//! Benchmarks `Broker::evaluate_execution` driving a linear three-step
//! playbook from `execution_start` through to `execution_complete`,
//! including every intermediate `evaluate_execution` call a real
//! dispatcher would make as each step's completion event lands.

use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use flowline_core::catalog::InMemoryCatalog;
use flowline_core::persistence::InMemoryStore;
use flowline_core::{Broker, BrokerConfig, Renderer};
use flowline_contracts::{Event, EventStatus, EventType, JobStatus};
use serde_json::json;
use tokio::runtime::Runtime;

const LINEAR: &str = r#"
path: bench
version: 0.1.0
workflow:
  - step: start
    type: http
    next:
      - step: a
  - step: a
    type: python
    code: "x = 21"
    next:
      - step: end
  - step: end
    type: transfer
    result:
      x: "{{ a.x }}"
    next: []
"#;

async fn run_one_execution(execution_id: i64) {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.put("bench", "0.1.0", LINEAR.to_string()).unwrap();
    let store = Arc::new(InMemoryStore::new());
    let broker = Broker::with_config(
        store.clone(),
        catalog,
        Arc::new(Renderer::new()),
        BrokerConfig {
            evaluation_delay: Duration::ZERO,
        },
    );

    let mut start = Event::new(
        execution_id,
        EventType::ExecutionStart,
        execution_id.to_string(),
    );
    start.status = EventStatus::Running;
    start.context = json!({"path": "bench", "version": "0.1.0", "workload": {}});
    store.append(start.clone()).await.unwrap();

    broker
        .evaluate_execution(execution_id, EventType::ExecutionStart, &start)
        .await
        .unwrap();

    // Drain the two actionable steps ("start" then "a") by leasing,
    // acking, and feeding the broker the resulting completion event.
    for _ in 0..2 {
        let job = store.lease("bench-worker", 30).await.unwrap().unwrap();
        store.ack(job.id).await.unwrap();

        let mut completed = Event::new(execution_id, EventType::ActionCompleted, job.node_id.clone());
        completed.status = EventStatus::Completed;
        completed.context = job.context.clone();
        completed.result = json!({"x": 21});
        let completed = store.append(completed).await.unwrap();

        broker
            .evaluate_execution(execution_id, EventType::ActionCompleted, &completed)
            .await
            .unwrap();
    }

    assert_eq!(store.size_by_status(JobStatus::Queued).await.unwrap(), 0);
}

fn bench_linear_playbook(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("broker_evaluation/linear");
    group.throughput(Throughput::Elements(1));

    group.bench_function("three_step", |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let start = Instant::now();
            for i in 0..iters {
                run_one_execution(i as i64 + 1).await;
            }
            start.elapsed()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_linear_playbook);
criterion_main!(benches);
