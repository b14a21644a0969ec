//! End-to-end worker runtime scenarios against `bk_storage_memory`.

use bk_config::{QueueConfig, WorkerConfig};
use bk_core::{ArgBundle, Id, JobStatus, PriorityFilter};
use bk_queue::{EnqueueSpec, Queue};
use bk_registry::{JobContext, TaskConfig, TaskHandler, TaskRegistry};
use bk_storage_memory::MemoryStorage;
use bk_worker::{ConcurrencyModel, Worker, WorkerLifecycle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval_ms: 20,
        poll_jitter_ms: 5,
        heartbeat_interval_seconds: 3600,
        default_lease_seconds: 30,
        ..WorkerConfig::default()
    }
}

async fn wait_for_status(queue: &Queue, id: &Id, expected: JobStatus, timeout: Duration) {
    let start = tokio::time::Instant::now();
    loop {
        let job = queue.get(id).await.unwrap();
        if job.status == expected {
            return;
        }
        if start.elapsed() > timeout {
            panic!("job {id} did not reach {expected:?} within {timeout:?}, last seen {:?}", job.status);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_completed_count(queue: &Queue, queue_name: &str, expected: i64, timeout: Duration) {
    let start = tokio::time::Instant::now();
    loop {
        let stats = queue.statistics(queue_name).await.unwrap();
        if stats.completed >= expected {
            return;
        }
        if start.elapsed() > timeout {
            panic!("only {} of {expected} jobs completed within {timeout:?}", stats.completed);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

struct Echo;

#[async_trait::async_trait]
impl TaskHandler for Echo {
    async fn execute(&self, _ctx: JobContext, args: ArgBundle) -> bk_core::Result<serde_json::Value> {
        let (positional, _) = args.to_row_values();
        Ok(serde_json::json!({ "echo": positional }))
    }
}

struct Slow {
    holding: Arc<AtomicUsize>,
    delay: Duration,
}

#[async_trait::async_trait]
impl TaskHandler for Slow {
    async fn execute(&self, _ctx: JobContext, _args: ArgBundle) -> bk_core::Result<serde_json::Value> {
        self.holding.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.holding.fetch_sub(1, Ordering::SeqCst);
        Ok(serde_json::json!({}))
    }
}

fn build(registry: Arc<TaskRegistry>) -> (Arc<Queue>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let queue = Arc::new(Queue::new(storage.clone(), registry, QueueConfig::default()));
    (queue, storage)
}

#[tokio::test]
async fn worker_reserves_and_completes_enqueued_job() {
    let registry = Arc::new(TaskRegistry::new());
    registry
        .register("echo", None, Arc::new(Echo), TaskConfig::default())
        .unwrap();
    let (queue, storage) = build(registry.clone());

    let id = queue
        .enqueue(EnqueueSpec::new("echo").with_queue("default"))
        .await
        .unwrap();

    let worker = Worker::new(
        "worker-1",
        "default",
        PriorityFilter::all(),
        ConcurrencyModel::Async { capacity: 4 },
        queue.clone(),
        registry,
        storage,
        fast_worker_config(),
    );
    let handle = worker.clone().start().await.unwrap();

    wait_for_status(&queue, &id, JobStatus::Completed, Duration::from_secs(5)).await;

    worker.shutdown_now();
    handle.join().await;

    let job = queue.get(&id).await.unwrap();
    assert_eq!(job.result.unwrap()["echo"], serde_json::json!([]));
}

#[tokio::test]
async fn worker_concurrency_model_caps_in_flight_jobs() {
    let holding = Arc::new(AtomicUsize::new(0));
    let observed_max = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(TaskRegistry::new());
    registry
        .register(
            "slow",
            None,
            Arc::new(Slow {
                holding: holding.clone(),
                delay: Duration::from_millis(150),
            }),
            TaskConfig::default(),
        )
        .unwrap();
    let (queue, storage) = build(registry.clone());

    for _ in 0..6 {
        queue
            .enqueue(EnqueueSpec::new("slow").with_queue("default"))
            .await
            .unwrap();
    }

    let worker = Worker::new(
        "worker-cap",
        "default",
        PriorityFilter::all(),
        ConcurrencyModel::Async { capacity: 2 },
        queue.clone(),
        registry,
        storage,
        fast_worker_config(),
    );
    let handle = worker.clone().start().await.unwrap();

    let watcher_holding = holding.clone();
    let watcher_max = observed_max.clone();
    let watcher = tokio::spawn(async move {
        for _ in 0..150 {
            let current = watcher_holding.load(Ordering::SeqCst);
            let mut max = watcher_max.load(Ordering::SeqCst);
            while current > max {
                match watcher_max.compare_exchange(max, current, Ordering::SeqCst, Ordering::SeqCst) {
                    Ok(_) => break,
                    Err(observed) => max = observed,
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    wait_for_completed_count(&queue, "default", 6, Duration::from_secs(10)).await;
    let _ = watcher.await;

    worker.shutdown_now();
    handle.join().await;

    assert!(observed_max.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn paused_worker_does_not_reserve_new_work() {
    let registry = Arc::new(TaskRegistry::new());
    registry
        .register("echo", None, Arc::new(Echo), TaskConfig::default())
        .unwrap();
    let (queue, storage) = build(registry.clone());

    let worker = Worker::new(
        "worker-paused",
        "default",
        PriorityFilter::all(),
        ConcurrencyModel::Async { capacity: 4 },
        queue.clone(),
        registry,
        storage,
        fast_worker_config(),
    );
    let handle = worker.clone().start().await.unwrap();
    worker.pause();

    let id = queue
        .enqueue(EnqueueSpec::new("echo").with_queue("default"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let job = queue.get(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    worker.resume();
    wait_for_status(&queue, &id, JobStatus::Completed, Duration::from_secs(5)).await;

    worker.shutdown_now();
    handle.join().await;
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_job_before_deadline() {
    let holding = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(TaskRegistry::new());
    registry
        .register(
            "slow",
            None,
            Arc::new(Slow {
                holding: holding.clone(),
                delay: Duration::from_millis(150),
            }),
            TaskConfig::default(),
        )
        .unwrap();
    let (queue, storage) = build(registry.clone());

    let id = queue
        .enqueue(EnqueueSpec::new("slow").with_queue("default"))
        .await
        .unwrap();

    let worker = Worker::new(
        "worker-drain",
        "default",
        PriorityFilter::all(),
        ConcurrencyModel::Async { capacity: 2 },
        queue.clone(),
        registry,
        storage,
        fast_worker_config(),
    );
    let handle = worker.clone().start().await.unwrap();

    let start = tokio::time::Instant::now();
    while holding.load(Ordering::SeqCst) == 0 {
        if start.elapsed() > Duration::from_secs(2) {
            panic!("job never entered the handler");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    worker.shutdown(Duration::from_secs(2)).await;
    handle.join().await;

    let job = queue.get(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(worker.health().lifecycle, WorkerLifecycle::Stopped);
}

#[tokio::test]
async fn cooperative_cancellation_lands_the_job_in_cancelled() {
    let holding = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(TaskRegistry::new());
    registry
        .register(
            "slow",
            None,
            Arc::new(Slow {
                holding: holding.clone(),
                delay: Duration::from_secs(30),
            }),
            TaskConfig::default(),
        )
        .unwrap();
    let (queue, storage) = build(registry.clone());

    let id = queue
        .enqueue(EnqueueSpec::new("slow").with_queue("default"))
        .await
        .unwrap();

    let worker = Worker::new(
        "worker-cancel",
        "default",
        PriorityFilter::all(),
        ConcurrencyModel::Async { capacity: 2 },
        queue.clone(),
        registry,
        storage,
        fast_worker_config(),
    );
    let handle = worker.clone().start().await.unwrap();

    let start = tokio::time::Instant::now();
    while holding.load(Ordering::SeqCst) == 0 {
        if start.elapsed() > Duration::from_secs(2) {
            panic!("job never entered the handler");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    queue.cancel(&id).await.unwrap();

    wait_for_status(&queue, &id, JobStatus::Cancelled, Duration::from_secs(5)).await;

    worker.shutdown_now();
    handle.join().await;

    let job = queue.get(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn health_reports_capacity_from_concurrency_model() {
    let registry = Arc::new(TaskRegistry::new());
    let (queue, storage) = build(registry.clone());
    let worker = Worker::new(
        "worker-health",
        "default",
        PriorityFilter::all(),
        ConcurrencyModel::ThreadPool { workers: 7 },
        queue,
        registry,
        storage,
        fast_worker_config(),
    );
    assert_eq!(worker.health().capacity, 7);
    assert_eq!(worker.health().lifecycle, WorkerLifecycle::Created);
}
