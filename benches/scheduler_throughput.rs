//! Scheduler throughput benchmarks
//!
//! - `schedule_warmup` over growing prediction sets
//! - queue enqueue/dequeue cycles across all priority lanes

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use gg_warmup::performance::PerformancePredictor;
use gg_warmup::resources::ResourceManager;
use gg_warmup::scheduler::{WarmupQueue, WarmupScheduler};
use gg_warmup::{
    Complexity, ModelCatalog, ModelPrediction, ModelProfile, ModelTask, RequestPriority, ResourceRequirements,
    SharedConfig, WarmupConfig, WarmupTask,
};

fn shared() -> SharedConfig {
    let config = WarmupConfig { max_memory_mb: 1 << 20, max_queue_size: 4096, ..Default::default() };
    SharedConfig::new(config).unwrap()
}

// =============================================================================
// Benchmark: Schedule Construction
// =============================================================================

fn bench_schedule_warmup(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let mut group = c.benchmark_group("schedule_warmup");

    for count in [1usize, 8, 32, 128] {
        let config = shared();
        let catalog = Arc::new(ModelCatalog::new());
        let predictions: Vec<ModelPrediction> = rt.block_on(async {
            let mut predictions = Vec::with_capacity(count);
            for i in 0..count {
                let profile = ModelProfile::new(format!("model-{i}"), vec![ModelTask::Completion], Complexity::Medium)
                    .with_requirements(ResourceRequirements::new(64, 0.5, 0.5, 16))
                    .with_load_time(Duration::from_millis(500));
                let id = profile.id;
                catalog.register(profile).await.unwrap();
                let confidence = 0.95 - (i as f64 * 0.001);
                predictions.push(ModelPrediction::new(id, confidence, 0.5, Duration::from_secs(30 + i as u64)));
            }
            predictions
        });
        let resources = Arc::new(ResourceManager::new(config.clone()));
        let performance = Arc::new(PerformancePredictor::new(config.clone()));
        let scheduler = WarmupScheduler::new(config, catalog, resources.clone(), performance);
        let snapshot = resources.get_available_resources().unwrap();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &predictions, |b, predictions| {
            b.iter(|| {
                let schedule = rt.block_on(scheduler.schedule_warmup(black_box(predictions), &snapshot));
                black_box(schedule)
            });
        });
    }

    group.finish();
}

// =============================================================================
// Benchmark: Queue Cycles
// =============================================================================

fn bench_queue_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("warmup_queue");

    for batch in [16usize, 256, 1024] {
        let tasks: Vec<WarmupTask> = (0..batch)
            .map(|i| {
                WarmupTask::new(
                    gg_warmup::ModelId::new(),
                    RequestPriority::from_rank(i % RequestPriority::LEVELS),
                    ResourceRequirements::new(64, 0.5, 0.5, 16),
                )
            })
            .collect();

        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("enqueue_dequeue", batch), &tasks, |b, tasks| {
            b.iter(|| {
                let queue = WarmupQueue::new(shared());
                for task in tasks {
                    queue.enqueue_task(task.clone()).unwrap();
                }
                while let Some(task) = queue.dequeue_next().unwrap() {
                    black_box(task);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_schedule_warmup, bench_queue_cycle);
criterion_main!(benches);
