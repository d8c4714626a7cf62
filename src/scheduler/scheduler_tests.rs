use super::*;
use crate::config::ConflictResolution;
use crate::models::ModelProfile;
use crate::scheduler::DropLowerPriority;
use crate::types::{Complexity, ModelId, ModelTask};

struct Fixture {
    scheduler: WarmupScheduler,
    catalog: Arc<ModelCatalog>,
    resources: Arc<ResourceManager>,
}

fn fixture(config: WarmupConfig) -> Fixture {
    let shared = SharedConfig::new(config).unwrap();
    let catalog = Arc::new(ModelCatalog::new());
    let resources = Arc::new(ResourceManager::new(shared.clone()));
    let performance = Arc::new(PerformancePredictor::new(shared.clone()));
    let scheduler = WarmupScheduler::new(shared, catalog.clone(), resources.clone(), performance);
    Fixture { scheduler, catalog, resources }
}

async fn register(catalog: &ModelCatalog, memory_mb: u64, cpu: f64, load_secs: u64) -> ModelId {
    let profile = ModelProfile::new("model", vec![ModelTask::Completion], Complexity::Medium)
        .with_requirements(ResourceRequirements::new(memory_mb, cpu, 0.0, 0))
        .with_load_time(Duration::from_secs(load_secs));
    let id = profile.id;
    catalog.register(profile).await.unwrap();
    id
}

fn prediction(model_id: ModelId, confidence: f64, probability: f64, needed_secs: u64) -> ModelPrediction {
    ModelPrediction::new(model_id, confidence, probability, Duration::from_secs(needed_secs))
}

fn offsets(schedule: &WarmupSchedule) -> Vec<(ModelId, Duration)> {
    schedule.tasks.iter().map(|t| (t.model_id, t.start_offset)).collect()
}

fn reason_for(schedule: &WarmupSchedule, model_id: ModelId) -> Option<RejectionReason> {
    schedule.rejected.iter().find(|r| r.model_id == model_id).map(|r| r.reason)
}

fn tight_memory() -> WarmupConfig {
    WarmupConfig { max_memory_mb: 1024, max_concurrent_warmups: 3, ..Default::default() }
}

#[tokio::test]
async fn test_high_priority_admitted_low_priority_delayed() {
    let fx = fixture(tight_memory());
    let high = register(&fx.catalog, 700, 0.0, 10).await;
    let low = register(&fx.catalog, 700, 0.0, 10).await;
    let snapshot = fx.resources.get_available_resources().unwrap();

    let predictions = vec![prediction(low, 0.75, 0.3, 60), prediction(high, 0.8, 0.7, 60)];
    let schedule = fx.scheduler.schedule_warmup(&predictions, &snapshot).await.unwrap();

    assert_eq!(schedule.model_ids(), vec![high, low]);
    assert_eq!(schedule.tasks[0].priority, RequestPriority::High);
    assert_eq!(schedule.tasks[1].priority, RequestPriority::Low);
    // 60s needed - 10s load - 5s lead.
    assert_eq!(schedule.tasks[0].start_offset, Duration::from_secs(45));
    assert_eq!(schedule.tasks[1].start_offset, Duration::from_secs(55));
    assert_eq!(schedule.total_estimated_time, Duration::from_secs(65));
    assert_eq!(schedule.resource_requirements.memory_mb, 700);
    assert_eq!(schedule.priority, RequestPriority::High);
}

#[tokio::test]
async fn test_high_priority_admitted_low_priority_dropped() {
    let fx = fixture(WarmupConfig { conflict_resolution: ConflictResolution::DropLowerPriority, ..tight_memory() });
    let high = register(&fx.catalog, 700, 0.0, 10).await;
    let low = register(&fx.catalog, 700, 0.0, 10).await;
    let snapshot = fx.resources.get_available_resources().unwrap();

    let predictions = vec![prediction(high, 0.8, 0.7, 60), prediction(low, 0.75, 0.3, 60)];
    let schedule = fx.scheduler.schedule_warmup(&predictions, &snapshot).await.unwrap();

    assert_eq!(schedule.model_ids(), vec![high]);
    assert_eq!(reason_for(&schedule, low), Some(RejectionReason::ResourceConflict));
}

#[tokio::test]
async fn test_drop_strategy_delays_equal_priority() {
    let fx = fixture(tight_memory()).scheduler_with(Arc::new(DropLowerPriority));
    let a = register(&fx.catalog, 700, 0.0, 10).await;
    let b = register(&fx.catalog, 700, 0.0, 10).await;
    let snapshot = fx.resources.get_available_resources().unwrap();

    let predictions = vec![prediction(a, 0.8, 0.7, 60), prediction(b, 0.8, 0.7, 60)];
    let schedule = fx.scheduler.schedule_warmup(&predictions, &snapshot).await.unwrap();
    assert_eq!(schedule.tasks.len(), 2);
    assert_eq!(schedule.tasks[1].start_offset, Duration::from_secs(55));
}

impl Fixture {
    fn scheduler_with(self, strategy: Arc<dyn ConflictStrategy>) -> Self {
        Self { scheduler: self.scheduler.with_strategy(strategy), ..self }
    }
}

struct AlwaysDrop;

impl ConflictStrategy for AlwaysDrop {
    fn name(&self) -> &'static str {
        "always_drop"
    }

    fn resolve(&self, conflict: &ResourceConflict<'_>) -> ConflictDecision {
        assert!(conflict.delayed_start > conflict.requested_start);
        assert_eq!(conflict.dimension, ResourceDimension::Memory);
        assert_eq!(conflict.blocking.len(), 1);
        ConflictDecision::Drop
    }
}

#[tokio::test]
async fn test_custom_strategy_is_consulted() {
    let fx = fixture(tight_memory()).scheduler_with(Arc::new(AlwaysDrop));
    let a = register(&fx.catalog, 700, 0.0, 10).await;
    let b = register(&fx.catalog, 700, 0.0, 10).await;
    let snapshot = fx.resources.get_available_resources().unwrap();

    let predictions = vec![prediction(a, 0.8, 0.7, 60), prediction(b, 0.8, 0.7, 60)];
    let schedule = fx.scheduler.schedule_warmup(&predictions, &snapshot).await.unwrap();
    assert_eq!(schedule.tasks.len(), 1);
    assert_eq!(schedule.rejected.len(), 1);
    assert_eq!(schedule.rejected[0].reason, RejectionReason::ResourceConflict);
}

#[tokio::test]
async fn test_schedule_is_deterministic() {
    let fx = fixture(WarmupConfig { max_concurrent_warmups: 2, ..Default::default() });
    let mut predictions = Vec::new();
    for i in 0..5 {
        let id = register(&fx.catalog, 200, 2.0, 3 + i).await;
        predictions.push(prediction(id, 0.72 + 0.04 * i as f64, 0.65, 20));
    }
    predictions.push(prediction(ModelId::new(), 0.9, 0.9, 10));
    let snapshot = fx.resources.get_available_resources().unwrap();

    let first = fx.scheduler.schedule_warmup(&predictions, &snapshot).await.unwrap();
    let second = fx.scheduler.schedule_warmup(&predictions, &snapshot).await.unwrap();
    assert_eq!(offsets(&first), offsets(&second));
    assert_eq!(first.total_estimated_time, second.total_estimated_time);
    assert_eq!(first.rejected, second.rejected);
}

#[tokio::test]
async fn test_concurrency_limit_pushes_start_offsets() {
    let fx = fixture(WarmupConfig { max_concurrent_warmups: 2, ..Default::default() });
    let a = register(&fx.catalog, 100, 1.0, 10).await;
    let b = register(&fx.catalog, 100, 1.0, 10).await;
    let c = register(&fx.catalog, 100, 1.0, 10).await;
    let snapshot = fx.resources.get_available_resources().unwrap();

    let predictions = vec![
        prediction(a, 0.95, 0.9, 15),
        prediction(b, 0.85, 0.9, 15),
        prediction(c, 0.75, 0.9, 15),
    ];
    let schedule = fx.scheduler.schedule_warmup(&predictions, &snapshot).await.unwrap();

    assert_eq!(
        offsets(&schedule),
        vec![(a, Duration::ZERO), (b, Duration::ZERO), (c, Duration::from_secs(10))]
    );
    assert_eq!(schedule.total_estimated_time, Duration::from_secs(20));
    assert_eq!(schedule.resource_requirements.memory_mb, 200);
}

#[tokio::test]
async fn test_oversized_and_unavailable_candidates_are_dropped() {
    let fx = fixture(WarmupConfig::default());
    let huge = register(&fx.catalog, 5000, 1.0, 1).await;
    let big = register(&fx.catalog, 500, 1.0, 1).await;
    let small = register(&fx.catalog, 50, 1.0, 1).await;
    let snapshot = ResourceAvailability::new(100, 30.0, 100.0, 4096);

    let predictions = vec![
        prediction(huge, 0.9, 0.9, 30),
        prediction(big, 0.9, 0.9, 30),
        prediction(small, 0.9, 0.9, 30),
    ];
    let schedule = fx.scheduler.schedule_warmup(&predictions, &snapshot).await.unwrap();

    assert_eq!(schedule.model_ids(), vec![small]);
    assert_eq!(reason_for(&schedule, huge), Some(RejectionReason::ExceedsCeiling));
    assert_eq!(reason_for(&schedule, big), Some(RejectionReason::ResourceExhausted));
    assert!(schedule.tasks.iter().all(|t| fx.resources.exceeds_ceiling(&t.requirements).is_none()));
}

#[tokio::test]
async fn test_threshold_and_capacity_limits() {
    let fx = fixture(WarmupConfig { max_warm_models: 2, ..Default::default() });
    let weak = ModelId::new();
    let predictions = vec![
        prediction(ModelId::new(), 0.95, 0.9, 60),
        prediction(ModelId::new(), 0.9, 0.9, 60),
        prediction(ModelId::new(), 0.8, 0.9, 60),
        prediction(weak, 0.5, 0.9, 60),
    ];
    let snapshot = fx.resources.get_available_resources().unwrap();
    let schedule = fx.scheduler.schedule_warmup(&predictions, &snapshot).await.unwrap();

    assert_eq!(schedule.tasks.len(), 2);
    assert_eq!(reason_for(&schedule, weak), Some(RejectionReason::BelowThreshold));
    assert_eq!(
        schedule.rejected.iter().filter(|r| r.reason == RejectionReason::CapacityLimit).count(),
        1
    );
}

#[tokio::test]
async fn test_dependencies_are_placed_first() {
    let fx = fixture(WarmupConfig::default());
    let base = register(&fx.catalog, 100, 1.0, 4).await;
    let adapter = ModelProfile::new("adapter", vec![ModelTask::Completion], Complexity::Simple)
        .with_requirements(ResourceRequirements::new(50, 1.0, 0.0, 0))
        .with_load_time(Duration::from_secs(2))
        .with_dependency(base);
    let adapter_id = adapter.id;
    fx.catalog.register(adapter).await.unwrap();
    let snapshot = fx.resources.get_available_resources().unwrap();

    let predictions = vec![prediction(adapter_id, 0.95, 0.9, 10), prediction(base, 0.75, 0.5, 10)];
    let schedule = fx.scheduler.schedule_warmup(&predictions, &snapshot).await.unwrap();

    assert_eq!(schedule.model_ids(), vec![base, adapter_id]);
    let base_end = schedule.tasks[0].end_offset();
    assert!(schedule.tasks[1].start_offset >= base_end);
    assert_eq!(schedule.tasks[1].dependencies, vec![base]);
}

#[tokio::test]
async fn test_uncatalogued_models_get_estimated_requirements() {
    let fx = fixture(WarmupConfig::default());
    let unknown = ModelId::new();
    let snapshot = fx.resources.get_available_resources().unwrap();
    let schedule = fx
        .scheduler
        .schedule_warmup(&[prediction(unknown, 0.92, 0.85, 30)], &snapshot)
        .await
        .unwrap();

    let task = &schedule.tasks[0];
    assert_eq!(task.priority, RequestPriority::Critical);
    assert_eq!(task.requirements.memory_mb, 184);
    assert_eq!(task.requirements.cpu_percent, 7.5);
    assert_eq!(task.requirements.network_mbps, 5.0);
    assert_eq!(task.requirements.storage_mb, 42);
    assert_eq!(task.estimated_time, Duration::from_millis(1500));
}

#[tokio::test]
async fn test_empty_predictions_yield_empty_schedule() {
    let fx = fixture(WarmupConfig::default());
    let snapshot = fx.resources.get_available_resources().unwrap();
    let (schedule, impact) = fx.scheduler.schedule_with_assessment(&[], &snapshot).await.unwrap();
    assert!(schedule.is_empty());
    assert_eq!(schedule.total_estimated_time, Duration::ZERO);
    assert!(impact.is_acceptable);
}

fn shrinking(passes: usize) -> WarmupConfig {
    WarmupConfig {
        performance_impact_threshold: 0.2,
        max_concurrent_warmups: 3,
        max_shrink_passes: passes,
        ..Default::default()
    }
}

async fn three_busy_predictions(catalog: &ModelCatalog) -> Vec<ModelPrediction> {
    let mut predictions = Vec::new();
    for confidence in [0.95, 0.85, 0.75] {
        let id = register(catalog, 100, 5.0, 10).await;
        predictions.push(prediction(id, confidence, 0.9, 15));
    }
    predictions
}

#[tokio::test]
async fn test_shrink_drops_lowest_confidence_until_acceptable() {
    let fx = fixture(shrinking(3));
    let predictions = three_busy_predictions(&fx.catalog).await;
    let snapshot = fx.resources.get_available_resources().unwrap();

    let (schedule, impact) = fx.scheduler.schedule_with_assessment(&predictions, &snapshot).await.unwrap();
    assert!(impact.is_acceptable);
    assert_eq!(schedule.model_ids(), vec![predictions[0].model_id]);
    assert_eq!(reason_for(&schedule, predictions[2].model_id), Some(RejectionReason::ImpactShrink));
    assert_eq!(reason_for(&schedule, predictions[1].model_id), Some(RejectionReason::ImpactShrink));
}

#[tokio::test]
async fn test_shrink_is_bounded() {
    let fx = fixture(shrinking(1));
    let predictions = three_busy_predictions(&fx.catalog).await;
    let snapshot = fx.resources.get_available_resources().unwrap();

    let (schedule, impact) = fx.scheduler.schedule_with_assessment(&predictions, &snapshot).await.unwrap();
    assert!(!impact.is_acceptable);
    assert_eq!(schedule.tasks.len(), 2);
    assert_eq!(reason_for(&schedule, predictions[2].model_id), Some(RejectionReason::ImpactShrink));
}

#[test]
fn test_priority_mapping() {
    let id = ModelId::new();
    assert_eq!(priority_for(&prediction(id, 0.95, 0.85, 1)), RequestPriority::Critical);
    assert_eq!(priority_for(&prediction(id, 0.95, 0.7, 1)), RequestPriority::High);
    assert_eq!(priority_for(&prediction(id, 0.6, 0.5, 1)), RequestPriority::Medium);
    assert_eq!(priority_for(&prediction(id, 0.9, 0.3, 1)), RequestPriority::Low);
}

#[tokio::test]
async fn test_extreme_durations_saturate() {
    let config = WarmupConfig { warmup_lead_time_seconds: 3600, usage_window_seconds: 3600, ..Default::default() };
    let fx = fixture(config);
    let slow = register(&fx.catalog, 64, 1.0, u64::MAX).await;
    let next = register(&fx.catalog, 64, 1.0, u64::MAX).await;
    let snapshot = fx.resources.get_available_resources().unwrap();

    let predictions = vec![prediction(slow, 0.95, 0.9, u64::MAX), prediction(next, 0.9, 0.85, u64::MAX)];
    let schedule = fx.scheduler.schedule_warmup(&predictions, &snapshot).await.unwrap();

    assert_eq!(schedule.tasks.first().map(|t| t.start_offset), Some(Duration::ZERO));
    assert_eq!(schedule.total_estimated_time, Duration::MAX);
}
