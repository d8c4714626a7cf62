use super::*;
use crate::config::WarmupConfig;
use crate::models::ModelProfile;
use crate::types::RequestPriority;
use chrono::{DateTime, TimeZone, Utc};
use crate::usage::MIN_ANOMALY_OBSERVATIONS;
use proptest::prelude::*;

fn at(hour: u32, offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
}

fn request(task: ModelTask, timestamp: DateTime<Utc>) -> WarmupRequest {
    WarmupRequest::new(task, Complexity::Medium, RequestPriority::High).with_timestamp(timestamp)
}

fn analyzer_with(config: WarmupConfig) -> (UsagePatternAnalyzer, Arc<ModelCatalog>) {
    let shared = SharedConfig::new(config).unwrap();
    let catalog = Arc::new(ModelCatalog::new());
    let history = Arc::new(UsageHistory::new(shared.clone()));
    (UsagePatternAnalyzer::new(shared, catalog.clone(), history), catalog)
}

#[tokio::test]
async fn test_empty_history_yields_empty_ranking() {
    let (analyzer, _) = analyzer_with(WarmupConfig::default());
    let ranking = analyzer
        .analyze_patterns(&request(ModelTask::Completion, at(9, 0)))
        .await
        .unwrap();
    assert!(ranking.is_empty());
}

#[tokio::test]
async fn test_repeated_hour_nine_completion_ranks_model_first() {
    let (analyzer, catalog) = analyzer_with(WarmupConfig::default());
    let x = ModelProfile::new("completion-x", vec![ModelTask::Completion], Complexity::Medium);
    let y = ModelProfile::new("chat-y", vec![ModelTask::Chat], Complexity::Medium);
    let (x_id, y_id) = (x.id, y.id);
    catalog.register(x).await.unwrap();
    catalog.register(y).await.unwrap();

    for i in 0..50 {
        analyzer.record_usage(&request(ModelTask::Chat, at(15, i * 10))).await.unwrap();
    }
    for i in 0..1000 {
        analyzer.record_usage(&request(ModelTask::Completion, at(9, i * 3))).await.unwrap();
    }

    let ranking = analyzer
        .analyze_patterns(&request(ModelTask::Completion, at(9, 3100)))
        .await
        .unwrap();
    assert_eq!(ranking.first(), Some(&x_id));
    assert!(ranking.contains(&y_id) || ranking.len() == 1);

    let pattern = analyzer.pattern(&x_id).await.unwrap();
    assert_eq!(pattern.total_observations, 1000);
    assert_eq!(pattern.peak_hour(), Some(9));
    assert!((pattern.task_probability(&ModelTask::Completion) - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_ranking_is_deterministic_without_cache() {
    let config = WarmupConfig { prediction_cache_ttl_seconds: 0, ..Default::default() };
    let (analyzer, _) = analyzer_with(config);
    for (i, task) in [ModelTask::Completion, ModelTask::Chat, ModelTask::Analysis].iter().enumerate() {
        for j in 0..10 {
            analyzer
                .record_model_usage(ModelId::new(), &request(task.clone(), at(9, (i * 100 + j) as i64)))
                .await
                .unwrap();
        }
    }
    let req = request(ModelTask::Chat, at(10, 0));
    let first = analyzer.analyze_patterns(&req).await.unwrap();
    let second = analyzer.analyze_patterns(&req).await.unwrap();
    assert_eq!(first, second);
    assert!(first.len() <= WarmupConfig::default().analysis_top_k);
    assert_eq!(analyzer.stats().await.cache_hits, 0);
}

#[tokio::test]
async fn test_cache_hit_within_ttl_returns_cached_ranking() {
    let (analyzer, _) = analyzer_with(WarmupConfig::default());
    let first_model = ModelId::new();
    analyzer
        .record_model_usage(first_model, &request(ModelTask::Completion, at(9, 0)))
        .await
        .unwrap();

    let req = request(ModelTask::Completion, at(9, 60));
    assert_eq!(analyzer.analyze_patterns(&req).await.unwrap(), vec![first_model]);

    // New usage is not visible until the cached ranking expires or is invalidated.
    let second_model = ModelId::new();
    for i in 0..20 {
        analyzer
            .record_model_usage(second_model, &request(ModelTask::Completion, at(9, 100 + i)))
            .await
            .unwrap();
    }
    assert_eq!(analyzer.analyze_patterns(&req).await.unwrap(), vec![first_model]);
    assert_eq!(analyzer.stats().await.cache_hits, 1);

    analyzer.invalidate_cache();
    let refreshed = analyzer.analyze_patterns(&req).await.unwrap();
    assert_eq!(refreshed.len(), 2);
}

#[tokio::test]
async fn test_invalid_request_is_rejected() {
    let (analyzer, _) = analyzer_with(WarmupConfig::default());
    let mut bad = request(ModelTask::Completion, at(9, 0));
    bad.user_context.user_id.clear();
    assert!(analyzer.record_usage(&bad).await.is_err());
    assert_eq!(analyzer.stats().await.records, 0);
}

#[tokio::test]
async fn test_uncatalogued_request_uses_derived_model() {
    let (analyzer, _) = analyzer_with(WarmupConfig::default());
    analyzer.record_usage(&request(ModelTask::Translation, at(9, 0))).await.unwrap();
    let derived = ModelId::derived(&ModelTask::Translation, Complexity::Medium);
    assert!(analyzer.pattern(&derived).await.is_some());
}

#[tokio::test]
async fn test_apply_outcome_moves_success_rate() {
    let (analyzer, _) = analyzer_with(WarmupConfig { learning_rate: 0.5, ..Default::default() });
    let model = ModelId::new();
    analyzer
        .record_model_usage(model, &request(ModelTask::Chat, at(9, 0)))
        .await
        .unwrap();
    analyzer.apply_outcome(&model, false).await;
    let pattern = analyzer.pattern(&model).await.unwrap();
    assert!((pattern.success_rate - 0.5).abs() < 1e-9);

    analyzer.apply_outcome(&ModelId::new(), true).await;
    assert_eq!(analyzer.stats().await.feedback_applied, 1);
}

#[tokio::test]
async fn test_session_duration_incremental_mean() {
    let (analyzer, _) = analyzer_with(WarmupConfig::default());
    let model = ModelId::new();
    for secs in [60u64, 120, 180] {
        let mut req = request(ModelTask::Chat, at(9, secs as i64));
        req.user_context.session_duration = Duration::from_secs(secs);
        analyzer.record_model_usage(model, &req).await.unwrap();
    }
    let pattern = analyzer.pattern(&model).await.unwrap();
    assert!((pattern.mean_session_secs - 120.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_pattern_evolution_is_bounded_by_count_and_horizon() {
    let (analyzer, _) = analyzer_with(WarmupConfig::default());
    let model = ModelId::new();
    for i in 0..150 {
        analyzer
            .record_model_usage(model, &request(ModelTask::Completion, at(9, i * 10)))
            .await
            .unwrap();
    }
    let evolution = analyzer.pattern_evolution(&model).await;
    assert_eq!(evolution.len(), MAX_SNAPSHOTS_PER_MODEL);
    assert_eq!(evolution.first().map(|s| s.total_observations), Some(51));
    let latest = evolution.last().unwrap();
    assert_eq!(latest.total_observations, 150);
    assert_eq!(latest.peak_hour, Some(9));
    assert_eq!(latest.dominant_task, Some(ModelTask::Completion));

    // A day later every earlier snapshot falls outside the horizon.
    analyzer
        .record_model_usage(model, &request(ModelTask::Chat, at(9, 25 * 3600)))
        .await
        .unwrap();
    let evolution = analyzer.pattern_evolution(&model).await;
    assert_eq!(evolution.len(), 1);
    assert_eq!(evolution[0].total_observations, 151);
    assert!(analyzer.pattern_evolution(&ModelId::new()).await.is_empty());
}

#[tokio::test]
async fn test_unusual_hour_and_task_flagged_as_anomaly() {
    let (analyzer, catalog) = analyzer_with(WarmupConfig::default());
    let profile = ModelProfile::new("assistant", vec![ModelTask::Completion, ModelTask::Chat], Complexity::Medium);
    let model = profile.id;
    catalog.register(profile).await.unwrap();

    for i in 0..(MIN_ANOMALY_OBSERVATIONS as i64 - 1) {
        analyzer.record_usage(&request(ModelTask::Completion, at(9, i * 10))).await.unwrap();
    }
    // Too little history to judge.
    assert!(analyzer.detect_anomaly(&request(ModelTask::Chat, at(3, 0))).await.is_none());

    for i in 0..10 {
        analyzer.record_usage(&request(ModelTask::Completion, at(9, 600 + i * 10))).await.unwrap();
    }
    assert!(analyzer.detect_anomaly(&request(ModelTask::Completion, at(9, 900))).await.is_none());

    let anomaly = analyzer.detect_anomaly(&request(ModelTask::Chat, at(3, 0))).await.unwrap();
    assert_eq!(anomaly.model_id, model);
    assert_eq!(anomaly.hour, 3);
    assert!(anomaly.score > ANOMALY_THRESHOLD);

    analyzer.record_usage(&request(ModelTask::Chat, at(3, 0))).await.unwrap();
    assert_eq!(analyzer.stats().await.anomalies, 1);
}

#[test]
fn test_history_trend_and_interarrival() {
    let shared = SharedConfig::new(WarmupConfig::default()).unwrap();
    let history = UsageHistory::new(shared);
    let model = ModelId::new();
    // Window is one hour: 2 events in the older half, 8 in the newer half.
    for offset in [0i64, 600, 2000, 2300, 2600, 2900, 3000, 3100, 3200, 3300] {
        history.record(
            model,
            UsageEvent { timestamp: at(9, offset), task: ModelTask::Chat, session_duration: Duration::ZERO },
        );
    }
    let stats = history.stats(&model, at(9, 3300)).unwrap();
    assert_eq!(stats.events, 10);
    assert_eq!(stats.trend, UsageTrend::Increasing);
    assert_eq!(stats.mean_interarrival, Some(Duration::from_millis(3_300_000 / 9)));
    assert!(stats.decayed_frequency > 0.0 && stats.decayed_frequency <= 10.0);
}

#[test]
fn test_history_prunes_outside_window() {
    let config = WarmupConfig { usage_window_seconds: 60, ..Default::default() };
    let history = UsageHistory::new(SharedConfig::new(config).unwrap());
    let model = ModelId::new();
    for offset in [0i64, 30, 200] {
        history.record(
            model,
            UsageEvent { timestamp: at(9, offset), task: ModelTask::Chat, session_duration: Duration::ZERO },
        );
    }
    assert_eq!(history.event_count(&model), 1);
    assert_eq!(history.model_ids(), vec![model]);
}

fn task_strategy() -> impl Strategy<Value = ModelTask> {
    prop_oneof![
        Just(ModelTask::Completion),
        Just(ModelTask::Chat),
        Just(ModelTask::Classification),
        Just(ModelTask::Generation),
        Just(ModelTask::Analysis),
        Just(ModelTask::Refactoring),
        Just(ModelTask::Translation),
        "[a-z]{1,6}".prop_map(ModelTask::Custom),
    ]
}

proptest! {
    #[test]
    fn prop_task_distribution_sums_to_one(
        tasks in proptest::collection::vec(task_strategy(), 1..300),
        alpha in 0.01f64..1.0,
        hour in 0u32..24,
    ) {
        let mut pattern = UsagePattern::new(ModelId::new(), at(hour, 0));
        for (i, task) in tasks.into_iter().enumerate() {
            pattern.observe(&request(task, at(hour, i as i64)), alpha);
            prop_assert!((pattern.distribution_sum() - 1.0).abs() < 1e-6);
            prop_assert!(pattern.task_distribution.values().all(|w| (0.0..=1.0 + 1e-12).contains(w)));
        }
    }
}
