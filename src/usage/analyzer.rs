//! Usage pattern analyzer.
//!
//! Turns recorded usage into a ranked list of candidate models for a new
//! request. Rankings are cached per (task, complexity, hour) for
//! `prediction_cache_ttl_seconds`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;

use super::history::{UsageEvent, UsageHistory, UsageTrend};
use super::pattern::{PatternSnapshot, UsagePattern};
use crate::config::SharedConfig;
use crate::error::Result;
use crate::models::ModelCatalog;
use crate::types::{Complexity, ModelId, ModelTask, WarmupRequest};

const TASK_WEIGHT: f64 = 0.4;
const RECENCY_WEIGHT: f64 = 0.2;
const TIME_OF_DAY_WEIGHT: f64 = 0.3;
const SESSION_WEIGHT: f64 = 0.1;

/// Hour vs day-of-week split inside the time-of-day component.
const HOUR_SHARE: f64 = 0.7;

/// Candidates scoring below this are not worth ranking.
const MIN_RELEVANCE: f64 = 0.05;

/// Recency decay constant, in hours.
const RECENCY_HOURS: f64 = 24.0;

/// Snapshots kept per model.
pub const MAX_SNAPSHOTS_PER_MODEL: usize = 100;
/// Snapshots older than this, relative to the newest, are dropped.
const SNAPSHOT_HORIZON_HOURS: i64 = 24;

/// Requests scoring above this against their model's pattern are unusual.
pub const ANOMALY_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AnalysisKey {
    task: ModelTask,
    complexity: Complexity,
    hour: usize,
}

#[derive(Debug, Clone)]
struct CachedRanking {
    models: Vec<ModelId>,
    computed_at: Instant,
}

/// Relevance breakdown for one candidate model.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub model_id: ModelId,
    pub relevance: f64,
    pub task_match: f64,
    pub recency: f64,
    pub time_of_day: f64,
    pub session_fit: f64,
    pub success_rate: f64,
    pub observations: u64,
    pub mean_interarrival: Option<Duration>,
    pub trend: UsageTrend,
}

/// A request that does not fit the usual hours and tasks of its model.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageAnomaly {
    pub model_id: ModelId,
    pub score: f64,
    pub hour: usize,
    pub task: ModelTask,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AnalyzerStats {
    pub records: u64,
    pub anomalies: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub feedback_applied: u64,
    pub known_models: usize,
}

pub struct UsagePatternAnalyzer {
    config: SharedConfig,
    catalog: Arc<ModelCatalog>,
    history: Arc<UsageHistory>,
    patterns: RwLock<HashMap<ModelId, UsagePattern>>,
    evolution: RwLock<HashMap<ModelId, VecDeque<PatternSnapshot>>>,
    cache: DashMap<AnalysisKey, CachedRanking>,
    records: AtomicU64,
    anomalies: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    feedback_applied: AtomicU64,
}

impl UsagePatternAnalyzer {
    pub fn new(config: SharedConfig, catalog: Arc<ModelCatalog>, history: Arc<UsageHistory>) -> Self {
        Self {
            config,
            catalog,
            history,
            patterns: RwLock::new(HashMap::new()),
            evolution: RwLock::new(HashMap::new()),
            cache: DashMap::new(),
            records: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            feedback_applied: AtomicU64::new(0),
        }
    }

    /// Record a request against the model that serves it.
    pub async fn record_usage(&self, request: &WarmupRequest) -> Result<()> {
        request.validate()?;
        let model_id = self.catalog.resolve_request(request).await;
        self.record_model_usage(model_id, request).await
    }

    /// Record a request against an explicitly known model.
    pub async fn record_model_usage(&self, model_id: ModelId, request: &WarmupRequest) -> Result<()> {
        let learning_rate = self.config.current().learning_rate;

        self.history.record(
            model_id,
            UsageEvent {
                timestamp: request.timestamp,
                task: request.task.clone(),
                session_duration: request.user_context.session_duration,
            },
        );

        let mut patterns = self.patterns.write().await;
        let pattern = patterns
            .entry(model_id)
            .or_insert_with(|| UsagePattern::new(model_id, request.timestamp));
        let anomaly = pattern.anomaly_score(request);
        pattern.observe(request, learning_rate);
        let snapshot = pattern.snapshot();
        drop(patterns);

        if anomaly > ANOMALY_THRESHOLD {
            self.anomalies.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                model_id = %model_id,
                task = %request.task,
                hour = request.hour_of_day(),
                score = anomaly,
                "Unusual usage for model"
            );
        }
        self.push_snapshot(model_id, snapshot).await;

        self.records.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(model_id = %model_id, task = %request.task, "Recorded usage");
        Ok(())
    }

    async fn push_snapshot(&self, model_id: ModelId, snapshot: PatternSnapshot) {
        let mut evolution = self.evolution.write().await;
        let snapshots = evolution.entry(model_id).or_default();
        let horizon = snapshot
            .at
            .checked_sub_signed(chrono::Duration::hours(SNAPSHOT_HORIZON_HOURS))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        snapshots.push_back(snapshot);
        while snapshots.front().is_some_and(|s| s.at < horizon) {
            snapshots.pop_front();
        }
        while snapshots.len() > MAX_SNAPSHOTS_PER_MODEL {
            snapshots.pop_front();
        }
    }

    /// Recent snapshots of a model's pattern, oldest first.
    pub async fn pattern_evolution(&self, model_id: &ModelId) -> Vec<PatternSnapshot> {
        self.evolution
            .read()
            .await
            .get(model_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Score `request` against the pattern of the model it resolves to.
    /// `None` when the request looks ordinary or the model is unknown.
    pub async fn detect_anomaly(&self, request: &WarmupRequest) -> Option<UsageAnomaly> {
        let model_id = self.catalog.resolve_request(request).await;
        let score = self.patterns.read().await.get(&model_id)?.anomaly_score(request);
        (score > ANOMALY_THRESHOLD).then(|| UsageAnomaly {
            model_id,
            score,
            hour: request.hour_of_day(),
            task: request.task.clone(),
        })
    }

    /// Ranked candidate models for `request`, best first.
    pub async fn analyze_patterns(&self, request: &WarmupRequest) -> Result<Vec<ModelId>> {
        let config = self.config.current();
        let ttl = config.cache_ttl();
        let key = AnalysisKey {
            task: request.task.clone(),
            complexity: request.complexity,
            hour: request.hour_of_day(),
        };

        if !ttl.is_zero() {
            let cached = self
                .cache
                .get(&key)
                .and_then(|entry| (entry.computed_at.elapsed() < ttl).then(|| entry.models.clone()));
            if let Some(models) = cached {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(models);
            }
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let ranking: Vec<ModelId> = self
            .candidate_scores(request)
            .await
            .into_iter()
            .take(config.analysis_top_k)
            .map(|c| c.model_id)
            .collect();

        if !ttl.is_zero() {
            self.cache.insert(key, CachedRanking { models: ranking.clone(), computed_at: Instant::now() });
        }
        tracing::debug!(task = %request.task, candidates = ranking.len(), "Analyzed usage patterns");
        Ok(ranking)
    }

    /// Score every known model against `request`, best first. Uncached.
    pub async fn candidate_scores(&self, request: &WarmupRequest) -> Vec<CandidateScore> {
        let patterns = self.patterns.read().await;
        let mut scores: Vec<CandidateScore> = patterns
            .values()
            .map(|pattern| self.score(pattern, request))
            .filter(|s| s.relevance >= MIN_RELEVANCE)
            .collect();
        drop(patterns);

        scores.sort_by(|a, b| {
            b.relevance
                .total_cmp(&a.relevance)
                .then_with(|| a.model_id.cmp(&b.model_id))
        });
        scores
    }

    /// Score a single model; `None` when it has no recorded pattern.
    pub async fn score_model(&self, model_id: &ModelId, request: &WarmupRequest) -> Option<CandidateScore> {
        let patterns = self.patterns.read().await;
        patterns.get(model_id).map(|p| self.score(p, request))
    }

    fn score(&self, pattern: &UsagePattern, request: &WarmupRequest) -> CandidateScore {
        let task_match = pattern.task_probability(&request.task);

        let hours_since = (request.timestamp - pattern.last_updated).num_seconds().max(0) as f64 / 3600.0;
        let recency = (-hours_since / RECENCY_HOURS).exp();

        let time_of_day = HOUR_SHARE * pattern.hour_share(request.hour_of_day())
            + (1.0 - HOUR_SHARE) * pattern.day_share(request.day_of_week());

        let session_fit = session_fit(
            request.user_context.session_duration.as_secs_f64(),
            pattern.mean_session_secs,
        );

        let relevance = (TASK_WEIGHT * task_match
            + RECENCY_WEIGHT * recency
            + TIME_OF_DAY_WEIGHT * time_of_day
            + SESSION_WEIGHT * session_fit)
            .clamp(0.0, 1.0);

        let stats = self.history.stats(&pattern.model_id, request.timestamp);
        CandidateScore {
            model_id: pattern.model_id,
            relevance,
            task_match,
            recency,
            time_of_day,
            session_fit,
            success_rate: pattern.success_rate,
            observations: pattern.total_observations,
            mean_interarrival: stats.as_ref().and_then(|s| s.mean_interarrival),
            trend: stats.map_or(UsageTrend::Insufficient, |s| s.trend),
        }
    }

    /// Move a model's success rate toward an observed outcome.
    pub async fn apply_outcome(&self, model_id: &ModelId, was_used: bool) {
        let learning_rate = self.config.current().learning_rate;
        if let Some(pattern) = self.patterns.write().await.get_mut(model_id) {
            pattern.apply_outcome(was_used, learning_rate);
            self.feedback_applied.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn pattern(&self, model_id: &ModelId) -> Option<UsagePattern> {
        self.patterns.read().await.get(model_id).cloned()
    }

    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    pub async fn stats(&self) -> AnalyzerStats {
        AnalyzerStats {
            records: self.records.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            feedback_applied: self.feedback_applied.load(Ordering::Relaxed),
            known_models: self.patterns.read().await.len(),
        }
    }
}

fn session_fit(request_secs: f64, mean_secs: f64) -> f64 {
    let larger = request_secs.max(mean_secs);
    if larger <= 0.0 {
        return 1.0;
    }
    1.0 - (request_secs - mean_secs).abs() / larger
}

#[cfg(test)]
#[path = "analyzer_tests.rs"]
mod tests;
