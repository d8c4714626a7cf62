//! Append-only, time-windowed usage record per model.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::config::SharedConfig;
use crate::types::{ModelId, ModelTask};

/// Per-model event cap; older events fall off the front.
pub const MAX_EVENTS_PER_MODEL: usize = 1000;

/// Events required before a trend is reported.
const MIN_TREND_EVENTS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct UsageEvent {
    pub timestamp: DateTime<Utc>,
    pub task: ModelTask,
    pub session_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageTrend {
    Increasing,
    Decreasing,
    Stable,
    Insufficient,
}

impl UsageTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageTrend::Increasing => "increasing usage",
            UsageTrend::Decreasing => "decreasing usage",
            UsageTrend::Stable => "stable usage",
            UsageTrend::Insufficient => "insufficient history",
        }
    }
}

/// Statistics for one model relative to a reference instant.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStats {
    pub events: usize,
    pub last_seen: DateTime<Utc>,
    /// Sum of `exp(-age / (window / 2))` over retained events.
    pub decayed_frequency: f64,
    pub mean_interarrival: Option<Duration>,
    pub trend: UsageTrend,
}

pub struct UsageHistory {
    config: SharedConfig,
    events: RwLock<HashMap<ModelId, VecDeque<UsageEvent>>>,
}

impl UsageHistory {
    pub fn new(config: SharedConfig) -> Self {
        Self { config, events: RwLock::new(HashMap::new()) }
    }

    /// Append an event, keeping per-model events time-ordered and within the window.
    pub fn record(&self, model_id: ModelId, event: UsageEvent) {
        let window = chrono_window(self.config.current().usage_window());
        let mut events = self.events.write();
        let queue = events.entry(model_id).or_default();

        let position = queue.partition_point(|e| e.timestamp <= event.timestamp);
        queue.insert(position, event);

        if let Some(newest) = queue.back().map(|e| e.timestamp) {
            while queue.front().is_some_and(|e| newest - e.timestamp > window) {
                queue.pop_front();
            }
        }
        while queue.len() > MAX_EVENTS_PER_MODEL {
            queue.pop_front();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().values().all(|q| q.is_empty())
    }

    pub fn event_count(&self, model_id: &ModelId) -> usize {
        self.events.read().get(model_id).map_or(0, |q| q.len())
    }

    /// Known models, sorted.
    pub fn model_ids(&self) -> Vec<ModelId> {
        let mut ids: Vec<ModelId> = self
            .events
            .read()
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub fn stats(&self, model_id: &ModelId, now: DateTime<Utc>) -> Option<HistoryStats> {
        let window = self.config.current().usage_window();
        let events = self.events.read();
        let queue = events.get(model_id).filter(|q| !q.is_empty())?;

        let tau = (window.as_secs_f64() / 2.0).max(1.0);
        let decayed_frequency = queue
            .iter()
            .map(|e| {
                let age = (now - e.timestamp).num_milliseconds().max(0) as f64 / 1000.0;
                (-age / tau).exp()
            })
            .sum();

        let first = queue.front()?.timestamp;
        let last_seen = queue.back()?.timestamp;
        let mean_interarrival = (queue.len() > 1).then(|| {
            let span = (last_seen - first).num_milliseconds().max(0) as u64;
            Duration::from_millis(span / (queue.len() as u64 - 1))
        });

        Some(HistoryStats {
            events: queue.len(),
            last_seen,
            decayed_frequency,
            mean_interarrival,
            trend: trend(queue, now, chrono_window(window)),
        })
    }
}

fn chrono_window(window: Duration) -> chrono::Duration {
    chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX)
}

/// Compare event counts in the older and newer halves of the window.
fn trend(queue: &VecDeque<UsageEvent>, now: DateTime<Utc>, window: chrono::Duration) -> UsageTrend {
    let start = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let midpoint = now.checked_sub_signed(window / 2).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let (mut older, mut newer) = (0usize, 0usize);
    for event in queue.iter().filter(|e| e.timestamp >= start && e.timestamp <= now) {
        if event.timestamp < midpoint {
            older += 1;
        } else {
            newer += 1;
        }
    }
    if older + newer < MIN_TREND_EVENTS {
        return UsageTrend::Insufficient;
    }
    let (older, newer) = (older as f64, newer as f64);
    if newer > older * 1.25 {
        UsageTrend::Increasing
    } else if newer < older * 0.8 {
        UsageTrend::Decreasing
    } else {
        UsageTrend::Stable
    }
}
