//! Usage history and pattern analysis.

mod analyzer;
mod history;
mod pattern;

pub use analyzer::{
    AnalyzerStats, CandidateScore, UsageAnomaly, UsagePatternAnalyzer, ANOMALY_THRESHOLD, MAX_SNAPSHOTS_PER_MODEL,
};
pub use history::{HistoryStats, UsageEvent, UsageHistory, UsageTrend, MAX_EVENTS_PER_MODEL};
pub use pattern::{PatternSnapshot, UsagePattern, MIN_ANOMALY_OBSERVATIONS};
