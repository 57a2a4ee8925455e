//! Progression analytics: trends, phase classification and per-goal rollups.
//!
//! Everything here is pure over check-in slices. Fetching and persisting the
//! results is done by the collector.

use serde::{Deserialize, Serialize};

use crate::checkin::CheckIn;

/// Check-ins considered by the analytics rollup.
pub const ANALYTICS_WINDOW: usize = 100;
/// Check-ins considered by the phase classifier.
pub const PHASE_WINDOW: usize = 5;
/// Check-ins returned verbatim in the rollup.
pub const RECENT_CHECK_INS: usize = 5;
/// Fewest observations for a trend.
pub const MIN_TREND_VALUES: usize = 6;

const TREND_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
    InsufficientData,
}

/// Classify a chronological series by comparing its two halves.
///
/// The earlier half takes the extra element when the length is odd.
pub fn trend(values: &[f64]) -> Trend {
    if values.len() < MIN_TREND_VALUES {
        return Trend::InsufficientData;
    }
    let split = values.len().div_ceil(2);
    let (first, second) = values.split_at(split);
    let delta = mean(second) - mean(first);
    if delta >= TREND_THRESHOLD {
        Trend::Improving
    } else if delta <= -TREND_THRESHOLD {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Learning,
    Developing,
    Proficient,
    Independent,
}

impl Phase {
    pub fn from_independence(avg: f64) -> Self {
        if avg >= 4.5 {
            Phase::Independent
        } else if avg >= 3.5 {
            Phase::Proficient
        } else if avg >= 2.0 {
            Phase::Developing
        } else {
            Phase::Learning
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Learning => "learning",
            Phase::Developing => "developing",
            Phase::Proficient => "proficient",
            Phase::Independent => "independent",
        }
    }
}

/// Phase from newest-first check-ins; `None` when there are none.
pub fn classify_phase(newest_first: &[CheckIn]) -> Option<Phase> {
    let window: Vec<f64> = newest_first
        .iter()
        .take(PHASE_WINDOW)
        .map(|c| c.independence_level as f64)
        .collect();
    if window.is_empty() {
        return None;
    }
    Some(Phase::from_independence(mean(&window)))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionAnalytics {
    pub goal_id: String,
    pub total_check_ins: usize,
    pub average_quality: Option<f64>,
    pub average_independence: Option<f64>,
    pub quality_trend: Trend,
    pub independence_trend: Trend,
    pub average_time_spent: Option<f64>,
    pub helper_sessions: usize,
    pub independent_sessions: usize,
    pub average_confidence_gain: Option<f64>,
    pub recent_check_ins: Vec<CheckIn>,
}

/// Roll up newest-first check-ins (only the first 100 are used).
pub fn analyze(goal_id: &str, newest_first: &[CheckIn]) -> ProgressionAnalytics {
    let window = &newest_first[..newest_first.len().min(ANALYTICS_WINDOW)];
    let chronological: Vec<&CheckIn> = window.iter().rev().collect();

    let quality: Vec<f64> = chronological.iter().map(|c| c.quality_rating as f64).collect();
    let independence: Vec<f64> = chronological
        .iter()
        .map(|c| c.independence_level as f64)
        .collect();
    let time_spent: Vec<f64> = window
        .iter()
        .filter_map(|c| c.time_spent_minutes)
        .map(f64::from)
        .collect();
    let gains: Vec<f64> = window
        .iter()
        .filter_map(CheckIn::confidence_gain)
        .map(f64::from)
        .collect();
    let helper_sessions = window.iter().filter(|c| c.helper_present).count();

    ProgressionAnalytics {
        goal_id: goal_id.to_string(),
        total_check_ins: window.len(),
        average_quality: mean_opt(&quality).map(round1),
        average_independence: mean_opt(&independence).map(round1),
        quality_trend: trend(&quality),
        independence_trend: trend(&independence),
        average_time_spent: mean_opt(&time_spent).map(round1),
        helper_sessions,
        independent_sessions: window.len() - helper_sessions,
        average_confidence_gain: mean_opt(&gains).map(round1),
        recent_check_ins: window.iter().take(RECENT_CHECK_INS).cloned().collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepProgression {
    pub step_id: String,
    pub sessions: usize,
    /// Percent change from the first to the last independence level.
    pub improvement_rate: Option<f64>,
    pub check_ins: Vec<CheckIn>,
}

/// Per-step progression from check-ins in any order.
pub fn step_progression(step_id: &str, check_ins: &[CheckIn]) -> StepProgression {
    let mut chronological = check_ins.to_vec();
    chronological.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let improvement_rate = match (chronological.first(), chronological.last()) {
        (Some(first), Some(last)) if chronological.len() >= 2 && first.independence_level > 0 => {
            let start = first.independence_level as f64;
            let end = last.independence_level as f64;
            Some(round1((end - start) / start * 100.0))
        }
        _ => None,
    };

    StepProgression {
        step_id: step_id.to_string(),
        sessions: chronological.len(),
        improvement_rate,
        check_ins: chronological,
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn mean_opt(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(mean(values))
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
