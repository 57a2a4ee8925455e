//! Habit streaks derived from completion history.
//!
//! Streaks are always recomputed from the completion timestamps; the counters
//! stored on a goal are a cache of the last result.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::time::{days_between, hours_between, local_day};

/// Hours without a completion before a streak is flagged at risk.
pub const AT_RISK_HOURS: f64 = 24.0;
/// Hours without a completion before a streak breaks.
pub const BREAK_HOURS: f64 = 48.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakMilestone {
    None,
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl StreakMilestone {
    pub fn for_streak(days: u32) -> Self {
        match days {
            30.. => StreakMilestone::Platinum,
            14.. => StreakMilestone::Gold,
            7.. => StreakMilestone::Silver,
            3.. => StreakMilestone::Bronze,
            _ => StreakMilestone::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreakCalculation {
    pub current_streak: u32,
    pub longest_streak: u32,
    /// Unbroken calendar days ending at the latest completion, no grace.
    pub consecutive_days: u32,
    pub is_streak_at_risk: bool,
    pub streak_milestone: StreakMilestone,
    pub last_completed: Option<DateTime<Utc>>,
}

/// Result of the lightweight risk probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreakStatus {
    pub is_at_risk: bool,
    pub hours_remaining: f64,
}

/// Distinct completion days, newest first.
fn completion_days(completions: &[DateTime<Utc>], tz: Tz) -> Vec<NaiveDate> {
    let mut days: Vec<NaiveDate> = completions.iter().map(|c| local_day(*c, tz)).collect();
    days.sort_unstable_by(|a, b| b.cmp(a));
    days.dedup();
    days
}

/// Walk backward from `today`. Gaps of 0 or 1 day continue the streak; one
/// gap of exactly 2 days is forgiven; anything else ends it.
fn walk_current(days_desc: &[NaiveDate], today: NaiveDate) -> u32 {
    let mut cursor = today;
    let mut grace_used = false;
    let mut streak = 0;
    for day in days_desc {
        match days_between(*day, cursor) {
            0 | 1 => {}
            2 if !grace_used => grace_used = true,
            _ => break,
        }
        streak += 1;
        cursor = *day;
    }
    streak
}

/// Longest run anywhere in history: the best backward walk from any
/// completion day, under the same one-grace rule as the current streak.
fn longest_run(days_desc: &[NaiveDate]) -> u32 {
    (0..days_desc.len())
        .map(|i| walk_current(&days_desc[i..], days_desc[i]))
        .max()
        .unwrap_or(0)
}

fn consecutive_from_latest(days_desc: &[NaiveDate]) -> u32 {
    let mut count = 0;
    let mut prev: Option<NaiveDate> = None;
    for day in days_desc {
        if let Some(p) = prev {
            if days_between(*day, p) != 1 {
                break;
            }
        }
        count += 1;
        prev = Some(*day);
    }
    count
}

/// Compute a streak from raw completion timestamps.
pub fn calculate(completions: &[DateTime<Utc>], now: DateTime<Utc>, tz: Tz) -> StreakCalculation {
    let days = completion_days(completions, tz);
    let today = local_day(now, tz);
    let current = walk_current(&days, today);
    let last_completed = completions.iter().max().copied();

    let is_streak_at_risk = current > 0
        && last_completed
            .map(|last| hours_between(last, now) > AT_RISK_HOURS)
            .unwrap_or(false);

    StreakCalculation {
        current_streak: current,
        longest_streak: longest_run(&days).max(current),
        consecutive_days: consecutive_from_latest(&days),
        is_streak_at_risk,
        streak_milestone: StreakMilestone::for_streak(current),
        last_completed,
    }
}

/// Risk probe from stored goal counters.
pub fn status(last_completed: Option<DateTime<Utc>>, streak_count: u32, now: DateTime<Utc>) -> StreakStatus {
    match last_completed {
        Some(last) => {
            let hours = hours_between(last, now);
            StreakStatus {
                is_at_risk: streak_count > 0 && hours > AT_RISK_HOURS,
                hours_remaining: (BREAK_HOURS - hours).max(0.0),
            }
        }
        None => StreakStatus {
            is_at_risk: false,
            hours_remaining: 0.0,
        },
    }
}
