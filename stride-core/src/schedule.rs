//! Category points schedule: static per-domain point values.
//!
//! Lookups never fail. Unknown categories resolve to the generic schedule and
//! the result says so.

use std::sync::LazyLock;

use regex::Regex;

use crate::step::StepType;
use crate::Resolved;

/// Global per-step default for unknown categories.
pub const DEFAULT_STEP_POINTS: i64 = 5;
/// Completion bonus for unknown categories.
pub const DEFAULT_COMPLETION_BONUS: i64 = 10;
/// Scaffold items are worth a flat amount in every category.
pub const SCAFFOLD_POINTS: i64 = 2;

/// Point values for one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategorySchedule {
    pub category: &'static str,
    pub habit: Option<i64>,
    pub action: Option<i64>,
    pub milestone: Option<i64>,
    pub scaffolding: Option<i64>,
    pub completion_bonus: i64,
}

impl CategorySchedule {
    const fn full(category: &'static str, per_step: i64, milestone: i64, bonus: i64) -> Self {
        Self {
            category,
            habit: Some(per_step),
            action: Some(per_step),
            milestone: Some(milestone),
            scaffolding: Some(SCAFFOLD_POINTS),
            completion_bonus: bonus,
        }
    }

    fn value_for(&self, step_type: StepType) -> Option<i64> {
        match step_type {
            StepType::Habit => self.habit,
            StepType::Action => self.action,
            StepType::Milestone => self.milestone,
            StepType::Scaffolding => self.scaffolding,
        }
    }

    /// The category's base per-occurrence value (habit, else action).
    fn base_value(&self) -> Option<i64> {
        self.habit.or(self.action)
    }
}

pub static SCHEDULES: &[CategorySchedule] = &[
    CategorySchedule::full("daily_living", 10, 25, 50),
    CategorySchedule::full("self_care", 8, 20, 40),
    CategorySchedule::full("health_fitness", 10, 25, 50),
    CategorySchedule::full("social", 12, 30, 60),
    CategorySchedule::full("communication", 12, 30, 60),
    CategorySchedule::full("money_management", 12, 30, 60),
    CategorySchedule::full("education", 15, 35, 75),
    CategorySchedule::full("employment", 15, 40, 80),
    CategorySchedule::full("recreation", 6, 15, 30),
    // Routines are habit-only; other step kinds fall back to the habit value.
    CategorySchedule {
        category: "routines",
        habit: Some(5),
        action: None,
        milestone: None,
        scaffolding: Some(SCAFFOLD_POINTS),
        completion_bonus: 25,
    },
];

static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s_\-]+").expect("separator pattern"));

/// Find a category's schedule. Matching ignores case and runs of `-`, `_`
/// or whitespace.
pub fn schedule_for(category: &str) -> Option<&'static CategorySchedule> {
    let key = normalize_category(category);
    SCHEDULES.iter().find(|s| s.category == key)
}

fn normalize_category(category: &str) -> String {
    SEPARATORS
        .replace_all(category.trim(), "_")
        .to_lowercase()
}

/// Point value of one completed step of `step_type` in `category`.
pub fn step_points(category: &str, step_type: StepType) -> Resolved<i64> {
    match schedule_for(category) {
        Some(s) => match s.value_for(step_type) {
            Some(v) => Resolved::exact(v),
            None => match s.base_value() {
                Some(v) => Resolved::fallback(v),
                None => Resolved::fallback(DEFAULT_STEP_POINTS),
            },
        },
        None => Resolved::fallback(DEFAULT_STEP_POINTS),
    }
}

/// One-time bonus for completing a goal in `category`.
pub fn completion_bonus(category: &str) -> Resolved<i64> {
    match schedule_for(category) {
        Some(s) => Resolved::exact(s.completion_bonus),
        None => Resolved::fallback(DEFAULT_COMPLETION_BONUS),
    }
}
