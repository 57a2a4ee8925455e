//! Points & TPP calculator, plus the append-only points ledger types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, ValidationError};
use crate::schedule::{self, SCAFFOLD_POINTS};
use crate::step::StepType;
use crate::Resolved;

/// Point value of a single completed step.
pub fn calculate_step_points(category: &str, step_type: StepType) -> Resolved<i64> {
    let r = schedule::step_points(category, step_type);
    if r.used_default {
        tracing::debug!(category, step_type = step_type.as_str(), points = r.value, "step points fell back to default");
    }
    r
}

/// One-time completion bonus for `category` (default 10).
pub fn goal_completion_bonus(category: &str) -> Resolved<i64> {
    schedule::completion_bonus(category)
}

/// Planned structure of a goal that drives its point ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TppInput {
    pub frequency_per_week: i64,
    pub duration_weeks: i64,
    pub planned_milestones: i64,
    pub planned_scaffolds: i64,
    /// Which per-occurrence value to use: habit or action.
    pub step_type: StepType,
}

/// Per-term breakdown of a Total Possible Points ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TppBreakdown {
    pub occurrences: i64,
    pub milestones: i64,
    pub scaffolds: i64,
    pub completion_bonus: i64,
    pub total: i64,
    pub used_default: bool,
}

/// Compute a goal's Total Possible Points.
///
/// Zero frequency or duration is a milestone-only goal: the ceiling is just
/// milestones + scaffolds + bonus. Negative inputs are rejected, and so is
/// a plan whose ceiling does not fit in an `i64`.
pub fn calculate_total_possible_points(category: &str, input: &TppInput) -> EngineResult<TppBreakdown> {
    for (field, v) in [
        ("frequencyPerWeek", input.frequency_per_week),
        ("durationWeeks", input.duration_weeks),
        ("plannedMilestonesCount", input.planned_milestones),
        ("plannedScaffoldCount", input.planned_scaffolds),
    ] {
        if v < 0 {
            return Err(ValidationError::Negative { field }.into());
        }
    }

    let per_occurrence = calculate_step_points(category, input.step_type);
    let milestone = calculate_step_points(category, StepType::Milestone);
    let bonus = goal_completion_bonus(category);

    let occurrences = per_occurrence
        .value
        .checked_mul(input.frequency_per_week)
        .and_then(|v| v.checked_mul(input.duration_weeks))
        .ok_or(ValidationError::TooLarge { field: "frequencyPerWeek" })?;
    let milestones = milestone
        .value
        .checked_mul(input.planned_milestones)
        .ok_or(ValidationError::TooLarge { field: "plannedMilestonesCount" })?;
    let scaffolds = SCAFFOLD_POINTS
        .checked_mul(input.planned_scaffolds)
        .ok_or(ValidationError::TooLarge { field: "plannedScaffoldCount" })?;
    let total = occurrences
        .checked_add(milestones)
        .and_then(|v| v.checked_add(scaffolds))
        .and_then(|v| v.checked_add(bonus.value))
        .ok_or(ValidationError::TooLarge { field: "totalPossiblePoints" })?;

    Ok(TppBreakdown {
        occurrences,
        milestones,
        scaffolds,
        completion_bonus: bonus.value,
        total,
        used_default: per_occurrence.used_default || milestone.used_default || bonus.used_default,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    /// Written by this engine on completion events.
    Award,
    /// Written by the reward/redemption collaborator.
    Redemption,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsLedgerEntry {
    pub id: String,
    pub user_id: String,
    pub category: String,
    pub amount: i64,
    pub kind: LedgerKind,
    pub goal_id: Option<String>,
    pub step_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PointsLedgerEntry {
    /// An award for completing a step. Negative amounts are floored at zero.
    pub fn award(
        user_id: impl Into<String>,
        category: impl Into<String>,
        amount: i64,
        goal_id: impl Into<String>,
        step_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            category: category.into(),
            amount: amount.max(0),
            kind: LedgerKind::Award,
            goal_id: Some(goal_id.into()),
            step_id: Some(step_id.into()),
            created_at,
        }
    }
}

/// Running totals for one (user, category).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub earned: i64,
    pub redeemed: i64,
    pub balance: i64,
}

impl LedgerSummary {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a PointsLedgerEntry>) -> Self {
        let mut out = Self::default();
        for e in entries {
            match e.kind {
                LedgerKind::Award => out.earned += e.amount,
                LedgerKind::Redemption => out.redeemed += -e.amount,
            }
            out.balance += e.amount;
        }
        out
    }
}
