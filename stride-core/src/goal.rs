//! Goal model and its embedded metadata.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::assessment::{SkillAssessment, SmartStartPlan};
use crate::error::EngineResult;
use crate::points::{calculate_total_possible_points, TppBreakdown, TppInput};
use crate::progression::Phase;
use crate::step::StepType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Habit,
    ProgressiveMastery,
    Milestone,
}

impl GoalType {
    /// Step type whose value drives the per-occurrence part of TPP.
    pub fn occurrence_step_type(&self) -> StepType {
        match self {
            GoalType::Habit => StepType::Habit,
            GoalType::ProgressiveMastery | GoalType::Milestone => StepType::Action,
        }
    }
}

impl std::str::FromStr for GoalType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "habit" => Ok(Self::Habit),
            "progressive_mastery" | "progressive-mastery" | "mastery" => Ok(Self::ProgressiveMastery),
            "milestone" => Ok(Self::Milestone),
            _ => Err(format!("unknown goal type: {s}")),
        }
    }
}

/// Person designated to assist with a goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeachingHelper {
    pub user_id: String,
    pub name: Option<String>,
    pub relationship: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_assessment: Option<SkillAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smart_start: Option<SmartStartPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teaching_helper: Option<TeachingHelper>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<Phase>,
    /// Keys the engine does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub category: String,
    pub goal_type: GoalType,
    pub due_date: Option<NaiveDate>,

    pub frequency_per_week: u32,
    pub duration_weeks: u32,
    pub planned_steps: u32,
    pub planned_milestones: u32,
    pub planned_scaffolds: u32,

    /// Derived from the plan; see `Goal::tpp_input`.
    pub total_possible_points: i64,
    pub earned_points: i64,

    pub streak_count: u32,
    pub longest_streak: u32,
    pub last_completed_date: Option<DateTime<Utc>>,
    /// Set when the completion bonus is paid; never cleared.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    pub archived: bool,
    #[serde(default)]
    pub metadata: GoalMetadata,

    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Goal {
    pub fn tpp_input(&self) -> TppInput {
        TppInput {
            frequency_per_week: self.frequency_per_week as i64,
            duration_weeks: self.duration_weeks as i64,
            planned_milestones: self.planned_milestones as i64,
            planned_scaffolds: self.planned_scaffolds as i64,
            step_type: self.goal_type.occurrence_step_type(),
        }
    }

    /// Recompute `total_possible_points` from the current plan.
    pub fn refresh_total_possible_points(&mut self) -> EngineResult<TppBreakdown> {
        let tpp = calculate_total_possible_points(&self.category, &self.tpp_input())?;
        self.total_possible_points = tpp.total;
        Ok(tpp)
    }

    pub fn teaching_helper_id(&self) -> Option<&str> {
        self.metadata
            .teaching_helper
            .as_ref()
            .map(|h| h.user_id.as_str())
    }

    /// Owners and the designated teaching helper may change a goal.
    pub fn can_modify(&self, user_id: &str) -> bool {
        self.owner_id == user_id || self.teaching_helper_id() == Some(user_id)
    }
}

/// Input for creating a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewGoal {
    /// Defaults to the current user when absent.
    pub owner_id: Option<String>,
    pub title: String,
    pub category: String,
    pub goal_type: GoalType,
    pub due_date: Option<NaiveDate>,
    pub frequency_per_week: u32,
    pub duration_weeks: u32,
    pub planned_steps: u32,
    pub planned_milestones: u32,
    pub planned_scaffolds: u32,
    pub teaching_helper: Option<TeachingHelper>,
}

impl NewGoal {
    pub fn new(title: impl Into<String>, category: impl Into<String>, goal_type: GoalType) -> Self {
        Self {
            owner_id: None,
            title: title.into(),
            category: category.into(),
            goal_type,
            due_date: None,
            frequency_per_week: 0,
            duration_weeks: 0,
            planned_steps: 0,
            planned_milestones: 0,
            planned_scaffolds: 0,
            teaching_helper: None,
        }
    }

    pub fn with_cadence(mut self, frequency_per_week: u32, duration_weeks: u32) -> Self {
        self.frequency_per_week = frequency_per_week;
        self.duration_weeks = duration_weeks;
        self
    }

    pub fn with_structure(mut self, milestones: u32, scaffolds: u32) -> Self {
        self.planned_milestones = milestones;
        self.planned_scaffolds = scaffolds;
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_helper(mut self, helper: TeachingHelper) -> Self {
        self.teaching_helper = Some(helper);
        self
    }

    pub fn with_due_date(mut self, due: NaiveDate) -> Self {
        self.due_date = Some(due);
        self
    }
}

/// Plan fields that change a goal's point ceiling. `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalPlanChange {
    pub frequency_per_week: Option<u32>,
    pub duration_weeks: Option<u32>,
    pub planned_steps: Option<u32>,
    pub planned_milestones: Option<u32>,
    pub planned_scaffolds: Option<u32>,
}

impl GoalPlanChange {
    pub fn apply(&self, goal: &mut Goal) {
        if let Some(v) = self.frequency_per_week {
            goal.frequency_per_week = v;
        }
        if let Some(v) = self.duration_weeks {
            goal.duration_weeks = v;
        }
        if let Some(v) = self.planned_steps {
            goal.planned_steps = v;
        }
        if let Some(v) = self.planned_milestones {
            goal.planned_milestones = v;
        }
        if let Some(v) = self.planned_scaffolds {
            goal.planned_scaffolds = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_keeps_unknown_keys() {
        let json = r#"{"current_phase":"developing","wizard_version":3}"#;
        let meta: GoalMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.current_phase, Some(Phase::Developing));
        assert_eq!(meta.extra.get("wizard_version"), Some(&serde_json::json!(3)));

        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["wizard_version"], 3);
        assert!(back.get("smart_start").is_none());
    }

    #[test]
    fn goal_type_occurrence_values() {
        assert_eq!(GoalType::Habit.occurrence_step_type(), StepType::Habit);
        assert_eq!(GoalType::ProgressiveMastery.occurrence_step_type(), StepType::Action);
        assert_eq!("progressive-mastery".parse::<GoalType>().unwrap(), GoalType::ProgressiveMastery);
    }

    #[test]
    fn plan_change_only_touches_supplied_fields() {
        let now = chrono::Utc::now();
        let mut goal = Goal {
            id: "g1".into(),
            owner_id: "u1".into(),
            title: "Make breakfast".into(),
            category: "daily_living".into(),
            goal_type: GoalType::Habit,
            due_date: None,
            frequency_per_week: 3,
            duration_weeks: 8,
            planned_steps: 0,
            planned_milestones: 1,
            planned_scaffolds: 2,
            total_possible_points: 0,
            earned_points: 0,
            streak_count: 0,
            longest_streak: 0,
            last_completed_date: None,
            completed_at: None,
            archived: false,
            metadata: GoalMetadata::default(),
            created_by: "u1".into(),
            created_at: now,
            updated_at: now,
        };
        GoalPlanChange { duration_weeks: Some(10), ..Default::default() }.apply(&mut goal);
        assert_eq!(goal.duration_weeks, 10);
        assert_eq!(goal.frequency_per_week, 3);

        assert!(goal.can_modify("u1"));
        assert!(!goal.can_modify("h1"));
        goal.metadata.teaching_helper = Some(TeachingHelper {
            user_id: "h1".into(),
            name: None,
            relationship: Some("job coach".into()),
        });
        assert!(goal.can_modify("h1"));
    }
}
