//! Step model: the atomic unit of a goal.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Habit,
    Action,
    Milestone,
    Scaffolding,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Habit => "habit",
            StepType::Action => "action",
            StepType::Milestone => "milestone",
            StepType::Scaffolding => "scaffolding",
        }
    }
}

impl std::str::FromStr for StepType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "habit" => Ok(Self::Habit),
            "action" => Ok(Self::Action),
            "milestone" => Ok(Self::Milestone),
            "scaffolding" | "scaffold" => Ok(Self::Scaffolding),
            _ => Err(format!("unknown step type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    NotStarted,
    InProgress,
    Done,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::NotStarted => "not_started",
            StepStatus::InProgress => "in_progress",
            StepStatus::Done => "done",
            StepStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotFeelingWell,
    NoTime,
    Forgot,
    HelperUnavailable,
    TooDifficult,
    Other,
}

impl std::str::FromStr for SkipReason {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_feeling_well" | "sick" => Ok(Self::NotFeelingWell),
            "no_time" => Ok(Self::NoTime),
            "forgot" => Ok(Self::Forgot),
            "helper_unavailable" => Ok(Self::HelperUnavailable),
            "too_difficult" => Ok(Self::TooDifficult),
            "other" => Ok(Self::Other),
            _ => Err(format!("unknown skip reason: {s}")),
        }
    }
}

/// A structured skip entry appended to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub reason: SkipReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub skipped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub goal_id: String,
    pub order_index: u32,
    pub title: String,
    pub step_type: StepType,
    pub required: bool,
    pub status: StepStatus,
    pub due_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Null until the step is completed.
    pub points_awarded: Option<i64>,
    #[serde(default)]
    pub skips: Vec<SkipRecord>,
    pub created_at: DateTime<Utc>,
}

impl Step {
    pub fn new(
        id: impl Into<String>,
        goal_id: impl Into<String>,
        order_index: u32,
        title: impl Into<String>,
        step_type: StepType,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            goal_id: goal_id.into(),
            order_index,
            title: title.into(),
            step_type,
            required: true,
            status: StepStatus::NotStarted,
            due_date: None,
            completed_at: None,
            points_awarded: None,
            skips: Vec::new(),
            created_at,
        }
    }

    pub fn with_due_date(mut self, due: NaiveDate) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Completion timestamp of a done step.
    pub fn done_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            StepStatus::Done => self.completed_at,
            _ => None,
        }
    }
}

/// Input for adding a step to a goal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewStep {
    pub title: String,
    pub step_type: Option<StepType>,
    pub required: Option<bool>,
    pub due_date: Option<NaiveDate>,
}
