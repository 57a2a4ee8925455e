//! stride-core: points, streaks, Smart Start planning and check-in analytics
//! for goal-based skill building.

pub mod assessment;
pub mod cache;
pub mod checkin;
pub mod collector;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod goal;
pub mod planner;
pub mod points;
pub mod progression;
pub mod schedule;
pub mod step;
pub mod store;
pub mod streak;
pub mod time;
pub mod tracker;

pub use assessment::{
    calculate_skill_level, ramp, skill_level_label, suggest_start_frequency, AssessmentResponses,
    RampPhase, SkillAssessment, SmartStartPlan, StartSuggestion,
};
pub use cache::GoalTypeCache;
pub use checkin::{CheckIn, CheckInPatch, NewCheckIn};
pub use collector::{CheckInCollector, RecordedCheckIn};
pub use config::EngineConfig;
pub use context::{EngineContext, Identity, StaticIdentity};
pub use engine::{Engine, GoalReconciliation};
pub use error::{EngineError, EngineResult, ValidationError};
pub use goal::{Goal, GoalMetadata, GoalPlanChange, GoalType, NewGoal, TeachingHelper};
pub use planner::SmartStartPlanner;
pub use points::{
    calculate_step_points, calculate_total_possible_points, goal_completion_bonus, LedgerKind,
    LedgerSummary, PointsLedgerEntry, TppBreakdown, TppInput,
};
pub use progression::{Phase, ProgressionAnalytics, StepProgression, Trend};
pub use step::{NewStep, SkipReason, SkipRecord, Step, StepStatus, StepType};
pub use store::{CheckInFilter, CompletionCommit, EngineStore, MemoryStore, SkipCommit, StoreState};
pub use streak::{StreakCalculation, StreakMilestone, StreakStatus};
pub use tracker::{HabitCompletion, SkipOutcome, StreakTracker};

/// A looked-up value and whether it came from a fallback rather than an
/// exact table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Resolved<T> {
    pub value: T,
    pub used_default: bool,
}

impl<T> Resolved<T> {
    pub fn exact(value: T) -> Self {
        Self { value, used_default: false }
    }

    pub fn fallback(value: T) -> Self {
        Self { value, used_default: true }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
        Resolved {
            value: f(self.value),
            used_default: self.used_default,
        }
    }
}
