//! Engine error taxonomy.
//!
//! Validation and not-found errors surface to the immediate caller. Store
//! failures are carried as `anyhow::Error` so backends can attach context.

use thiserror::Error;

/// One violated input rule. Checks stop at the first violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("goalId is required")]
    MissingGoalId,
    #[error("stepId is required")]
    MissingStepId,
    #[error("{field} is required")]
    MissingField { field: &'static str },
    #[error("{field} must be an integer between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
    },
    #[error("notes must be {max} characters or fewer")]
    NotesTooLong { max: usize },
    #[error("helperId is required when helperPresent is true")]
    MissingHelperId,
    #[error("{field} must not be negative")]
    Negative { field: &'static str },
    #[error("{field} is too large")]
    TooLarge { field: &'static str },
    #[error("step {step_id} already has a check-in")]
    DuplicateCheckIn { step_id: String },
    #[error("check-ins are only recorded for progressive mastery goals")]
    NotProgressiveMastery,
    #[error("step {step_id} is already {status}")]
    StepAlreadyTerminal { step_id: String, status: String },
    #[error("step {step_id} does not belong to goal {goal_id}")]
    StepGoalMismatch { step_id: String, goal_id: String },
    #[error("step due date {step_due} is after goal due date {goal_due}")]
    StepDueAfterGoal { step_due: String, goal_due: String },
    #[error("goal {goal_id} is archived")]
    GoalArchived { goal_id: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("user {user_id} may not modify goal {goal_id}")]
    NotPermitted { user_id: String, goal_id: String },

    #[error("check-in {check_in_id} can no longer be edited")]
    EditWindowClosed { check_in_id: String },

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// The validation rule that failed, if this is a validation error.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(v) => Some(v),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
