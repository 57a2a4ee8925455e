//! Check-in records and their field validation.
//!
//! Rules are checked in a fixed order and the first violation is returned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const RATING_MIN: i32 = 1;
pub const RATING_MAX: i32 = 5;
pub const MAX_TIME_SPENT_MINUTES: i32 = 480;
pub const MAX_NOTES_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
    pub id: String,
    pub goal_id: String,
    pub step_id: String,
    /// Who recorded the check-in.
    pub user_id: String,
    pub quality_rating: i32,
    pub independence_level: i32,
    pub time_spent_minutes: Option<i32>,
    pub confidence_before: Option<i32>,
    pub confidence_after: Option<i32>,
    pub notes: Option<String>,
    pub helper_present: bool,
    pub helper_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckIn {
    /// After minus before, when both were recorded.
    pub fn confidence_gain(&self) -> Option<i32> {
        Some(self.confidence_after? - self.confidence_before?)
    }
}

/// Caller input for a new check-in. Required fields are optional here so
/// that their absence is reported as a validation error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCheckIn {
    pub goal_id: String,
    pub step_id: String,
    pub quality_rating: Option<i32>,
    pub independence_level: Option<i32>,
    pub time_spent_minutes: Option<i32>,
    pub confidence_before: Option<i32>,
    pub confidence_after: Option<i32>,
    pub notes: Option<String>,
    #[serde(default)]
    pub helper_present: bool,
    pub helper_id: Option<String>,
    /// Record another check-in even if the step already has one.
    #[serde(default)]
    pub allow_duplicate: bool,
}

impl NewCheckIn {
    pub fn new(goal_id: impl Into<String>, step_id: impl Into<String>, quality: i32, independence: i32) -> Self {
        Self {
            goal_id: goal_id.into(),
            step_id: step_id.into(),
            quality_rating: Some(quality),
            independence_level: Some(independence),
            ..Default::default()
        }
    }

    pub fn with_time_spent(mut self, minutes: i32) -> Self {
        self.time_spent_minutes = Some(minutes);
        self
    }

    pub fn with_confidence(mut self, before: i32, after: i32) -> Self {
        self.confidence_before = Some(before);
        self.confidence_after = Some(after);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_helper(mut self, helper_id: impl Into<String>) -> Self {
        self.helper_present = true;
        self.helper_id = Some(helper_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.goal_id.trim().is_empty() {
            return Err(ValidationError::MissingGoalId);
        }
        if self.step_id.trim().is_empty() {
            return Err(ValidationError::MissingStepId);
        }
        required_rating("qualityRating", self.quality_rating)?;
        required_rating("independenceLevel", self.independence_level)?;
        check_time_spent(self.time_spent_minutes)?;
        check_optional_rating("confidenceBefore", self.confidence_before)?;
        check_optional_rating("confidenceAfter", self.confidence_after)?;
        check_notes(self.notes.as_deref())?;
        check_helper(self.helper_present, self.helper_id.as_deref())?;
        Ok(())
    }

    /// Build the stored record. Call `validate` first.
    pub fn into_check_in(self, id: String, user_id: String, now: DateTime<Utc>) -> CheckIn {
        CheckIn {
            id,
            goal_id: self.goal_id,
            step_id: self.step_id,
            user_id,
            quality_rating: self.quality_rating.unwrap_or(RATING_MIN),
            independence_level: self.independence_level.unwrap_or(RATING_MIN),
            time_spent_minutes: self.time_spent_minutes,
            confidence_before: self.confidence_before,
            confidence_after: self.confidence_after,
            notes: self.notes,
            helper_present: self.helper_present,
            helper_id: if self.helper_present { self.helper_id } else { None },
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update. Only supplied fields are validated and written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInPatch {
    pub quality_rating: Option<i32>,
    pub independence_level: Option<i32>,
    pub time_spent_minutes: Option<i32>,
    pub confidence_before: Option<i32>,
    pub confidence_after: Option<i32>,
    pub notes: Option<String>,
    pub helper_present: Option<bool>,
    pub helper_id: Option<String>,
}

impl CheckInPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Validate supplied fields. `existing_helper_id` satisfies the helper
    /// rule when the patch turns `helperPresent` on without a new id.
    pub fn validate(&self, existing_helper_id: Option<&str>) -> Result<(), ValidationError> {
        check_optional_rating("qualityRating", self.quality_rating)?;
        check_optional_rating("independenceLevel", self.independence_level)?;
        check_time_spent(self.time_spent_minutes)?;
        check_optional_rating("confidenceBefore", self.confidence_before)?;
        check_optional_rating("confidenceAfter", self.confidence_after)?;
        check_notes(self.notes.as_deref())?;
        if let Some(present) = self.helper_present {
            check_helper(present, self.helper_id.as_deref().or(existing_helper_id))?;
        } else if let Some(id) = self.helper_id.as_deref() {
            if id.trim().is_empty() {
                return Err(ValidationError::MissingHelperId);
            }
        }
        Ok(())
    }

    pub fn apply(&self, c: &mut CheckIn, now: DateTime<Utc>) {
        if let Some(v) = self.quality_rating {
            c.quality_rating = v;
        }
        if let Some(v) = self.independence_level {
            c.independence_level = v;
        }
        if let Some(v) = self.time_spent_minutes {
            c.time_spent_minutes = Some(v);
        }
        if let Some(v) = self.confidence_before {
            c.confidence_before = Some(v);
        }
        if let Some(v) = self.confidence_after {
            c.confidence_after = Some(v);
        }
        if let Some(v) = &self.notes {
            c.notes = Some(v.clone());
        }
        if let Some(v) = &self.helper_id {
            c.helper_id = Some(v.clone());
        }
        if let Some(present) = self.helper_present {
            c.helper_present = present;
            if !present {
                c.helper_id = None;
            }
        }
        c.updated_at = now;
    }
}

fn rating_range(field: &'static str) -> ValidationError {
    ValidationError::OutOfRange {
        field,
        min: RATING_MIN as i64,
        max: RATING_MAX as i64,
    }
}

fn required_rating(field: &'static str, v: Option<i32>) -> Result<(), ValidationError> {
    match v {
        None => Err(ValidationError::MissingField { field }),
        Some(v) if !(RATING_MIN..=RATING_MAX).contains(&v) => Err(rating_range(field)),
        Some(_) => Ok(()),
    }
}

fn check_optional_rating(field: &'static str, v: Option<i32>) -> Result<(), ValidationError> {
    match v {
        Some(v) if !(RATING_MIN..=RATING_MAX).contains(&v) => Err(rating_range(field)),
        _ => Ok(()),
    }
}

fn check_time_spent(v: Option<i32>) -> Result<(), ValidationError> {
    match v {
        Some(m) if !(1..=MAX_TIME_SPENT_MINUTES).contains(&m) => Err(ValidationError::OutOfRange {
            field: "timeSpentMinutes",
            min: 1,
            max: MAX_TIME_SPENT_MINUTES as i64,
        }),
        _ => Ok(()),
    }
}

fn check_notes(notes: Option<&str>) -> Result<(), ValidationError> {
    match notes {
        Some(n) if n.chars().count() > MAX_NOTES_CHARS => Err(ValidationError::NotesTooLong {
            max: MAX_NOTES_CHARS,
        }),
        _ => Ok(()),
    }
}

fn check_helper(present: bool, helper_id: Option<&str>) -> Result<(), ValidationError> {
    if present && helper_id.map(str::trim).unwrap_or("").is_empty() {
        return Err(ValidationError::MissingHelperId);
    }
    Ok(())
}
