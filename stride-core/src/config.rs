//! Engine configuration.

use anyhow::Result;
use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::time::parse_timezone;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// IANA timezone used to bucket completions into calendar days.
    pub timezone: String,
    /// How long after creation a check-in may still be edited.
    pub check_in_edit_window_hours: i64,
    /// Limit applied to check-in reads when the caller passes none.
    pub default_read_limit: usize,
    /// Entries kept by the collector's goal-type cache.
    pub goal_type_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            check_in_edit_window_hours: 24,
            default_read_limit: 50,
            goal_type_cache_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn tz(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }

    pub fn edit_window(&self) -> Duration {
        Duration::hours(self.check_in_edit_window_hours.max(0))
    }

    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = tz.into();
        self
    }
}
