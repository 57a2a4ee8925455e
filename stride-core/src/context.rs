//! Shared handles for engine components: store, identity and config.

use std::sync::Arc;

use chrono_tz::Tz;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ValidationError};
use crate::goal::Goal;
use crate::step::Step;
use crate::store::EngineStore;

/// Supplies the acting user's id.
pub trait Identity: Send + Sync {
    fn current_user_id(&self) -> &str;
}

/// A fixed user, for CLIs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentity(pub String);

impl StaticIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self(user_id.into())
    }
}

impl Identity for StaticIdentity {
    fn current_user_id(&self) -> &str {
        &self.0
    }
}

#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn EngineStore>,
    pub identity: Arc<dyn Identity>,
    pub config: Arc<EngineConfig>,
    tz: Tz,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn EngineStore>,
        identity: Arc<dyn Identity>,
        config: EngineConfig,
    ) -> anyhow::Result<Self> {
        let tz = config.tz()?;
        Ok(Self {
            store,
            identity,
            config: Arc::new(config),
            tz,
        })
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn user_id(&self) -> &str {
        self.identity.current_user_id()
    }

    pub async fn goal(&self, goal_id: &str) -> EngineResult<Goal> {
        self.store
            .get_goal(goal_id)
            .await?
            .ok_or_else(|| EngineError::not_found("goal", goal_id))
    }

    /// Load a goal the current user may change.
    pub async fn goal_for_update(&self, goal_id: &str) -> EngineResult<Goal> {
        let goal = self.goal(goal_id).await?;
        let user = self.user_id();
        if !goal.can_modify(user) {
            return Err(EngineError::NotPermitted {
                user_id: user.to_string(),
                goal_id: goal_id.to_string(),
            });
        }
        Ok(goal)
    }

    /// Load a step and check it belongs to `goal_id`.
    pub async fn step_of(&self, step_id: &str, goal_id: &str) -> EngineResult<Step> {
        let step = self
            .store
            .get_step(step_id)
            .await?
            .ok_or_else(|| EngineError::not_found("step", step_id))?;
        if step.goal_id != goal_id {
            return Err(ValidationError::StepGoalMismatch {
                step_id: step_id.to_string(),
                goal_id: goal_id.to_string(),
            }
            .into());
        }
        Ok(step)
    }
}
