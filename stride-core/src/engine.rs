//! Facade over the engine components sharing one store and identity.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::collector::CheckInCollector;
use crate::config::EngineConfig;
use crate::context::{EngineContext, Identity};
use crate::error::{EngineError, EngineResult, ValidationError};
use crate::goal::{Goal, GoalMetadata, GoalPlanChange, NewGoal};
use crate::planner::SmartStartPlanner;
use crate::points::{LedgerKind, LedgerSummary, PointsLedgerEntry};
use crate::step::{NewStep, Step};
use crate::store::EngineStore;
use crate::streak::StreakCalculation;
use crate::tracker::StreakTracker;

/// Per-goal result of `Engine::reconcile_owner`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalReconciliation {
    pub goal_id: String,
    pub streak: StreakCalculation,
    pub earned_points: i64,
    /// Stored `earned_points` before reconciliation.
    pub previous_earned_points: i64,
}

pub struct Engine {
    ctx: EngineContext,
    check_ins: CheckInCollector,
    streaks: StreakTracker,
    planner: SmartStartPlanner,
}

impl Engine {
    pub fn new(
        store: Arc<dyn EngineStore>,
        identity: Arc<dyn Identity>,
        config: EngineConfig,
    ) -> anyhow::Result<Self> {
        let ctx = EngineContext::new(store, identity, config)?;
        Ok(Self {
            check_ins: CheckInCollector::new(ctx.clone()),
            streaks: StreakTracker::new(ctx.clone()),
            planner: SmartStartPlanner::new(ctx.clone()),
            ctx,
        })
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn check_ins(&self) -> &CheckInCollector {
        &self.check_ins
    }

    pub fn streaks(&self) -> &StreakTracker {
        &self.streaks
    }

    pub fn planner(&self) -> &SmartStartPlanner {
        &self.planner
    }

    pub async fn goal(&self, goal_id: &str) -> EngineResult<Goal> {
        self.ctx.goal(goal_id).await
    }

    pub async fn create_goal(&self, input: NewGoal, now: DateTime<Utc>) -> EngineResult<Goal> {
        if input.title.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "title" }.into());
        }
        let user = self.ctx.user_id().to_string();
        let mut goal = Goal {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: input.owner_id.unwrap_or_else(|| user.clone()),
            title: input.title.trim().to_string(),
            category: input.category,
            goal_type: input.goal_type,
            due_date: input.due_date,
            frequency_per_week: input.frequency_per_week,
            duration_weeks: input.duration_weeks,
            planned_steps: input.planned_steps,
            planned_milestones: input.planned_milestones,
            planned_scaffolds: input.planned_scaffolds,
            total_possible_points: 0,
            earned_points: 0,
            streak_count: 0,
            longest_streak: 0,
            last_completed_date: None,
            completed_at: None,
            archived: false,
            metadata: GoalMetadata {
                teaching_helper: input.teaching_helper,
                ..GoalMetadata::default()
            },
            created_by: user,
            created_at: now,
            updated_at: now,
        };
        // Only the owner or the named teaching helper may create on the owner's behalf.
        if !goal.can_modify(&goal.created_by) {
            return Err(EngineError::NotPermitted {
                user_id: goal.created_by,
                goal_id: goal.id,
            });
        }
        goal.refresh_total_possible_points()?;
        self.ctx.store.put_goal(&goal).await?;
        info!(
            goal_id = %goal.id,
            category = %goal.category,
            total_possible_points = goal.total_possible_points,
            "goal created"
        );
        Ok(goal)
    }

    /// Change plan fields and recompute the point ceiling.
    pub async fn update_goal_plan(
        &self,
        goal_id: &str,
        change: GoalPlanChange,
        now: DateTime<Utc>,
    ) -> EngineResult<Goal> {
        let mut goal = self.ctx.goal_for_update(goal_id).await?;
        change.apply(&mut goal);
        goal.refresh_total_possible_points()?;
        goal.updated_at = now;
        self.ctx.store.put_goal(&goal).await?;
        self.check_ins.invalidate_goal_type(goal_id);
        Ok(goal)
    }

    pub async fn archive_goal(&self, goal_id: &str, now: DateTime<Utc>) -> EngineResult<Goal> {
        let mut goal = self.ctx.goal_for_update(goal_id).await?;
        if !goal.archived {
            goal.archived = true;
            goal.updated_at = now;
            self.ctx.store.put_goal(&goal).await?;
            self.check_ins.invalidate_goal_type(goal_id);
            info!(goal_id, "goal archived");
        }
        Ok(goal)
    }

    /// Append a step after the goal's current last step.
    pub async fn add_step(&self, goal_id: &str, input: NewStep, now: DateTime<Utc>) -> EngineResult<Step> {
        let goal = self.ctx.goal_for_update(goal_id).await?;
        if goal.archived {
            return Err(ValidationError::GoalArchived { goal_id: goal.id }.into());
        }
        if input.title.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "title" }.into());
        }
        if let (Some(step_due), Some(goal_due)) = (input.due_date, goal.due_date) {
            if step_due > goal_due {
                return Err(ValidationError::StepDueAfterGoal {
                    step_due: step_due.to_string(),
                    goal_due: goal_due.to_string(),
                }
                .into());
            }
        }

        let existing = self.ctx.store.list_steps(goal_id).await?;
        let order_index = existing.iter().map(|s| s.order_index).max().map_or(0, |m| m + 1);
        let step_type = input
            .step_type
            .unwrap_or_else(|| goal.goal_type.occurrence_step_type());

        let mut step = Step::new(
            uuid::Uuid::new_v4().to_string(),
            goal.id.clone(),
            order_index,
            input.title.trim(),
            step_type,
            now,
        );
        if let Some(due) = input.due_date {
            step = step.with_due_date(due);
        }
        if input.required == Some(false) {
            step = step.optional();
        }
        self.ctx.store.put_step(&step).await?;
        Ok(step)
    }

    pub async fn list_steps(&self, goal_id: &str) -> EngineResult<Vec<Step>> {
        self.ctx.goal(goal_id).await?;
        Ok(self.ctx.store.list_steps(goal_id).await?)
    }

    pub async fn goals_for_owner(&self, owner_id: &str) -> EngineResult<Vec<Goal>> {
        Ok(self.ctx.store.list_goals_for_owner(owner_id).await?)
    }

    /// Goals on which `helper_id` is the designated teaching helper.
    pub async fn goals_for_helper(&self, helper_id: &str) -> EngineResult<Vec<Goal>> {
        Ok(self.ctx.store.list_goals_for_helper(helper_id).await?)
    }

    pub async fn ledger(&self, user_id: &str, category: Option<&str>) -> EngineResult<Vec<PointsLedgerEntry>> {
        Ok(self.ctx.store.list_ledger_entries(user_id, category).await?)
    }

    pub async fn points_balance(&self, user_id: &str, category: Option<&str>) -> EngineResult<LedgerSummary> {
        let entries = self.ledger(user_id, category).await?;
        Ok(LedgerSummary::from_entries(&entries))
    }

    /// Rebuild streak counters and earned points of every goal `owner_id` owns.
    ///
    /// Earned points are the sum of the awards the ledger holds for the goal.
    pub async fn reconcile_owner(&self, owner_id: &str, now: DateTime<Utc>) -> EngineResult<Vec<GoalReconciliation>> {
        let goals = self.ctx.store.list_goals_for_owner(owner_id).await?;
        let ledger = self.ctx.store.list_ledger_entries(owner_id, None).await?;

        let mut out = Vec::with_capacity(goals.len());
        for goal in goals {
            let streak = self.streaks.recompute_streak(&goal.id, now).await?;
            let earned: i64 = ledger
                .iter()
                .filter(|e| e.kind == LedgerKind::Award && e.goal_id.as_deref() == Some(goal.id.as_str()))
                .map(|e| e.amount)
                .sum();

            // recompute_streak rewrote the row; reload before touching points.
            let mut current = self.ctx.goal(&goal.id).await?;
            if current.earned_points != earned {
                info!(
                    goal_id = %goal.id,
                    stored = current.earned_points,
                    earned,
                    "earned points reconciled"
                );
                current.earned_points = earned;
                current.updated_at = now;
                self.ctx.store.put_goal(&current).await?;
            }
            out.push(GoalReconciliation {
                goal_id: goal.id,
                streak,
                earned_points: earned,
                previous_earned_points: goal.earned_points,
            });
        }
        Ok(out)
    }
}
