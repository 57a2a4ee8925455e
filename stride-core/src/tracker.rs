//! Habit streak tracker: completion and skip events plus streak probes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::EngineContext;
use crate::error::{EngineResult, ValidationError};
use crate::goal::{Goal, GoalType};
use crate::points::{calculate_step_points, goal_completion_bonus, PointsLedgerEntry};
use crate::step::{SkipReason, SkipRecord, Step, StepStatus, StepType};
use crate::store::{CompletionCommit, SkipCommit};
use crate::streak::{self, StreakCalculation, StreakMilestone, StreakStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitCompletion {
    pub step: Step,
    pub streak: StreakCalculation,
    pub milestone: StreakMilestone,
    pub points_awarded: i64,
    /// Completion bonus, when this step finished the goal.
    pub bonus_awarded: i64,
    pub next_step: Option<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipOutcome {
    pub step: Step,
    pub streak_broken: bool,
    pub streak_count: u32,
    pub next_step: Option<Step>,
}

/// Whether completing `step` finishes a non-habit goal: every stored required
/// step is done and the done count reaches the planned step and milestone count.
fn completes_plan(goal: &Goal, steps: &[Step], step: &Step) -> bool {
    let others: Vec<&Step> = steps.iter().filter(|s| s.id != step.id && s.required).collect();
    if others.iter().any(|s| s.status != StepStatus::Done) {
        return false;
    }
    let done = others.len() + usize::from(step.required);
    let planned = goal
        .planned_steps
        .saturating_add(goal.planned_milestones)
        .max(1);
    u32::try_from(done).map_or(true, |d| d >= planned)
}

pub struct StreakTracker {
    ctx: EngineContext,
}

impl StreakTracker {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    async fn completion_history(&self, goal_id: &str) -> EngineResult<Vec<DateTime<Utc>>> {
        let steps = self.ctx.store.list_steps(goal_id).await?;
        Ok(steps.iter().filter_map(Step::done_at).collect())
    }

    /// Derive the streak from completion history, ignoring stored counters.
    pub async fn calculate_streak(&self, goal_id: &str, now: DateTime<Utc>) -> EngineResult<StreakCalculation> {
        self.ctx.goal(goal_id).await?;
        let history = self.completion_history(goal_id).await?;
        Ok(streak::calculate(&history, now, self.ctx.tz()))
    }

    async fn open_step(&self, step_id: &str, goal: &Goal) -> EngineResult<Step> {
        if goal.archived {
            return Err(ValidationError::GoalArchived { goal_id: goal.id.clone() }.into());
        }
        let step = self.ctx.step_of(step_id, &goal.id).await?;
        if step.status.is_terminal() {
            return Err(ValidationError::StepAlreadyTerminal {
                step_id: step_id.to_string(),
                status: step.status.as_str().to_string(),
            }
            .into());
        }
        Ok(step)
    }

    /// Fresh occurrence of a habit step, placed after the goal's last step.
    async fn next_occurrence(&self, goal: &Goal, step: &Step, now: DateTime<Utc>) -> EngineResult<Option<Step>> {
        if goal.goal_type != GoalType::Habit || step.step_type != StepType::Habit {
            return Ok(None);
        }
        let steps = self.ctx.store.list_steps(&goal.id).await?;
        let order_index = steps.iter().map(|s| s.order_index).max().unwrap_or(0) + 1;
        let mut next = Step::new(
            uuid::Uuid::new_v4().to_string(),
            goal.id.clone(),
            order_index,
            step.title.clone(),
            StepType::Habit,
            now,
        );
        next.required = step.required;
        Ok(Some(next))
    }

    pub async fn mark_habit_complete(
        &self,
        step_id: &str,
        goal_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<HabitCompletion> {
        let mut goal = self.ctx.goal_for_update(goal_id).await?;
        let mut step = self.open_step(step_id, &goal).await?;

        let points = calculate_step_points(&goal.category, step.step_type).value;
        step.status = StepStatus::Done;
        step.completed_at = Some(now);
        step.points_awarded = Some(points);

        let steps = self.ctx.store.list_steps(goal_id).await?;
        let mut history: Vec<DateTime<Utc>> = steps
            .iter()
            .filter(|s| s.id != step.id)
            .filter_map(Step::done_at)
            .collect();
        history.push(now);
        let streak = streak::calculate(&history, now, self.ctx.tz());

        let finishes_goal = goal.goal_type != GoalType::Habit
            && goal.completed_at.is_none()
            && completes_plan(&goal, &steps, &step);
        let bonus = if finishes_goal {
            goal_completion_bonus(&goal.category).value
        } else {
            0
        };

        goal.streak_count = streak.current_streak;
        goal.longest_streak = goal.longest_streak.max(streak.longest_streak);
        goal.last_completed_date = streak.last_completed;
        goal.earned_points += points + bonus;
        if finishes_goal {
            goal.completed_at = Some(now);
        }
        goal.updated_at = now;

        let next_step = self.next_occurrence(&goal, &step, now).await?;
        let mut ledger_entries = vec![PointsLedgerEntry::award(
            goal.owner_id.clone(),
            goal.category.clone(),
            points,
            goal.id.clone(),
            step.id.clone(),
            now,
        )];
        if bonus > 0 {
            ledger_entries.push(PointsLedgerEntry::award(
                goal.owner_id.clone(),
                goal.category.clone(),
                bonus,
                goal.id.clone(),
                step.id.clone(),
                now,
            ));
        }

        self.ctx
            .store
            .commit_completion(&CompletionCommit {
                step: step.clone(),
                goal: goal.clone(),
                ledger_entries,
                next_step: next_step.clone(),
            })
            .await?;

        info!(
            goal_id,
            step_id,
            streak = streak.current_streak,
            points,
            bonus,
            "step completed"
        );

        Ok(HabitCompletion {
            step,
            milestone: streak.streak_milestone,
            streak,
            points_awarded: points,
            bonus_awarded: bonus,
            next_step,
        })
    }

    /// Skip a step. The goal streak resets only if it was already at risk.
    pub async fn record_skip(
        &self,
        step_id: &str,
        goal_id: &str,
        reason: SkipReason,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<SkipOutcome> {
        let mut goal = self.ctx.goal_for_update(goal_id).await?;
        let mut step = self.open_step(step_id, &goal).await?;

        let history = self.completion_history(goal_id).await?;
        let at_risk = streak::calculate(&history, now, self.ctx.tz()).is_streak_at_risk;

        step.status = StepStatus::Skipped;
        step.skips.push(SkipRecord {
            reason,
            note: note.filter(|n| !n.trim().is_empty()),
            skipped_at: now,
        });

        let goal_update = if at_risk {
            goal.streak_count = 0;
            goal.updated_at = now;
            Some(goal.clone())
        } else {
            None
        };
        let next_step = self.next_occurrence(&goal, &step, now).await?;

        self.ctx
            .store
            .commit_skip(&SkipCommit {
                step: step.clone(),
                goal: goal_update,
                next_step: next_step.clone(),
            })
            .await?;

        info!(goal_id, step_id, ?reason, streak_broken = at_risk, "step skipped");

        Ok(SkipOutcome {
            step,
            streak_broken: at_risk,
            streak_count: goal.streak_count,
            next_step,
        })
    }

    /// Cheap probe from stored counters.
    pub async fn check_streak_status(&self, goal_id: &str, now: DateTime<Utc>) -> EngineResult<StreakStatus> {
        let goal = self.ctx.goal(goal_id).await?;
        Ok(streak::status(goal.last_completed_date, goal.streak_count, now))
    }

    /// Rebuild the stored counters from history.
    pub async fn recompute_streak(&self, goal_id: &str, now: DateTime<Utc>) -> EngineResult<StreakCalculation> {
        let mut goal = self.ctx.goal(goal_id).await?;
        let history = self.completion_history(goal_id).await?;
        let streak = streak::calculate(&history, now, self.ctx.tz());

        goal.streak_count = streak.current_streak;
        goal.longest_streak = goal.longest_streak.max(streak.longest_streak);
        goal.last_completed_date = streak.last_completed;
        goal.updated_at = now;
        self.ctx.store.put_goal(&goal).await?;
        Ok(streak)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;
    use crate::config::EngineConfig;
    use crate::context::StaticIdentity;
    use crate::engine::Engine;
    use crate::error::EngineError;
    use crate::goal::NewGoal;
    use crate::step::NewStep;
    use crate::store::MemoryStore;

    fn day(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, d, h, 0, 0).unwrap()
    }

    async fn habit_setup() -> (Engine, Goal, Step) {
        let engine = Engine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(StaticIdentity::new("u1")),
            EngineConfig::default(),
        )
        .unwrap();
        let goal = engine
            .create_goal(
                NewGoal::new("Make bed", "daily_living", GoalType::Habit).with_cadence(7, 4),
                day(1, 8),
            )
            .await
            .unwrap();
        let step = engine
            .add_step(&goal.id, NewStep { title: "Make bed".into(), ..Default::default() }, day(1, 8))
            .await
            .unwrap();
        (engine, goal, step)
    }

    #[tokio::test]
    async fn completion_awards_points_and_queues_next_occurrence() {
        let (engine, goal, step) = habit_setup().await;
        let done = engine
            .streaks()
            .mark_habit_complete(&step.id, &goal.id, day(1, 9))
            .await
            .unwrap();

        assert_eq!(done.points_awarded, 10);
        assert_eq!(done.bonus_awarded, 0);
        assert_eq!(done.streak.current_streak, 1);
        assert_eq!(done.step.status, StepStatus::Done);
        let next = done.next_step.expect("habit goals get a new occurrence");
        assert_eq!(next.status, StepStatus::NotStarted);
        assert_eq!(next.order_index, step.order_index + 1);

        let stored = engine.goal(&goal.id).await.unwrap();
        assert_eq!(stored.earned_points, 10);
        assert_eq!(stored.streak_count, 1);
        assert_eq!(engine.points_balance("u1", Some("daily_living")).await.unwrap().balance, 10);
    }

    #[tokio::test]
    async fn one_missed_day_is_forgiven() {
        let (engine, goal, step) = habit_setup().await;
        let tracker = engine.streaks();

        let a = tracker.mark_habit_complete(&step.id, &goal.id, day(1, 9)).await.unwrap();
        let b_step = a.next_step.unwrap();
        let b = tracker.mark_habit_complete(&b_step.id, &goal.id, day(2, 9)).await.unwrap();
        let c_step = b.next_step.unwrap();
        // Day 3 missed.
        let c = tracker.mark_habit_complete(&c_step.id, &goal.id, day(4, 9)).await.unwrap();
        assert_eq!(c.streak.current_streak, 3);
        assert_eq!(c.milestone, StreakMilestone::Bronze);

        let recomputed = tracker.calculate_streak(&goal.id, day(4, 10)).await.unwrap();
        assert_eq!(recomputed.current_streak, 3);
        assert_eq!(recomputed.consecutive_days, 1);
    }

    #[tokio::test]
    async fn completing_twice_is_rejected() {
        let (engine, goal, step) = habit_setup().await;
        engine.streaks().mark_habit_complete(&step.id, &goal.id, day(1, 9)).await.unwrap();
        let err = engine
            .streaks()
            .mark_habit_complete(&step.id, &goal.id, day(1, 10))
            .await
            .unwrap_err();
        assert!(matches!(err.validation(), Some(ValidationError::StepAlreadyTerminal { .. })));
    }

    #[tokio::test]
    async fn overlapping_commits_award_once() {
        let (engine, goal, step) = habit_setup().await;
        let store = engine.context().store.clone();

        // Two events that both read the step while it was still open.
        let mut done = step.clone();
        done.status = StepStatus::Done;
        done.completed_at = Some(day(1, 9));
        let commit = |amount| CompletionCommit {
            step: done.clone(),
            goal: goal.clone(),
            ledger_entries: vec![PointsLedgerEntry::award("u1", "daily_living", amount, &goal.id, &step.id, day(1, 9))],
            next_step: None,
        };
        store.commit_completion(&commit(10)).await.unwrap();
        assert!(store.commit_completion(&commit(10)).await.is_err());

        let skip = SkipCommit { step: done.clone(), goal: None, next_step: None };
        assert!(store.commit_skip(&skip).await.is_err());

        assert_eq!(engine.points_balance("u1", None).await.unwrap().earned, 10);
        assert_eq!(engine.list_steps(&goal.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn skip_resets_streak_only_when_at_risk() {
        let (engine, goal, step) = habit_setup().await;
        let tracker = engine.streaks();
        let done = tracker.mark_habit_complete(&step.id, &goal.id, day(1, 9)).await.unwrap();
        let second = done.next_step.unwrap();

        // Same evening: not at risk, streak survives.
        let calm = tracker
            .record_skip(&second.id, &goal.id, SkipReason::NoTime, None, day(1, 20))
            .await
            .unwrap();
        assert!(!calm.streak_broken);
        assert_eq!(calm.streak_count, 1);
        assert_eq!(calm.step.skips.len(), 1);
        let third = calm.next_step.unwrap();

        // 27 hours later the streak is at risk; skipping breaks it.
        let broken = tracker
            .record_skip(&third.id, &goal.id, SkipReason::Forgot, Some("  ".into()), day(2, 12))
            .await
            .unwrap();
        assert!(broken.streak_broken);
        assert_eq!(broken.streak_count, 0);
        assert_eq!(broken.step.skips[0].note, None);
        assert_eq!(engine.goal(&goal.id).await.unwrap().streak_count, 0);
    }

    #[tokio::test]
    async fn status_probe_reads_stored_counters() {
        let (engine, goal, step) = habit_setup().await;
        engine.streaks().mark_habit_complete(&step.id, &goal.id, day(1, 9)).await.unwrap();

        let fresh = engine.streaks().check_streak_status(&goal.id, day(1, 21)).await.unwrap();
        assert!(!fresh.is_at_risk);
        assert_eq!(fresh.hours_remaining, 36.0);

        let late = engine.streaks().check_streak_status(&goal.id, day(2, 19)).await.unwrap();
        assert!(late.is_at_risk);
        assert_eq!(late.hours_remaining, 14.0);
    }

    #[tokio::test]
    async fn last_required_step_earns_goal_bonus() {
        let (engine, _, _) = habit_setup().await;
        let goal = engine
            .create_goal(NewGoal::new("Apply for jobs", "employment", GoalType::Milestone), day(1, 8))
            .await
            .unwrap();
        let first = engine
            .add_step(&goal.id, NewStep { title: "Write CV".into(), ..Default::default() }, day(1, 8))
            .await
            .unwrap();
        let second = engine
            .add_step(
                &goal.id,
                NewStep {
                    title: "Interview".into(),
                    step_type: Some(StepType::Milestone),
                    ..Default::default()
                },
                day(1, 8),
            )
            .await
            .unwrap();

        let a = engine.streaks().mark_habit_complete(&first.id, &goal.id, day(1, 9)).await.unwrap();
        assert_eq!(a.bonus_awarded, 0);
        assert!(a.next_step.is_none());

        let b = engine.streaks().mark_habit_complete(&second.id, &goal.id, day(2, 9)).await.unwrap();
        assert_eq!(b.points_awarded, 40);
        assert_eq!(b.bonus_awarded, 80);
        assert_eq!(engine.goal(&goal.id).await.unwrap().earned_points, 15 + 40 + 80);
    }

    #[tokio::test]
    async fn bonus_waits_for_the_planned_step_count() {
        let (engine, _, _) = habit_setup().await;
        let goal = engine
            .create_goal(
                NewGoal {
                    planned_steps: 3,
                    ..NewGoal::new("Learn to cook", "education", GoalType::ProgressiveMastery)
                },
                day(1, 8),
            )
            .await
            .unwrap();

        let mut bonuses = Vec::new();
        for i in 0..3 {
            let step = engine
                .add_step(&goal.id, NewStep { title: format!("Lesson {i}"), ..Default::default() }, day(1, 8))
                .await
                .unwrap();
            let done = engine
                .streaks()
                .mark_habit_complete(&step.id, &goal.id, day(2 + i, 8))
                .await
                .unwrap();
            bonuses.push(done.bonus_awarded);
            let stored = engine.goal(&goal.id).await.unwrap();
            assert_eq!(stored.completed_at.is_some(), i == 2, "after lesson {i}");
        }
        assert_eq!(bonuses, vec![0, 0, 75]);
    }

    #[tokio::test]
    async fn unknown_goal_is_not_found() {
        let (engine, _, step) = habit_setup().await;
        let err = engine
            .streaks()
            .mark_habit_complete(&step.id, "missing", day(1, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "goal", .. }));
    }
}
