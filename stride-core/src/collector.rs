//! Check-in collector: validated writes, newest-first reads, analytics.
//!
//! After a check-in is stored the goal's phase is recomputed on a spawned
//! task. That task never fails the write; its errors are only logged.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::GoalTypeCache;
use crate::checkin::{CheckIn, CheckInPatch, NewCheckIn};
use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult, ValidationError};
use crate::goal::GoalType;
use crate::progression::{
    self, ProgressionAnalytics, StepProgression, ANALYTICS_WINDOW, PHASE_WINDOW, Phase,
};
use crate::store::{CheckInFilter, EngineStore};

/// A stored check-in plus its pending phase recomputation.
#[derive(Debug)]
pub struct RecordedCheckIn {
    pub check_in: CheckIn,
    /// Resolves to the new phase, or `None` if there was nothing to
    /// classify or the update failed. Dropping the handle detaches the task.
    pub phase_update: JoinHandle<Option<Phase>>,
}

pub struct CheckInCollector {
    ctx: EngineContext,
    goal_types: Mutex<GoalTypeCache>,
}

impl CheckInCollector {
    pub fn new(ctx: EngineContext) -> Self {
        let capacity = ctx.config.goal_type_cache_capacity;
        Self {
            ctx,
            goal_types: Mutex::new(GoalTypeCache::new(capacity)),
        }
    }

    fn cached_goal_type(&self, goal_id: &str) -> Option<GoalType> {
        self.goal_types.lock().ok()?.get(goal_id)
    }

    async fn goal_type(&self, goal_id: &str) -> EngineResult<GoalType> {
        if let Some(t) = self.cached_goal_type(goal_id) {
            debug!(goal_id, "goal type cache hit");
            return Ok(t);
        }
        let goal = self.ctx.goal(goal_id).await?;
        if let Ok(mut cache) = self.goal_types.lock() {
            cache.insert(goal_id, goal.goal_type);
        }
        Ok(goal.goal_type)
    }

    /// Drop a cached goal type, e.g. after the goal was rewritten.
    pub fn invalidate_goal_type(&self, goal_id: &str) {
        if let Ok(mut cache) = self.goal_types.lock() {
            cache.invalidate(goal_id);
        }
    }

    fn limit(&self, limit: Option<usize>) -> usize {
        limit.unwrap_or(self.ctx.config.default_read_limit)
    }

    pub async fn create(&self, input: NewCheckIn, now: DateTime<Utc>) -> EngineResult<RecordedCheckIn> {
        input.validate()?;

        if self.goal_type(&input.goal_id).await? != GoalType::ProgressiveMastery {
            return Err(ValidationError::NotProgressiveMastery.into());
        }
        self.ctx.step_of(&input.step_id, &input.goal_id).await?;

        if !input.allow_duplicate {
            let existing = self
                .ctx
                .store
                .list_check_ins(&CheckInFilter::Step(input.step_id.clone()), 1)
                .await?;
            if !existing.is_empty() {
                return Err(ValidationError::DuplicateCheckIn {
                    step_id: input.step_id.clone(),
                }
                .into());
            }
        }

        let check_in = input.into_check_in(
            uuid::Uuid::new_v4().to_string(),
            self.ctx.user_id().to_string(),
            now,
        );
        self.ctx.store.insert_check_in(&check_in).await?;
        info!(
            check_in_id = %check_in.id,
            goal_id = %check_in.goal_id,
            step_id = %check_in.step_id,
            quality = check_in.quality_rating,
            independence = check_in.independence_level,
            "check-in recorded"
        );

        let phase_update = spawn_phase_update(self.ctx.store.clone(), check_in.goal_id.clone());
        Ok(RecordedCheckIn {
            check_in,
            phase_update,
        })
    }

    pub async fn get_by_goal(&self, goal_id: &str, limit: Option<usize>) -> EngineResult<Vec<CheckIn>> {
        let filter = CheckInFilter::Goal(goal_id.to_string());
        Ok(self.ctx.store.list_check_ins(&filter, self.limit(limit)).await?)
    }

    pub async fn get_by_step(&self, step_id: &str, limit: Option<usize>) -> EngineResult<Vec<CheckIn>> {
        let filter = CheckInFilter::Step(step_id.to_string());
        Ok(self.ctx.store.list_check_ins(&filter, self.limit(limit)).await?)
    }

    pub async fn get_latest_for_step(&self, step_id: &str) -> EngineResult<Option<CheckIn>> {
        Ok(self.get_by_step(step_id, Some(1)).await?.into_iter().next())
    }

    /// Check-ins recorded by `user_id`, newest first.
    pub async fn get_recent_activity(&self, user_id: &str, limit: Option<usize>) -> EngineResult<Vec<CheckIn>> {
        let filter = CheckInFilter::User(user_id.to_string());
        Ok(self.ctx.store.list_check_ins(&filter, self.limit(limit)).await?)
    }

    /// Apply a partial update inside the edit window.
    pub async fn update(
        &self,
        check_in_id: &str,
        patch: CheckInPatch,
        now: DateTime<Utc>,
    ) -> EngineResult<CheckIn> {
        let mut check_in = self
            .ctx
            .store
            .get_check_in(check_in_id)
            .await?
            .ok_or_else(|| EngineError::not_found("check-in", check_in_id))?;

        patch.validate(check_in.helper_id.as_deref())?;

        if now - check_in.created_at > self.ctx.config.edit_window() {
            return Err(EngineError::EditWindowClosed {
                check_in_id: check_in_id.to_string(),
            });
        }
        if patch.is_empty() {
            return Ok(check_in);
        }

        let independence_changed = patch
            .independence_level
            .is_some_and(|v| v != check_in.independence_level);
        patch.apply(&mut check_in, now);
        self.ctx.store.update_check_in(&check_in).await?;
        info!(check_in_id, "check-in updated");

        if independence_changed {
            // Detached; the update already succeeded.
            drop(spawn_phase_update(self.ctx.store.clone(), check_in.goal_id.clone()));
        }
        Ok(check_in)
    }

    pub async fn get_progression_analytics(&self, goal_id: &str) -> EngineResult<ProgressionAnalytics> {
        let recent = self
            .ctx
            .store
            .list_check_ins(&CheckInFilter::Goal(goal_id.to_string()), ANALYTICS_WINDOW)
            .await?;
        Ok(progression::analyze(goal_id, &recent))
    }

    pub async fn get_step_progression_data(&self, step_id: &str) -> EngineResult<StepProgression> {
        let all = self
            .ctx
            .store
            .list_check_ins(&CheckInFilter::Step(step_id.to_string()), usize::MAX)
            .await?;
        Ok(progression::step_progression(step_id, &all))
    }

    /// Recompute and store the goal phase now, surfacing errors.
    pub async fn recompute_phase(&self, goal_id: &str) -> EngineResult<Option<Phase>> {
        Ok(update_phase(self.ctx.store.as_ref(), goal_id).await?)
    }
}

/// Classify the goal from its latest check-ins and store `current_phase`.
pub async fn update_phase(store: &dyn EngineStore, goal_id: &str) -> anyhow::Result<Option<Phase>> {
    let recent = store
        .list_check_ins(&CheckInFilter::Goal(goal_id.to_string()), PHASE_WINDOW)
        .await?;
    let Some(phase) = progression::classify_phase(&recent) else {
        return Ok(None);
    };

    store.set_goal_phase(goal_id, phase).await?;
    debug!(goal_id, phase = phase.as_str(), "phase stored");
    Ok(Some(phase))
}

fn spawn_phase_update(store: Arc<dyn EngineStore>, goal_id: String) -> JoinHandle<Option<Phase>> {
    tokio::spawn(async move {
        match update_phase(store.as_ref(), &goal_id).await {
            Ok(phase) => phase,
            Err(e) => {
                warn!(goal_id = %goal_id, error = %e, "phase recomputation failed");
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::checkin::CheckIn;
    use crate::config::EngineConfig;
    use crate::context::StaticIdentity;
    use crate::engine::Engine;
    use crate::goal::{Goal, NewGoal};
    use crate::points::PointsLedgerEntry;
    use crate::progression::Trend;
    use crate::step::{NewStep, Step};
    use crate::store::{CompletionCommit, MemoryStore, SkipCommit};

    /// Delegates to a `MemoryStore` but can be told to reject goal writes.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_goal_writes: AtomicBool,
        full_goal_writes: AtomicUsize,
    }

    #[async_trait]
    impl EngineStore for FlakyStore {
        async fn get_goal(&self, goal_id: &str) -> anyhow::Result<Option<Goal>> {
            self.inner.get_goal(goal_id).await
        }
        async fn put_goal(&self, goal: &Goal) -> anyhow::Result<()> {
            if self.fail_goal_writes.load(Ordering::SeqCst) {
                anyhow::bail!("goal table is read-only");
            }
            self.full_goal_writes.fetch_add(1, Ordering::SeqCst);
            self.inner.put_goal(goal).await
        }
        async fn set_goal_phase(&self, goal_id: &str, phase: Phase) -> anyhow::Result<()> {
            if self.fail_goal_writes.load(Ordering::SeqCst) {
                anyhow::bail!("goal table is read-only");
            }
            self.inner.set_goal_phase(goal_id, phase).await
        }
        async fn list_goals_for_owner(&self, owner_id: &str) -> anyhow::Result<Vec<Goal>> {
            self.inner.list_goals_for_owner(owner_id).await
        }
        async fn list_goals_for_helper(&self, helper_id: &str) -> anyhow::Result<Vec<Goal>> {
            self.inner.list_goals_for_helper(helper_id).await
        }
        async fn get_step(&self, step_id: &str) -> anyhow::Result<Option<Step>> {
            self.inner.get_step(step_id).await
        }
        async fn put_step(&self, step: &Step) -> anyhow::Result<()> {
            self.inner.put_step(step).await
        }
        async fn list_steps(&self, goal_id: &str) -> anyhow::Result<Vec<Step>> {
            self.inner.list_steps(goal_id).await
        }
        async fn insert_check_in(&self, check_in: &CheckIn) -> anyhow::Result<()> {
            self.inner.insert_check_in(check_in).await
        }
        async fn update_check_in(&self, check_in: &CheckIn) -> anyhow::Result<()> {
            self.inner.update_check_in(check_in).await
        }
        async fn get_check_in(&self, check_in_id: &str) -> anyhow::Result<Option<CheckIn>> {
            self.inner.get_check_in(check_in_id).await
        }
        async fn list_check_ins(&self, filter: &CheckInFilter, limit: usize) -> anyhow::Result<Vec<CheckIn>> {
            self.inner.list_check_ins(filter, limit).await
        }
        async fn append_ledger_entry(&self, entry: &PointsLedgerEntry) -> anyhow::Result<()> {
            self.inner.append_ledger_entry(entry).await
        }
        async fn list_ledger_entries(
            &self,
            user_id: &str,
            category: Option<&str>,
        ) -> anyhow::Result<Vec<PointsLedgerEntry>> {
            self.inner.list_ledger_entries(user_id, category).await
        }
        async fn commit_completion(&self, commit: &CompletionCommit) -> anyhow::Result<()> {
            self.inner.commit_completion(commit).await
        }
        async fn commit_skip(&self, commit: &SkipCommit) -> anyhow::Result<()> {
            self.inner.commit_skip(commit).await
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 1, 10, 0, 0).unwrap()
    }

    async fn mastery_setup(store: Arc<dyn EngineStore>) -> (Engine, Goal, Vec<Step>) {
        let engine = Engine::new(store, Arc::new(StaticIdentity::new("u1")), EngineConfig::default()).unwrap();
        let goal = engine
            .create_goal(
                NewGoal::new("Cook pasta", "daily_living", GoalType::ProgressiveMastery).with_cadence(2, 6),
                t0(),
            )
            .await
            .unwrap();
        let mut steps = Vec::new();
        for title in ["Boil water", "Cook pasta", "Drain", "Serve"] {
            let step = engine
                .add_step(&goal.id, NewStep { title: title.into(), ..Default::default() }, t0())
                .await
                .unwrap();
            steps.push(step);
        }
        (engine, goal, steps)
    }

    #[tokio::test]
    async fn create_records_and_updates_phase() {
        let (engine, goal, steps) = mastery_setup(Arc::new(MemoryStore::new())).await;
        let recorded = engine
            .check_ins()
            .create(
                NewCheckIn::new(&goal.id, &steps[0].id, 4, 4).with_confidence(2, 4),
                t0(),
            )
            .await
            .unwrap();

        assert_eq!(recorded.check_in.user_id, "u1");
        assert_eq!(recorded.check_in.confidence_gain(), Some(2));
        assert_eq!(recorded.phase_update.await.unwrap(), Some(Phase::Proficient));
        let stored = engine.goal(&goal.id).await.unwrap();
        assert_eq!(stored.metadata.current_phase, Some(Phase::Proficient));
    }

    #[tokio::test]
    async fn only_mastery_goals_accept_check_ins() {
        let (engine, _, _) = mastery_setup(Arc::new(MemoryStore::new())).await;
        let habit = engine
            .create_goal(NewGoal::new("Stretch", "self_care", GoalType::Habit), t0())
            .await
            .unwrap();
        let step = engine
            .add_step(&habit.id, NewStep { title: "Stretch".into(), ..Default::default() }, t0())
            .await
            .unwrap();

        let err = engine
            .check_ins()
            .create(NewCheckIn::new(&habit.id, &step.id, 3, 3), t0())
            .await
            .unwrap_err();
        assert_eq!(err.validation(), Some(&ValidationError::NotProgressiveMastery));
    }

    #[tokio::test]
    async fn validation_runs_before_any_lookup() {
        let (engine, _, _) = mastery_setup(Arc::new(MemoryStore::new())).await;
        let err = engine
            .check_ins()
            .create(NewCheckIn::new("no-such-goal", "s", 6, 3), t0())
            .await
            .unwrap_err();
        assert!(matches!(
            err.validation(),
            Some(ValidationError::OutOfRange { field: "qualityRating", .. })
        ));
    }

    #[tokio::test]
    async fn second_check_in_for_a_step_needs_opt_in() {
        let (engine, goal, steps) = mastery_setup(Arc::new(MemoryStore::new())).await;
        let collector = engine.check_ins();
        collector
            .create(NewCheckIn::new(&goal.id, &steps[0].id, 3, 2), t0())
            .await
            .unwrap();

        let err = collector
            .create(NewCheckIn::new(&goal.id, &steps[0].id, 4, 3), t0() + Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err.validation(), Some(ValidationError::DuplicateCheckIn { .. })));

        let mut retry = NewCheckIn::new(&goal.id, &steps[0].id, 4, 3);
        retry.allow_duplicate = true;
        collector.create(retry, t0() + Duration::hours(2)).await.unwrap();

        let latest = collector.get_latest_for_step(&steps[0].id).await.unwrap().unwrap();
        assert_eq!(latest.quality_rating, 4);
        assert_eq!(collector.get_by_step(&steps[0].id, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn step_from_another_goal_is_rejected() {
        let (engine, goal, _) = mastery_setup(Arc::new(MemoryStore::new())).await;
        let (_, _, foreign) = mastery_setup(engine.context().store.clone()).await;
        let err = engine
            .check_ins()
            .create(NewCheckIn::new(&goal.id, &foreign[0].id, 3, 3), t0())
            .await
            .unwrap_err();
        assert!(matches!(err.validation(), Some(ValidationError::StepGoalMismatch { .. })));
    }

    #[tokio::test]
    async fn phase_failure_does_not_fail_the_write() {
        let store = Arc::new(FlakyStore::default());
        let (engine, goal, steps) = mastery_setup(store.clone()).await;
        store.fail_goal_writes.store(true, Ordering::SeqCst);

        let recorded = engine
            .check_ins()
            .create(NewCheckIn::new(&goal.id, &steps[1].id, 5, 5), t0())
            .await
            .unwrap();
        assert_eq!(recorded.phase_update.await.unwrap(), None);

        let stored = engine.check_ins().get_by_goal(&goal.id, None).await.unwrap();
        assert_eq!(stored, vec![recorded.check_in]);
        assert!(engine.check_ins().recompute_phase(&goal.id).await.is_err());
    }

    #[tokio::test]
    async fn phase_write_leaves_streak_counters_alone() {
        let store = Arc::new(FlakyStore::default());
        let (engine, goal, steps) = mastery_setup(store.clone()).await;
        let recorded = engine
            .check_ins()
            .create(NewCheckIn::new(&goal.id, &steps[0].id, 2, 2), t0())
            .await
            .unwrap();
        recorded.phase_update.await.unwrap();

        // A streak commit lands after the check-in was recorded.
        let mut counted = engine.goal(&goal.id).await.unwrap();
        counted.streak_count = 4;
        counted.earned_points = 30;
        store.put_goal(&counted).await.unwrap();
        let writes = store.full_goal_writes.load(Ordering::SeqCst);

        let phase = engine.check_ins().recompute_phase(&goal.id).await.unwrap();
        assert_eq!(store.full_goal_writes.load(Ordering::SeqCst), writes);

        let stored = engine.goal(&goal.id).await.unwrap();
        assert_eq!(stored.metadata.current_phase, phase);
        assert_eq!((stored.streak_count, stored.earned_points), (4, 30));
    }

    #[tokio::test]
    async fn edits_close_after_the_window() {
        let (engine, goal, steps) = mastery_setup(Arc::new(MemoryStore::new())).await;
        let collector = engine.check_ins();
        let recorded = collector
            .create(NewCheckIn::new(&goal.id, &steps[0].id, 2, 1), t0())
            .await
            .unwrap();
        recorded.phase_update.await.unwrap();
        let id = recorded.check_in.id.clone();

        let patch = CheckInPatch { independence_level: Some(5), ..Default::default() };
        let updated = collector.update(&id, patch.clone(), t0() + Duration::hours(3)).await.unwrap();
        assert_eq!(updated.independence_level, 5);
        assert_eq!(updated.updated_at, t0() + Duration::hours(3));

        let bad = CheckInPatch { helper_present: Some(true), ..Default::default() };
        let err = collector.update(&id, bad, t0() + Duration::hours(4)).await.unwrap_err();
        assert_eq!(err.validation(), Some(&ValidationError::MissingHelperId));

        let err = collector.update(&id, patch, t0() + Duration::hours(25)).await.unwrap_err();
        assert!(matches!(err, EngineError::EditWindowClosed { .. }));

        let err = collector.update("missing", CheckInPatch::default(), t0()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "check-in", .. }));
    }

    #[tokio::test]
    async fn analytics_cover_latest_check_ins() {
        let (engine, goal, steps) = mastery_setup(Arc::new(MemoryStore::new())).await;
        let collector = engine.check_ins();
        let ratings = [(2, 1), (2, 2), (3, 2), (4, 4), (4, 4), (5, 5)];
        for (i, (q, ind)) in ratings.iter().enumerate() {
            let mut input = NewCheckIn::new(&goal.id, &steps[i % steps.len()].id, *q, *ind).with_time_spent(20);
            input.allow_duplicate = true;
            if i % 2 == 0 {
                input = input.with_helper("h1");
            }
            collector
                .create(input, t0() + Duration::days(i as i64))
                .await
                .unwrap();
        }

        let analytics = collector.get_progression_analytics(&goal.id).await.unwrap();
        assert_eq!(analytics.total_check_ins, 6);
        assert_eq!(analytics.quality_trend, Trend::Improving);
        assert_eq!(analytics.independence_trend, Trend::Improving);
        assert_eq!(analytics.helper_sessions, 3);
        assert_eq!(analytics.independent_sessions, 3);
        assert_eq!(analytics.average_time_spent, Some(20.0));
        assert_eq!(analytics.recent_check_ins.len(), 5);
        assert_eq!(analytics.recent_check_ins[0].quality_rating, 5);

        let progression = collector.get_step_progression_data(&steps[0].id).await.unwrap();
        assert_eq!(progression.sessions, 2);

        let activity = collector.get_recent_activity("u1", Some(2)).await.unwrap();
        assert_eq!(activity.len(), 2);
        assert_eq!(activity[0].independence_level, 5);

        // Latest five independence levels: 5, 4, 4, 2, 2.
        assert_eq!(collector.recompute_phase(&goal.id).await.unwrap(), Some(Phase::Developing));
    }
}
