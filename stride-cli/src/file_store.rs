//! JSON document store under the stride home directory.
//!
//! The whole state is rewritten on every change: serialize, write a sibling
//! temp file, then rename over the original. A failed write leaves both the
//! file and the in-memory copy untouched.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use stride_core::store::{CompletionCommit, SkipCommit};
use stride_core::{CheckIn, CheckInFilter, EngineStore, Goal, Phase, PointsLedgerEntry, Step, StoreState};

pub struct FileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl FileStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("read {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?
        } else {
            StoreState::default()
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        f(&*self.state.lock().await)
    }

    async fn write<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut StoreState) -> Result<R> + Send,
        R: Send,
    {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        persist(&self.path, &next).await?;
        *guard = next;
        Ok(out)
    }
}

async fn persist(path: &Path, state: &StoreState) -> Result<()> {
    let json = serde_json::to_vec_pretty(state).context("serialize state")?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

#[async_trait]
impl EngineStore for FileStore {
    async fn get_goal(&self, goal_id: &str) -> Result<Option<Goal>> {
        Ok(self.read(|s| s.goals.get(goal_id).cloned()).await)
    }

    async fn put_goal(&self, goal: &Goal) -> Result<()> {
        self.write(|s| {
            s.goals.insert(goal.id.clone(), goal.clone());
            Ok(())
        })
        .await
    }

    async fn set_goal_phase(&self, goal_id: &str, phase: Phase) -> Result<()> {
        self.write(|s| s.set_goal_phase(goal_id, phase)).await
    }

    async fn list_goals_for_owner(&self, owner_id: &str) -> Result<Vec<Goal>> {
        Ok(self.read(|s| s.goals_where(|g| g.owner_id == owner_id)).await)
    }

    async fn list_goals_for_helper(&self, helper_id: &str) -> Result<Vec<Goal>> {
        Ok(self
            .read(|s| s.goals_where(|g| g.teaching_helper_id() == Some(helper_id)))
            .await)
    }

    async fn get_step(&self, step_id: &str) -> Result<Option<Step>> {
        Ok(self.read(|s| s.steps.get(step_id).cloned()).await)
    }

    async fn put_step(&self, step: &Step) -> Result<()> {
        self.write(|s| {
            s.steps.insert(step.id.clone(), step.clone());
            Ok(())
        })
        .await
    }

    async fn list_steps(&self, goal_id: &str) -> Result<Vec<Step>> {
        Ok(self.read(|s| s.steps_for(goal_id)).await)
    }

    async fn insert_check_in(&self, check_in: &CheckIn) -> Result<()> {
        self.write(|s| s.insert_check_in(check_in)).await
    }

    async fn update_check_in(&self, check_in: &CheckIn) -> Result<()> {
        self.write(|s| s.update_check_in(check_in)).await
    }

    async fn get_check_in(&self, check_in_id: &str) -> Result<Option<CheckIn>> {
        Ok(self
            .read(|s| s.check_ins.iter().find(|c| c.id == check_in_id).cloned())
            .await)
    }

    async fn list_check_ins(&self, filter: &CheckInFilter, limit: usize) -> Result<Vec<CheckIn>> {
        Ok(self.read(|s| s.check_ins_where(filter, limit)).await)
    }

    async fn append_ledger_entry(&self, entry: &PointsLedgerEntry) -> Result<()> {
        self.write(|s| {
            s.ledger.push(entry.clone());
            Ok(())
        })
        .await
    }

    async fn list_ledger_entries(&self, user_id: &str, category: Option<&str>) -> Result<Vec<PointsLedgerEntry>> {
        Ok(self.read(|s| s.ledger_for(user_id, category)).await)
    }

    async fn commit_completion(&self, commit: &CompletionCommit) -> Result<()> {
        self.write(|s| s.apply_completion(commit)).await
    }

    async fn commit_skip(&self, commit: &SkipCommit) -> Result<()> {
        self.write(|s| s.apply_skip(commit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use stride_core::{Engine, EngineConfig, GoalType, NewGoal, NewStep, StaticIdentity, StepStatus};

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let now = Utc.with_ymd_and_hms(2025, 2, 3, 9, 0, 0).unwrap();

        let store = Arc::new(FileStore::open(&path).await.unwrap());
        let engine = Engine::new(store, Arc::new(StaticIdentity::new("maya")), EngineConfig::default()).unwrap();
        let goal = engine
            .create_goal(NewGoal::new("Water plants", "routines", GoalType::Habit).with_cadence(2, 4), now)
            .await
            .unwrap();
        let step = engine
            .add_step(&goal.id, NewStep { title: "Water plants".into(), ..Default::default() }, now)
            .await
            .unwrap();
        engine.streaks().mark_habit_complete(&step.id, &goal.id, now).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = FileStore::open(&path).await.unwrap();
        let stored = reopened.get_goal(&goal.id).await.unwrap().unwrap();
        assert_eq!(stored.streak_count, 1);
        assert_eq!(stored.earned_points, 5);
        assert_eq!(reopened.list_steps(&goal.id).await.unwrap().len(), 2);
        assert_eq!(reopened.list_ledger_entries("maya", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_completion_of_a_step_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let now = Utc.with_ymd_and_hms(2025, 2, 3, 9, 0, 0).unwrap();

        let store = Arc::new(FileStore::open(&path).await.unwrap());
        let engine = Engine::new(store.clone(), Arc::new(StaticIdentity::new("maya")), EngineConfig::default()).unwrap();
        let goal = engine
            .create_goal(NewGoal::new("Fold laundry", "routines", GoalType::Milestone), now)
            .await
            .unwrap();
        let step = engine
            .add_step(&goal.id, NewStep { title: "Fold".into(), ..Default::default() }, now)
            .await
            .unwrap();

        let mut done = step.clone();
        done.status = StepStatus::Done;
        done.completed_at = Some(now);
        let commit = CompletionCommit {
            step: done,
            goal: goal.clone(),
            ledger_entries: vec![PointsLedgerEntry::award("maya", "routines", 5, &goal.id, &step.id, now)],
            next_step: None,
        };
        store.commit_completion(&commit).await.unwrap();
        assert!(store.commit_completion(&commit).await.is_err());

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.list_ledger_entries("maya", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_write_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::open(&path).await.unwrap();

        let now = Utc.with_ymd_and_hms(2025, 2, 3, 9, 0, 0).unwrap();
        let ci = CheckIn {
            id: "c1".into(),
            goal_id: "g1".into(),
            step_id: "s1".into(),
            user_id: "maya".into(),
            quality_rating: 3,
            independence_level: 3,
            time_spent_minutes: None,
            confidence_before: None,
            confidence_after: None,
            notes: None,
            helper_present: false,
            helper_id: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_check_in(&ci).await.unwrap();
        assert!(store.insert_check_in(&ci).await.is_err());

        let all = store
            .list_check_ins(&CheckInFilter::Goal("g1".into()), 10)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        let on_disk: StoreState = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.check_ins.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = FileStore::open(&path).await.err().unwrap();
        assert!(err.to_string().contains("parse"));
    }
}
