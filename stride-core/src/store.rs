//! Persistent store contract and the in-memory implementation.
//!
//! Completion and skip events touch several records; backends must apply a
//! `CompletionCommit` or `SkipCommit` as a single atomic write.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::checkin::CheckIn;
use crate::goal::Goal;
use crate::points::PointsLedgerEntry;
use crate::progression::Phase;
use crate::step::Step;

/// Which check-ins to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckInFilter {
    Goal(String),
    Step(String),
    /// Check-ins recorded by this user.
    User(String),
}

/// Everything written when a step is completed. Rejected when the stored
/// step is already done or skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionCommit {
    pub step: Step,
    pub goal: Goal,
    /// Step award, plus the completion bonus when the step finished the goal.
    pub ledger_entries: Vec<PointsLedgerEntry>,
    /// Next occurrence for habit goals.
    pub next_step: Option<Step>,
}

/// Everything written when a step is skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct SkipCommit {
    pub step: Step,
    /// Present only when goal counters changed.
    pub goal: Option<Goal>,
    pub next_step: Option<Step>,
}

#[async_trait]
pub trait EngineStore: Send + Sync {
    async fn get_goal(&self, goal_id: &str) -> anyhow::Result<Option<Goal>>;
    /// Insert or replace a goal.
    async fn put_goal(&self, goal: &Goal) -> anyhow::Result<()>;
    /// Write only `metadata.current_phase`, leaving the rest of the row as stored.
    async fn set_goal_phase(&self, goal_id: &str, phase: Phase) -> anyhow::Result<()>;
    async fn list_goals_for_owner(&self, owner_id: &str) -> anyhow::Result<Vec<Goal>>;
    /// Goals where `helper_id` is the designated teaching helper.
    async fn list_goals_for_helper(&self, helper_id: &str) -> anyhow::Result<Vec<Goal>>;

    async fn get_step(&self, step_id: &str) -> anyhow::Result<Option<Step>>;
    async fn put_step(&self, step: &Step) -> anyhow::Result<()>;
    /// Steps of a goal ordered by `order_index`.
    async fn list_steps(&self, goal_id: &str) -> anyhow::Result<Vec<Step>>;

    async fn insert_check_in(&self, check_in: &CheckIn) -> anyhow::Result<()>;
    async fn update_check_in(&self, check_in: &CheckIn) -> anyhow::Result<()>;
    async fn get_check_in(&self, check_in_id: &str) -> anyhow::Result<Option<CheckIn>>;
    /// Newest first by creation time; later inserts win ties.
    async fn list_check_ins(&self, filter: &CheckInFilter, limit: usize) -> anyhow::Result<Vec<CheckIn>>;

    async fn append_ledger_entry(&self, entry: &PointsLedgerEntry) -> anyhow::Result<()>;
    /// Entries for a user, optionally narrowed to one category, oldest first.
    async fn list_ledger_entries(
        &self,
        user_id: &str,
        category: Option<&str>,
    ) -> anyhow::Result<Vec<PointsLedgerEntry>>;

    async fn commit_completion(&self, commit: &CompletionCommit) -> anyhow::Result<()>;
    async fn commit_skip(&self, commit: &SkipCommit) -> anyhow::Result<()>;
}

/// Plain record set shared by the in-memory and file-backed stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub goals: HashMap<String, Goal>,
    #[serde(default)]
    pub steps: HashMap<String, Step>,
    /// Insertion order.
    #[serde(default)]
    pub check_ins: Vec<CheckIn>,
    /// Append-only.
    #[serde(default)]
    pub ledger: Vec<PointsLedgerEntry>,
}

impl StoreState {
    pub fn goals_where(&self, pred: impl Fn(&Goal) -> bool) -> Vec<Goal> {
        let mut out: Vec<Goal> = self.goals.values().filter(|g| pred(g)).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn set_goal_phase(&mut self, goal_id: &str, phase: Phase) -> anyhow::Result<()> {
        let goal = self
            .goals
            .get_mut(goal_id)
            .ok_or_else(|| anyhow::anyhow!("goal {goal_id} does not exist"))?;
        goal.metadata.current_phase = Some(phase);
        Ok(())
    }

    pub fn steps_for(&self, goal_id: &str) -> Vec<Step> {
        let mut out: Vec<Step> = self
            .steps
            .values()
            .filter(|s| s.goal_id == goal_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn insert_check_in(&mut self, check_in: &CheckIn) -> anyhow::Result<()> {
        if self.check_ins.iter().any(|c| c.id == check_in.id) {
            anyhow::bail!("check-in {} already exists", check_in.id);
        }
        self.check_ins.push(check_in.clone());
        Ok(())
    }

    pub fn update_check_in(&mut self, check_in: &CheckIn) -> anyhow::Result<()> {
        let slot = self
            .check_ins
            .iter_mut()
            .find(|c| c.id == check_in.id)
            .ok_or_else(|| anyhow::anyhow!("check-in {} does not exist", check_in.id))?;
        *slot = check_in.clone();
        Ok(())
    }

    pub fn check_ins_where(&self, filter: &CheckInFilter, limit: usize) -> Vec<CheckIn> {
        let matches = |c: &CheckIn| match filter {
            CheckInFilter::Goal(id) => &c.goal_id == id,
            CheckInFilter::Step(id) => &c.step_id == id,
            CheckInFilter::User(id) => &c.user_id == id,
        };
        // Reverse insertion order first so the stable sort keeps later inserts ahead on ties.
        let mut out: Vec<CheckIn> = self.check_ins.iter().rev().filter(|c| matches(c)).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        out
    }

    pub fn ledger_for(&self, user_id: &str, category: Option<&str>) -> Vec<PointsLedgerEntry> {
        self.ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .filter(|e| category.is_none_or(|c| e.category == c))
            .cloned()
            .collect()
    }

    /// The stored step must still be open; a step completed or skipped by an
    /// overlapping event rejects the whole commit.
    fn ensure_open(&self, step: &Step) -> anyhow::Result<()> {
        if let Some(stored) = self.steps.get(&step.id) {
            if stored.status.is_terminal() {
                anyhow::bail!("step {} is already {}", step.id, stored.status.as_str());
            }
        }
        Ok(())
    }

    pub fn apply_completion(&mut self, commit: &CompletionCommit) -> anyhow::Result<()> {
        self.ensure_open(&commit.step)?;
        self.steps.insert(commit.step.id.clone(), commit.step.clone());
        self.goals.insert(commit.goal.id.clone(), commit.goal.clone());
        self.ledger.extend(commit.ledger_entries.iter().cloned());
        if let Some(next) = &commit.next_step {
            self.steps.insert(next.id.clone(), next.clone());
        }
        Ok(())
    }

    pub fn apply_skip(&mut self, commit: &SkipCommit) -> anyhow::Result<()> {
        self.ensure_open(&commit.step)?;
        self.steps.insert(commit.step.id.clone(), commit.step.clone());
        if let Some(goal) = &commit.goal {
            self.goals.insert(goal.id.clone(), goal.clone());
        }
        if let Some(next) = &commit.next_step {
            self.steps.insert(next.id.clone(), next.clone());
        }
        Ok(())
    }
}

/// Process-local store. Each operation takes the lock once, so commits are atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub async fn snapshot(&self) -> StoreState {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl EngineStore for MemoryStore {
    async fn get_goal(&self, goal_id: &str) -> anyhow::Result<Option<Goal>> {
        Ok(self.state.read().await.goals.get(goal_id).cloned())
    }

    async fn put_goal(&self, goal: &Goal) -> anyhow::Result<()> {
        self.state.write().await.goals.insert(goal.id.clone(), goal.clone());
        Ok(())
    }

    async fn set_goal_phase(&self, goal_id: &str, phase: Phase) -> anyhow::Result<()> {
        self.state.write().await.set_goal_phase(goal_id, phase)
    }

    async fn list_goals_for_owner(&self, owner_id: &str) -> anyhow::Result<Vec<Goal>> {
        Ok(self.state.read().await.goals_where(|g| g.owner_id == owner_id))
    }

    async fn list_goals_for_helper(&self, helper_id: &str) -> anyhow::Result<Vec<Goal>> {
        Ok(self
            .state
            .read()
            .await
            .goals_where(|g| g.teaching_helper_id() == Some(helper_id)))
    }

    async fn get_step(&self, step_id: &str) -> anyhow::Result<Option<Step>> {
        Ok(self.state.read().await.steps.get(step_id).cloned())
    }

    async fn put_step(&self, step: &Step) -> anyhow::Result<()> {
        self.state.write().await.steps.insert(step.id.clone(), step.clone());
        Ok(())
    }

    async fn list_steps(&self, goal_id: &str) -> anyhow::Result<Vec<Step>> {
        Ok(self.state.read().await.steps_for(goal_id))
    }

    async fn insert_check_in(&self, check_in: &CheckIn) -> anyhow::Result<()> {
        self.state.write().await.insert_check_in(check_in)
    }

    async fn update_check_in(&self, check_in: &CheckIn) -> anyhow::Result<()> {
        self.state.write().await.update_check_in(check_in)
    }

    async fn get_check_in(&self, check_in_id: &str) -> anyhow::Result<Option<CheckIn>> {
        Ok(self
            .state
            .read()
            .await
            .check_ins
            .iter()
            .find(|c| c.id == check_in_id)
            .cloned())
    }

    async fn list_check_ins(&self, filter: &CheckInFilter, limit: usize) -> anyhow::Result<Vec<CheckIn>> {
        Ok(self.state.read().await.check_ins_where(filter, limit))
    }

    async fn append_ledger_entry(&self, entry: &PointsLedgerEntry) -> anyhow::Result<()> {
        self.state.write().await.ledger.push(entry.clone());
        Ok(())
    }

    async fn list_ledger_entries(
        &self,
        user_id: &str,
        category: Option<&str>,
    ) -> anyhow::Result<Vec<PointsLedgerEntry>> {
        Ok(self.state.read().await.ledger_for(user_id, category))
    }

    async fn commit_completion(&self, commit: &CompletionCommit) -> anyhow::Result<()> {
        self.state.write().await.apply_completion(commit)
    }

    async fn commit_skip(&self, commit: &SkipCommit) -> anyhow::Result<()> {
        self.state.write().await.apply_skip(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn check_in(id: &str, step: &str, minutes: i64) -> CheckIn {
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes);
        CheckIn {
            id: id.into(),
            goal_id: "g1".into(),
            step_id: step.into(),
            user_id: "u1".into(),
            quality_rating: 3,
            independence_level: 3,
            time_spent_minutes: None,
            confidence_before: None,
            confidence_after: None,
            notes: None,
            helper_present: false,
            helper_id: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn check_ins_newest_first_with_limit() {
        let store = MemoryStore::new();
        store.insert_check_in(&check_in("a", "s1", 0)).await.unwrap();
        store.insert_check_in(&check_in("b", "s2", 10)).await.unwrap();
        store.insert_check_in(&check_in("c", "s1", 5)).await.unwrap();
        // Same timestamp as "c": inserted later, so it sorts first.
        store.insert_check_in(&check_in("d", "s1", 5)).await.unwrap();

        let all = store.list_check_ins(&CheckInFilter::Goal("g1".into()), 50).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "c", "a"]);

        let step = store.list_check_ins(&CheckInFilter::Step("s1".into()), 2).await.unwrap();
        let ids: Vec<&str> = step.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c"]);
    }

    #[tokio::test]
    async fn duplicate_ids_and_missing_updates_fail() {
        let store = MemoryStore::new();
        store.insert_check_in(&check_in("a", "s1", 0)).await.unwrap();
        assert!(store.insert_check_in(&check_in("a", "s1", 1)).await.is_err());
        assert!(store.update_check_in(&check_in("zz", "s1", 1)).await.is_err());
    }
}
