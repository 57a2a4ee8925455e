//! Bounded goal id -> goal type cache, owned by one collector session.

use std::collections::{HashMap, VecDeque};

use crate::goal::GoalType;

#[derive(Debug, Clone)]
pub struct GoalTypeCache {
    capacity: usize,
    entries: HashMap<String, GoalType>,
    // Insertion order for eviction.
    order: VecDeque<String>,
}

impl GoalTypeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, goal_id: &str) -> Option<GoalType> {
        self.entries.get(goal_id).copied()
    }

    pub fn insert(&mut self, goal_id: impl Into<String>, goal_type: GoalType) {
        if self.capacity == 0 {
            return;
        }
        let goal_id = goal_id.into();
        if self.entries.insert(goal_id.clone(), goal_type).is_some() {
            return;
        }
        self.order.push_back(goal_id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn invalidate(&mut self, goal_id: &str) {
        if self.entries.remove(goal_id).is_some() {
            self.order.retain(|id| id != goal_id);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
