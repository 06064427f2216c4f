//! Research task records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Active,
    Stopped,
}

/// A research task: one immutable hypothesis plus a resource budget.
///
/// Tasks are never destroyed; `stop_task` archives them in place.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub hypothesis: String,
    pub status: TaskStatus,
    /// Budget in fetch units at creation time.
    pub budget_initial: i64,
    /// Remaining fetch units; decremented per completed fetch.
    pub budget_remaining: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(hypothesis: impl Into<String>, budget: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            hypothesis: hypothesis.into(),
            status: TaskStatus::Active,
            budget_initial: budget,
            budget_remaining: budget,
            created_at: now,
            updated_at: now,
        }
    }

    /// Remaining budget as a 0..=100 percentage for status payloads.
    pub fn budget_remaining_percent(&self) -> i64 {
        if self.budget_initial <= 0 {
            return 0;
        }
        (self.budget_remaining.max(0) * 100) / self.budget_initial
    }

    pub fn is_stopped(&self) -> bool {
        self.status == TaskStatus::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_active_with_full_budget() {
        let task = Task::new("X improves Y", 200);
        assert_eq!(task.status, TaskStatus::Active);
        assert_eq!(task.budget_remaining_percent(), 100);
    }

    #[test]
    fn budget_percent_rounds_down() {
        let mut task = Task::new("X improves Y", 3);
        task.budget_remaining = 1;
        assert_eq!(task.budget_remaining_percent(), 33);
    }

    #[test]
    fn exhausted_budget_is_zero_percent() {
        let mut task = Task::new("X improves Y", 10);
        task.budget_remaining = 0;
        assert_eq!(task.budget_remaining_percent(), 0);
    }
}
