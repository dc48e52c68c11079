//! Task registry - process-wide map of live tasks
//!
//! Mutations only happen from bus handlers (single-consumer dispatch), so the
//! registry itself is a plain map; the agent wraps it in a tokio Mutex for
//! the spawned cognitive stages that outlive their handler.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

use super::fsm::TaskFsm;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("task {0} already registered")]
    Duplicate(String),
}

/// The registry as shared by the agent, the persister, and spawned stages
pub type SharedRegistry = std::sync::Arc<tokio::sync::Mutex<TaskRegistry>>;

/// Process-wide map of tasks
///
/// COMPLETED tasks stay registered indefinitely so they can be resumed;
/// FAILED tasks stay until explicitly cleaned.
pub struct TaskRegistry {
    tasks: HashMap<String, TaskFsm>,
    /// Soft cap on non-terminal tasks; exceeded only logs a warning
    max_active: usize,
}

impl TaskRegistry {
    pub fn new(max_active: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            max_active,
        }
    }

    /// Register a task; duplicate IDs are rejected, never overwritten
    pub fn insert(&mut self, fsm: TaskFsm) -> Result<(), RegistryError> {
        if self.tasks.contains_key(&fsm.task_id) {
            return Err(RegistryError::Duplicate(fsm.task_id.clone()));
        }

        let active = self.active_count();
        if active >= self.max_active {
            warn!(
                active,
                max_active = self.max_active,
                task_id = %fsm.task_id,
                "active task count exceeds soft cap"
            );
        }

        debug!(task_id = %fsm.task_id, "registering task");
        self.tasks.insert(fsm.task_id.clone(), fsm);
        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskFsm> {
        self.tasks.get(task_id)
    }

    pub fn get_mut(&mut self, task_id: &str) -> Option<&mut TaskFsm> {
        self.tasks.get_mut(task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    /// Remove a task, e.g. cleaning a FAILED entry
    pub fn remove(&mut self, task_id: &str) -> Option<TaskFsm> {
        self.tasks.remove(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Count of tasks in a non-terminal, non-completed state
    pub fn active_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| !matches!(t.state, super::fsm::TaskState::Completed | super::fsm::TaskState::Failed))
            .count()
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }
}
