//! Task id to inbox routing.

use crate::envelope::InboxItem;
use crate::error::CoreError;
use crate::inbox::{TaskId, TaskInbox};
use dashmap::DashMap;
use std::sync::Arc;

/// Registered task inboxes.
#[derive(Debug, Default)]
pub struct TaskRouter {
    inboxes: DashMap<TaskId, Arc<TaskInbox>>,
}

impl TaskRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the inbox for a task.
    pub fn register(&self, task_id: TaskId, capacity: usize) -> Result<Arc<TaskInbox>, CoreError> {
        use dashmap::mapref::entry::Entry;

        match self.inboxes.entry(task_id) {
            Entry::Occupied(_) => Err(CoreError::TaskExists(task_id)),
            Entry::Vacant(slot) => {
                let inbox = Arc::new(TaskInbox::new(task_id, capacity));
                slot.insert(Arc::clone(&inbox));
                tracing::debug!("registered task {}", task_id);
                Ok(inbox)
            }
        }
    }

    pub fn unregister(&self, task_id: TaskId) -> Option<Arc<TaskInbox>> {
        self.inboxes.remove(&task_id).map(|(_, inbox)| inbox)
    }

    pub fn get(&self, task_id: TaskId) -> Option<Arc<TaskInbox>> {
        self.inboxes.get(&task_id).map(|e| Arc::clone(e.value()))
    }

    /// Hands an item to a task's inbox.
    pub fn deliver(&self, task_id: TaskId, item: InboxItem) -> Result<(), CoreError> {
        let inbox = self.get(task_id).ok_or(CoreError::TaskNotFound(task_id))?;
        inbox.push(item)
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.inboxes.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }
}
