use std::collections::HashMap;
use std::sync::Arc;

use crate::app::{Pipeline, TaskHandler};
use crate::domain::TaskType;
use crate::error::BuildError;

/// task type -> handler.
///
/// Filled in while building, read-only once the server runs, so lookups
/// need no lock.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), BuildError> {
        if self.handlers.contains_key(&task_type) {
            return Err(BuildError::DuplicateHandler(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &TaskType) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type)
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.keys().any(|t| t.as_str() == task_type)
    }

    /// Registered task types, sorted.
    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Wrap every handler in `pipeline`.
    pub fn with_pipeline(self, pipeline: &Pipeline) -> Self {
        let handlers = self
            .handlers
            .into_iter()
            .map(|(task_type, handler)| (task_type, pipeline.apply(handler)))
            .collect();
        Self { handlers }
    }
}
