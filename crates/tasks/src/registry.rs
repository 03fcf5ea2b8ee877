use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use shipq_core::{QueueError, QueueResult};

use crate::payload::TaskPayload;
use crate::task::Task;

/// Rebuilds one task type from its stored state.
pub type TaskFactory = Box<dyn Fn(JsonValue) -> QueueResult<Box<dyn Task>> + Send + Sync>;

/// Closed discriminator → factory table.
///
/// Unknown discriminators fail with `QueueError::Deserialization`; an item is
/// never silently dropped because its task cannot be rebuilt.
#[derive(Default)]
pub struct TaskRegistry {
    factories: BTreeMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task whose whole state is its serde representation.
    pub fn register<T>(&mut self, task_type: &str) -> &mut Self
    where
        T: Task + DeserializeOwned + 'static,
    {
        let name = task_type.to_string();
        self.register_with(task_type, move |payload| {
            let task: T = serde_json::from_value(payload)
                .map_err(|e| QueueError::deserialization(format!("task {name}: {e}")))?;
            Ok(Box::new(task) as Box<dyn Task>)
        })
    }

    /// Register a task that needs collaborators beyond its serialized state.
    pub fn register_with<F>(&mut self, task_type: &str, factory: F) -> &mut Self
    where
        F: Fn(JsonValue) -> QueueResult<Box<dyn Task>> + Send + Sync + 'static,
    {
        self.factories.insert(task_type.to_string(), Box::new(factory));
        self
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.factories.contains_key(task_type)
    }

    pub fn task_types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn restore(&self, payload: &TaskPayload) -> QueueResult<Box<dyn Task>> {
        let factory = self.factories.get(&payload.task_type).ok_or_else(|| {
            QueueError::deserialization(format!("unknown task type: {}", payload.task_type))
        })?;
        factory(payload.payload.clone())
    }
}

impl core::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("task_types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::error::TaskError;
    use crate::task::TaskContext;

    #[derive(Debug, Serialize, Deserialize)]
    struct CountTask {
        upto: u32,
        done: u32,
    }

    impl Task for CountTask {
        fn task_type(&self) -> &'static str {
            "CountTask"
        }

        fn to_payload(&self) -> Result<JsonValue, TaskError> {
            Ok(serde_json::to_value(self)?)
        }

        fn execute(&mut self, ctx: &mut dyn TaskContext) -> Result<(), TaskError> {
            while self.done < self.upto {
                self.done += 1;
                ctx.checkpoint(self.done * 10_000 / self.upto, self.to_payload()?)?;
            }
            Ok(())
        }
    }

    struct Recorder {
        progress: Vec<u32>,
        states: Vec<JsonValue>,
    }

    impl TaskContext for Recorder {
        fn report_progress(&mut self, base_points: u32) -> Result<(), TaskError> {
            self.progress.push(base_points);
            Ok(())
        }

        fn checkpoint(&mut self, base_points: u32, state: JsonValue) -> Result<(), TaskError> {
            self.progress.push(base_points);
            self.states.push(state);
            Ok(())
        }

        fn report_alive(&mut self) -> Result<(), TaskError> {
            Ok(())
        }

        fn context(&self) -> &str {
            ""
        }

        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    #[test]
    fn restores_registered_tasks_with_their_state() {
        let mut registry = TaskRegistry::new();
        registry.register::<CountTask>("CountTask");

        let payload = TaskPayload::of(&CountTask { upto: 4, done: 2 }).unwrap();
        let mut task = registry.restore(&payload).unwrap();

        let mut ctx = Recorder {
            progress: vec![],
            states: vec![],
        };
        task.execute(&mut ctx).unwrap();
        assert_eq!(ctx.progress, vec![7_500, 10_000]);
        assert_eq!(ctx.states.len(), 2);
        assert_eq!(ctx.states[1]["done"], 4);
    }

    #[test]
    fn unknown_type_fails_fast() {
        let registry = TaskRegistry::new();
        let err = registry
            .restore(&TaskPayload::new("Vanished", JsonValue::Null))
            .err()
            .unwrap();
        assert!(matches!(err, QueueError::Deserialization(msg) if msg.contains("Vanished")));
    }

    #[test]
    fn malformed_state_is_a_deserialization_error() {
        let mut registry = TaskRegistry::new();
        registry.register::<CountTask>("CountTask");

        let err = registry
            .restore(&TaskPayload::new("CountTask", serde_json::json!({"upto": "x"})))
            .err()
            .unwrap();
        assert!(matches!(err, QueueError::Deserialization(_)));
    }
}
