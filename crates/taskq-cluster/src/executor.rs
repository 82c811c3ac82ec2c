use crate::handler::TaskRegistry;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use taskq_core::{Outcome, Task, TaskError};
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// What running a task produced, with its execution window
#[derive(Debug, Clone)]
pub struct Execution {
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
}

/// Resolves a task's function and runs it with timeout and panic capture
#[derive(Clone)]
pub struct TaskExecutor {
    registry: Arc<TaskRegistry>,
}

impl TaskExecutor {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        TaskExecutor { registry }
    }

    /// Execute a task. Every failure mode is returned as `Outcome::Failure`.
    pub async fn execute(&self, task: &Task) -> Execution {
        let started_at = Utc::now();
        let outcome = self.run(task).await;
        Execution {
            outcome,
            started_at,
            stopped_at: Utc::now(),
        }
    }

    async fn run(&self, task: &Task) -> Outcome {
        let task_id = task.id;

        let handler = match self.registry.get(&task.func) {
            Some(handler) => handler,
            None => {
                error!("No handler registered for {} (task {})", task.func, task_id);
                return Outcome::Failure(TaskError::UnknownTask(task.func.clone()).to_string());
            }
        };

        let timeout_duration = task.timeout();
        debug!("Executing task {} ({}) with timeout {:?}", task_id, task.func, timeout_duration);

        let args = task.args.clone();
        let kwargs = task.kwargs.clone();
        let mut running = tokio::spawn(async move { handler.execute(&args, &kwargs).await });

        match timeout(timeout_duration, &mut running).await {
            Ok(Ok(Ok(value))) => Outcome::Success(value),
            Ok(Ok(Err(e))) => {
                warn!("Task {} ({}) failed: {}", task_id, task.func, e);
                Outcome::Failure(e)
            }
            Ok(Err(e)) if e.is_panic() => {
                error!("Task {} ({}) panicked", task_id, task.func);
                Outcome::Failure(format!("{} panicked: {}", task.func, panic_message(e)))
            }
            Ok(Err(_)) => {
                error!("Task {} was cancelled", task_id);
                Outcome::Failure("Task was cancelled".to_string())
            }
            Err(_) => {
                running.abort();
                error!("Task {} timed out after {:?}", task_id, timeout_duration);
                Outcome::Failure(format!(
                    "Task execution timed out after {:?}",
                    timeout_duration
                ))
            }
        }
    }
}

fn panic_message(error: tokio::task::JoinError) -> String {
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::register_builtins;
    use serde_json::json;
    use taskq_core::Signature;

    fn executor() -> TaskExecutor {
        let registry = TaskRegistry::new();
        register_builtins(&registry);
        registry.register_fn("explode", |_, _| panic!("kaboom"));
        TaskExecutor::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_executor_success() {
        let task = Task::new(Signature::new("math.copysign").arg(1).arg(-1));

        let execution = executor().execute(&task).await;
        assert_eq!(execution.outcome, Outcome::Success(json!(-1.0)));
        assert!(execution.stopped_at >= execution.started_at);
    }

    #[tokio::test]
    async fn test_unknown_function_is_captured() {
        let task = Task::new(Signature::new("math.popysign").arg(1).arg(-1));

        match executor().execute(&task).await.outcome {
            Outcome::Failure(message) => assert!(message.contains("math.popysign")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let task = Task::new(Signature::new("explode"));

        match executor().execute(&task).await.outcome {
            Outcome::Failure(message) => assert!(message.contains("kaboom")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_executor_timeout() {
        let task = Task::builder(Signature::new("sleep").arg(2000))
            .timeout_ms(Some(200))
            .build()
            .unwrap();

        match executor().execute(&task).await.outcome {
            Outcome::Failure(message) => assert!(message.contains("timed out")),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
