use crate::{Task, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Broker-specific handle used to acknowledge a delivery
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AckId(pub String);

impl std::fmt::Display for AckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One payload handed out by a broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub ack: AckId,
    pub payload: Vec<u8>,
}

/// What a single execution produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Success(Value),
    /// Serializable description of the failure
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Value stored as the task's `result`
    pub fn to_value(&self) -> Value {
        match self {
            Outcome::Success(value) => value.clone(),
            Outcome::Failure(error) => Value::String(error.clone()),
        }
    }
}

/// Message from a worker to the monitor describing one finished execution.
///
/// Carries the executed task descriptor so the monitor can persist it; the
/// descriptor's terminal fields are left untouched until the monitor writes them.
#[derive(Debug, Clone)]
pub struct ResultEnvelope {
    pub task: Task,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    /// Broker acknowledgement for the delivery this task came from
    pub ack: Option<AckId>,
}

impl ResultEnvelope {
    pub fn task_id(&self) -> TaskId {
        self.task.id
    }

    pub fn group(&self) -> Option<&str> {
        self.task.group.as_deref()
    }

    pub fn cached(&self) -> bool {
        self.task.cached
    }

    pub fn success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.stopped_at
    }

    /// Consume the envelope into the task record with its terminal fields written
    pub fn into_record(self) -> crate::Result<(Task, Option<AckId>)> {
        let ResultEnvelope {
            mut task,
            outcome,
            started_at,
            stopped_at,
            ack,
        } = self;
        task.finish(&outcome, started_at, stopped_at)?;
        Ok((task, ack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Signature;
    use serde_json::json;

    #[test]
    fn test_failure_outcome_is_string_result() {
        let outcome = Outcome::Failure("division by zero".to_string());
        assert!(!outcome.is_success());
        assert_eq!(outcome.to_value(), json!("division by zero"));
    }

    #[test]
    fn test_into_record_writes_terminal_fields() {
        let task = Task::builder(Signature::new("math.floor").arg(1.5))
            .group("g")
            .cached(true)
            .build()
            .unwrap();
        let now = Utc::now();
        let envelope = ResultEnvelope {
            task,
            outcome: Outcome::Success(json!(1)),
            started_at: now,
            stopped_at: now,
            ack: Some(AckId("7".to_string())),
        };

        assert_eq!(envelope.group(), Some("g"));
        assert!(envelope.cached() && envelope.success());

        let (record, ack) = envelope.into_record().unwrap();
        assert_eq!(record.success, Some(true));
        assert_eq!(record.result, Some(json!(1)));
        assert_eq!(record.stopped_at, Some(now));
        assert_eq!(ack, Some(AckId("7".to_string())));
    }
}
