use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use taskq_core::{Kwargs, Value};

/// Result type for task handlers
pub type HandlerResult = Result<Value, String>;

/// Trait for task handlers
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute the task with its positional and keyword arguments
    async fn execute(&self, args: &[Value], kwargs: &Kwargs) -> HandlerResult;
}

/// Adapter running a plain function as a handler
pub struct FnHandler<F> {
    func: F,
}

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(&[Value], &Kwargs) -> HandlerResult + Send + Sync,
{
    async fn execute(&self, args: &[Value], kwargs: &Kwargs) -> HandlerResult {
        (self.func)(args, kwargs)
    }
}

/// Registry mapping function names to handlers, populated at startup
pub struct TaskRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        TaskRegistry {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Registry preloaded with the bundled handlers
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        register_builtins(&registry);
        registry
    }

    /// Register a handler under `name`, replacing any previous one
    pub fn register<H: TaskHandler + 'static>(&self, name: impl Into<String>, handler: H) {
        self.handlers.write().insert(name.into(), Arc::new(handler));
    }

    pub fn register_fn<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(&[Value], &Kwargs) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(name, FnHandler { func });
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(name).cloned()
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns its arguments: a single argument as-is, several as a list
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn execute(&self, args: &[Value], _kwargs: &Kwargs) -> HandlerResult {
        match args {
            [single] => Ok(single.clone()),
            _ => Ok(Value::Array(args.to_vec())),
        }
    }
}

/// Sleeps for `args[0]` milliseconds (or its default), then returns the duration
pub struct SleepHandler {
    default_ms: u64,
}

impl SleepHandler {
    pub fn new(default_ms: u64) -> Self {
        SleepHandler { default_ms }
    }
}

#[async_trait]
impl TaskHandler for SleepHandler {
    async fn execute(&self, args: &[Value], _kwargs: &Kwargs) -> HandlerResult {
        let ms = args.first().and_then(Value::as_u64).unwrap_or(self.default_ms);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(Value::from(ms))
    }
}

fn number(args: &[Value], index: usize, func: &str) -> Result<f64, String> {
    args.get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("{} expects a number at position {}", func, index))
}

fn floor(args: &[Value], _kwargs: &Kwargs) -> HandlerResult {
    if args.len() != 1 {
        return Err(format!("math.floor takes 1 argument ({} given)", args.len()));
    }
    let x = number(args, 0, "math.floor")?;
    Ok(Value::from(x.floor() as i64))
}

fn copysign(args: &[Value], _kwargs: &Kwargs) -> HandlerResult {
    if args.len() != 2 {
        return Err(format!(
            "math.copysign takes 2 arguments ({} given)",
            args.len()
        ));
    }
    let x = number(args, 0, "math.copysign")?;
    let y = number(args, 1, "math.copysign")?;
    Ok(Value::from(x.copysign(y)))
}

fn hello(_args: &[Value], _kwargs: &Kwargs) -> HandlerResult {
    Ok(Value::from("hello"))
}

/// Register the bundled handlers used by the cluster binary and the tests
pub fn register_builtins(registry: &TaskRegistry) {
    registry.register("echo", EchoHandler);
    registry.register("sleep", SleepHandler::new(1000));
    registry.register_fn("math.floor", floor);
    registry.register_fn("math.copysign", copysign);
    registry.register_fn("hello", hello);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_handler() {
        let handler = EchoHandler;
        let kwargs = Kwargs::new();

        assert_eq!(handler.execute(&[json!("a")], &kwargs).await.unwrap(), json!("a"));
        assert_eq!(
            handler.execute(&[json!(1), json!(2)], &kwargs).await.unwrap(),
            json!([1, 2])
        );
    }

    #[tokio::test]
    async fn test_registry() {
        let registry = TaskRegistry::with_builtins();

        assert!(registry.has_handler("math.floor"));
        assert!(!registry.has_handler("math.popysign"));

        let handler = registry.get("math.copysign").unwrap();
        let result = handler
            .execute(&[json!(1), json!(-1)], &Kwargs::new())
            .await
            .unwrap();
        assert_eq!(result, json!(-1.0));
    }

    #[tokio::test]
    async fn test_math_argument_errors() {
        let registry = TaskRegistry::with_builtins();
        let floor = registry.get("math.floor").unwrap();

        assert_eq!(
            floor.execute(&[json!(2.7)], &Kwargs::new()).await.unwrap(),
            json!(2)
        );
        assert!(floor.execute(&[], &Kwargs::new()).await.is_err());
        assert!(floor
            .execute(&[json!("x")], &Kwargs::new())
            .await
            .unwrap_err()
            .contains("expects a number"));
    }

    #[test]
    fn test_register_fn_replaces() {
        let registry = TaskRegistry::new();
        registry.register_fn("f", |_, _| Ok(json!(1)));
        registry.register_fn("f", |_, _| Ok(json!(2)));
        assert_eq!(registry.task_names(), vec!["f".to_string()]);
    }
}
