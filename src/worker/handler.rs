//! Task-type-keyed handler registry: the "dynamic dispatch is a map from
//! tag to strategy" pattern applied to worker task handlers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::queue::Task;

pub type HandlerResult = Result<Option<serde_json::Value>, anyhow::Error>;
pub type BoxedHandler =
    Box<dyn Fn(Task) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync>;

pub trait HandlerFn: Fn(Task) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync {}
impl<F> HandlerFn for F where F: Fn(Task) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync {}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, BoxedHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a task type. `f` must return a boxed,
    /// pinned future — callers typically write `|task| Box::pin(async
    /// move { ... })`.
    pub fn register<F, Fut>(&mut self, task_type: impl Into<String>, f: F)
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let boxed: BoxedHandler = Box::new(move |task| Box::pin(f(task)));
        self.handlers.insert(task_type.into(), boxed);
    }

    pub fn get(&self, task_type: &str) -> Option<&BoxedHandler> {
        self.handlers.get(task_type)
    }
}
