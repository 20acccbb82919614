#![allow(dead_code, reason = "Each test binary uses a different subset.")]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use echo_prompt::{
    AiJudge, Context, ContextError, ContextResolver, Echo, EchoConfig, OperatorError,
    ResolvedContent,
};
use rand::Rng;
use serde_json::Value;

pub fn get_engine() -> Echo {
    Echo::new()
}

pub fn get_strict_engine() -> Echo {
    Echo::new().with_config(EchoConfig::default().strict(true))
}

pub fn context(value: Value) -> Context {
    Context::from_value(value).expect("context fixtures are JSON objects")
}

pub fn generate_random_whitespace() -> String {
    let mut rng = rand::rng();
    let length = rng.random_range(0..10);
    (0..length).map(|_| ' ').collect()
}

pub fn generate_random_whitespace_at_least_one() -> String {
    let mut rng = rand::rng();
    let length = rng.random_range(1..10);
    (0..length).map(|_| ' ').collect()
}

/// An AI judge that answers "does the value contain the question text",
/// counting calls and how many were in flight at once.
#[derive(Default)]
pub struct CountingJudge {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl CountingJudge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiJudge for CountingJudge {
    async fn judge(&self, value: &Value, question: &str) -> Result<bool, OperatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let text = value.as_str().unwrap_or_default().to_lowercase();
        Ok(text.contains(&question.to_lowercase()))
    }
}

/// A context resolver backed by a map, counting lookups.
#[derive(Default)]
pub struct MemoryResolver {
    assets: HashMap<String, ResolvedContent>,
    calls: AtomicUsize,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, content: ResolvedContent) -> Self {
        self.assets.insert(path.to_owned(), content);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextResolver for MemoryResolver {
    async fn resolve(&self, path: &str) -> Result<ResolvedContent, ContextError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if path.contains("..") {
            return Err(ContextError::InvalidPath(path.to_owned()));
        }
        self.assets
            .get(path)
            .cloned()
            .ok_or_else(|| ContextError::NotFound(path.to_owned()))
    }
}
