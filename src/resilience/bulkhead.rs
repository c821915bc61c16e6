//! Named semaphores bounding in-flight calls per dependency kind.

use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

use super::profile::DependencyKind;

/// A single bulkhead: a fixed-capacity semaphore plus a human name.
pub struct Bulkhead {
    name: &'static str,
    capacity: usize,
    semaphore: Semaphore,
}

impl Bulkhead {
    pub fn new(kind: DependencyKind) -> Self {
        let capacity = kind.bulkhead_capacity();
        Self {
            name: kind.as_str(),
            capacity,
            semaphore: Semaphore::new(capacity),
        }
    }

    /// Acquire a slot, suspending until one is free.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("bulkhead semaphore never closed")
    }

    /// Non-blocking probe used for invariant checks / metrics.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Process-wide bulkhead registry, one instance per dependency kind.
///
/// Mirrors the fallback rule from the source system: a lookup for an unknown
/// name falls back to the `llm` bulkhead rather than failing outright.
pub struct BulkheadRegistry {
    llm: Arc<Bulkhead>,
    rag: Arc<Bulkhead>,
    database: Arc<Bulkhead>,
    redis: Arc<Bulkhead>,
    http: Arc<Bulkhead>,
}

impl BulkheadRegistry {
    pub fn new() -> Self {
        Self {
            llm: Arc::new(Bulkhead::new(DependencyKind::Llm)),
            rag: Arc::new(Bulkhead::new(DependencyKind::Rag)),
            database: Arc::new(Bulkhead::new(DependencyKind::Database)),
            redis: Arc::new(Bulkhead::new(DependencyKind::Redis)),
            http: Arc::new(Bulkhead::new(DependencyKind::Http)),
        }
    }

    pub fn get(&self, kind: DependencyKind) -> Arc<Bulkhead> {
        match kind {
            DependencyKind::Llm => self.llm.clone(),
            DependencyKind::Rag => self.rag.clone(),
            DependencyKind::Database => self.database.clone(),
            DependencyKind::Redis => self.redis.clone(),
            DependencyKind::Http => self.http.clone(),
        }
    }
}

impl Default for BulkheadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bulkhead_bounds_in_flight_concurrency() {
        let bh = Bulkhead::new(DependencyKind::Database);
        assert_eq!(bh.available(), 50);
        let permit = bh.acquire().await;
        assert_eq!(bh.available(), 49);
        drop(permit);
        assert_eq!(bh.available(), 50);
    }
}
