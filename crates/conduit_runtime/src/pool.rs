//! Operation context pooling.

use crate::context::OperationContext;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of idle contexts kept for reuse.
    pub max_retained: usize,

    /// Number of contexts created up front.
    pub prewarm: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_retained: 64,
            prewarm: 0,
        }
    }
}

/// Pool counters.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Contexts created because the pool was empty (or by prewarming).
    pub created: AtomicUsize,

    /// Contexts handed out.
    pub rented: AtomicUsize,

    /// Contexts returned and kept for reuse.
    pub returned: AtomicUsize,

    /// Contexts returned while the pool was full.
    pub discarded: AtomicUsize,
}

/// A bounded, lock-free pool of [`OperationContext`]s.
///
/// Only [`OperationContextPool::release`] returns a context. A rented
/// context that is dropped instead is abandoned and never reused.
#[derive(Debug)]
pub struct OperationContextPool {
    contexts: ArrayQueue<OperationContext>,
    stats: PoolStats,
}

impl Default for OperationContextPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl OperationContextPool {
    pub fn new(config: PoolConfig) -> Self {
        let pool = Self {
            contexts: ArrayQueue::new(config.max_retained.max(1)),
            stats: PoolStats::default(),
        };
        for _ in 0..config.prewarm.min(config.max_retained) {
            pool.stats.created.fetch_add(1, Ordering::Relaxed);
            if pool.contexts.push(OperationContext::new()).is_err() {
                break;
            }
        }
        pool
    }

    /// Rents a context.
    pub fn get(&self) -> OperationContext {
        self.stats.rented.fetch_add(1, Ordering::Relaxed);
        self.contexts.pop().unwrap_or_else(|| {
            self.stats.created.fetch_add(1, Ordering::Relaxed);
            trace!("operation context pool empty, creating context");
            OperationContext::new()
        })
    }

    /// Resets a context and returns it to the pool.
    pub fn release(&self, mut context: OperationContext) {
        context.reset();
        if self.contexts.push(context).is_ok() {
            self.stats.returned.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of idle contexts.
    pub fn idle(&self) -> usize {
        self.contexts.len()
    }

    pub fn capacity(&self) -> usize {
        self.contexts.capacity()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}
