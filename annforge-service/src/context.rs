// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Execution contexts
//!
//! A construction call runs either on the ambient rayon pool or inside a
//! dedicated pool sized by the caller's thread hint. Pools are built once per
//! size and shared through a small bounded cache. Nothing global is
//! reconfigured, so concurrent calls with different hints never interfere.

use annforge_core::config::DEFAULT_MAX_POOLS;
use annforge_core::{AnnError, AnnResult};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashMap;
use std::sync::Arc;

/// Where the parallel parts of a call run
#[derive(Debug, Clone, Default)]
pub enum ExecutionContext {
    /// Whatever pool the caller is already on
    #[default]
    Ambient,
    /// A dedicated pool
    Pool(Arc<ThreadPool>),
}

impl ExecutionContext {
    pub fn ambient() -> Self {
        ExecutionContext::Ambient
    }

    /// Build a fresh pool of `threads` workers; zero means ambient
    pub fn with_threads(threads: usize) -> AnnResult<Self> {
        if threads == 0 {
            return Ok(ExecutionContext::Ambient);
        }
        Ok(ExecutionContext::Pool(Arc::new(build_pool(threads)?)))
    }

    /// Workers available to this context
    pub fn threads(&self) -> usize {
        match self {
            ExecutionContext::Ambient => rayon::current_num_threads(),
            ExecutionContext::Pool(pool) => pool.current_num_threads(),
        }
    }

    /// Run `f` inside this context, keeping the caller's tracing span
    pub fn run<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match self {
            ExecutionContext::Ambient => f(),
            ExecutionContext::Pool(pool) => {
                let span = tracing::Span::current();
                pool.install(move || span.in_scope(f))
            }
        }
    }
}

fn build_pool(threads: usize) -> AnnResult<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("annforge-{}-{}", threads, i))
        .build()
        .map_err(|e| AnnError::Execution(format!("failed to build {} thread pool: {}", threads, e)))
}

#[derive(Debug)]
struct CachedPool {
    pool: Arc<ThreadPool>,
    last_used: u64,
}

#[derive(Debug, Default)]
struct PoolSet {
    pools: HashMap<usize, CachedPool>,
    clock: u64,
}

/// Pools keyed by size, created on first use.
///
/// Hints above `max_threads` are clamped. At most `max_pools` pools stay
/// cached; the least recently used one is dropped to make room, and callers
/// still running on it keep it alive until they finish.
#[derive(Debug)]
pub struct PoolCache {
    pools: Mutex<PoolSet>,
    max_threads: usize,
    max_pools: usize,
}

impl Default for PoolCache {
    fn default() -> Self {
        let max_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_limits(max_threads, DEFAULT_MAX_POOLS)
    }
}

impl PoolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_threads: usize, max_pools: usize) -> Self {
        Self {
            pools: Mutex::new(PoolSet::default()),
            max_threads: max_threads.max(1),
            max_pools: max_pools.max(1),
        }
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Context for a thread hint; zero is ambient
    pub fn context(&self, threads: usize) -> AnnResult<ExecutionContext> {
        if threads == 0 {
            return Ok(ExecutionContext::Ambient);
        }
        let threads = if threads > self.max_threads {
            tracing::warn!(
                requested = threads,
                max_threads = self.max_threads,
                "Thread hint above limit, clamping"
            );
            self.max_threads
        } else {
            threads
        };

        let mut set = self.pools.lock();
        set.clock += 1;
        let now = set.clock;
        if let Some(cached) = set.pools.get_mut(&threads) {
            cached.last_used = now;
            return Ok(ExecutionContext::Pool(Arc::clone(&cached.pool)));
        }

        while set.pools.len() >= self.max_pools {
            let oldest = set
                .pools
                .iter()
                .min_by_key(|(_, cached)| cached.last_used)
                .map(|(&size, _)| size);
            match oldest {
                Some(size) => {
                    set.pools.remove(&size);
                    tracing::debug!(threads = size, "Evicted worker pool");
                }
                None => break,
            }
        }

        let pool = Arc::new(build_pool(threads)?);
        tracing::debug!(threads, "Created worker pool");
        set.pools.insert(
            threads,
            CachedPool {
                pool: Arc::clone(&pool),
                last_used: now,
            },
        );
        Ok(ExecutionContext::Pool(pool))
    }

    /// Number of cached pools
    pub fn len(&self) -> usize {
        self.pools.lock().pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_runs_with_requested_threads() {
        let context = ExecutionContext::with_threads(3).unwrap();
        assert_eq!(context.run(rayon::current_num_threads), 3);
        assert_eq!(context.threads(), 3);
    }

    #[test]
    fn test_zero_is_ambient() {
        assert!(matches!(
            ExecutionContext::with_threads(0).unwrap(),
            ExecutionContext::Ambient
        ));
        assert_eq!(ExecutionContext::ambient().run(|| 7), 7);
    }

    #[test]
    fn test_cache_reuses_pools() {
        let cache = PoolCache::with_limits(4, 4);
        let a = cache.context(2).unwrap();
        let b = cache.context(2).unwrap();
        let _ = cache.context(4).unwrap();
        match (a, b) {
            (ExecutionContext::Pool(a), ExecutionContext::Pool(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("expected dedicated pools"),
        }
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_concurrent_hints_do_not_interfere() {
        let cache = Arc::new(PoolCache::with_limits(4, 4));
        let handles: Vec<_> = [1usize, 2, 3, 4]
            .into_iter()
            .map(|threads| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let context = cache.context(threads).unwrap();
                    context.run(rayon::current_num_threads)
                })
            })
            .collect();
        let seen: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_large_hint_is_clamped() {
        let cache = PoolCache::with_limits(2, 4);
        let clamped = cache.context(10_000).unwrap();
        assert_eq!(clamped.threads(), 2);
        assert_eq!(clamped.run(rayon::current_num_threads), 2);

        let exact = cache.context(2).unwrap();
        match (clamped, exact) {
            (ExecutionContext::Pool(a), ExecutionContext::Pool(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("expected dedicated pools"),
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_stays_bounded() {
        let cache = PoolCache::with_limits(16, 2);
        for threads in 1..=16 {
            let context = cache.context(threads).unwrap();
            assert_eq!(context.threads(), threads);
            assert!(cache.len() <= 2);
        }

        // 16 was used last, so it survived the evictions
        let again = cache.context(16).unwrap();
        let fresh = cache.context(16).unwrap();
        match (again, fresh) {
            (ExecutionContext::Pool(a), ExecutionContext::Pool(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("expected dedicated pools"),
        }
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_evicted_pool_outlives_its_users() {
        let cache = PoolCache::with_limits(4, 1);
        let held = cache.context(3).unwrap();
        let _ = cache.context(4).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(held.run(rayon::current_num_threads), 3);
    }
}
