//! The worker pool dispatching kernels to optimization tasks.
//!
//! One task per kernel method: tasks share the read-only module but own
//! their method exclusively, so no synchronization beyond the barrier at
//! the end is needed.

use log::warn;
use rayon::prelude::*;

use crate::error::Result;

/// A bounded worker pool with barrier-semantics dispatch.
pub struct ThreadPool {
    pool: Option<rayon::ThreadPool>,
}

impl ThreadPool {
    /// Creates a pool whose worker threads carry `name` in their thread
    /// names.
    ///
    /// If the dedicated pool cannot be created (resource exhaustion), the
    /// global pool is used instead.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let name = name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .thread_name(move |index| format!("{name}-{index}"))
            .build();
        match pool {
            Ok(pool) => Self { pool: Some(pool) },
            Err(error) => {
                warn!("Failed to create dedicated thread pool, falling back to the global pool: {error}");
                Self { pool: None }
            }
        }
    }

    /// Runs `task` on every item concurrently and waits for all of them.
    ///
    /// # Errors
    ///
    /// The first error produced by any task, after all tasks finished or
    /// were cancelled by rayon's error propagation.
    pub fn schedule_all<T, F>(&self, items: &mut [T], task: F) -> Result<()>
    where
        T: Send,
        F: Fn(&mut T) -> Result<()> + Send + Sync,
    {
        let mut run = || items.par_iter_mut().try_for_each(|item| task(item));
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}
