//! Fixed-size worker pool with ordered result assembly

use ml_resample_core::ExecutionConfig;
#[cfg(feature = "threadpool")]
use rayon::prelude::*;
use tracing::debug;

#[cfg(feature = "threadpool")]
use crate::error::Error;
use crate::error::Result;

/// Runs independent units either in order or on a rayon pool
///
/// Results always come back in input order, whatever order the units
/// complete in.
pub struct WorkerPool {
    workers: usize,
    #[cfg(feature = "threadpool")]
    pool: Option<rayon::ThreadPool>,
}

impl WorkerPool {
    /// Pool matching `config`; sequential configs get no threads
    pub fn new(config: &ExecutionConfig) -> Result<Self> {
        config.validate()?;
        let workers = config.effective_workers();

        #[cfg(feature = "threadpool")]
        {
            let pool = if config.parallel && workers > 1 {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("ml-resample-worker-{}", i))
                    .build()
                    .map_err(|e| Error::WorkerPool(e.to_string()))?;
                debug!(workers, "worker pool started");
                Some(pool)
            } else {
                None
            };
            Ok(Self { workers, pool })
        }

        #[cfg(not(feature = "threadpool"))]
        {
            if config.parallel {
                debug!("built without threadpool support, running sequentially");
            }
            Ok(Self { workers: 1 })
        }
    }

    /// Sequential pool
    pub fn sequential() -> Self {
        Self {
            workers: 1,
            #[cfg(feature = "threadpool")]
            pool: None,
        }
    }

    /// Number of units that may run at once
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `f` to every item, returning results by input position
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> R + Sync + Send,
    {
        #[cfg(feature = "threadpool")]
        if let Some(pool) = &self.pool {
            return pool.install(|| {
                items
                    .par_iter()
                    .enumerate()
                    .map(|(i, item)| f(i, item))
                    .collect()
            });
        }

        items.iter().enumerate().map(|(i, item)| f(i, item)).collect()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}
