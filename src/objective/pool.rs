//! Fixed-size worker pool with per-worker problem context.
//!
//! The context is handed to each worker exactly once, by the pool's start
//! handler, and kept in a thread-local slot. Objective calls then only send the
//! parameter vector to the workers and get one scalar back per focus plane.

use crate::objective::ProblemContext;
use crate::optimization::OptimizationError;
use log::debug;
use rayon::prelude::*;
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static WORKER_CONTEXT: RefCell<Option<Arc<ProblemContext>>> = const { RefCell::new(None) };
}

fn install_worker_context(context: Arc<ProblemContext>) {
    WORKER_CONTEXT.with(|slot| *slot.borrow_mut() = Some(context));
}

fn clear_worker_context() {
    WORKER_CONTEXT.with(|slot| {
        slot.borrow_mut().take();
    });
}

/// Runs `f` against the context installed on the current worker thread.
fn with_worker_context<R>(
    f: impl FnOnce(&ProblemContext) -> Result<R, OptimizationError>,
) -> Result<R, OptimizationError> {
    WORKER_CONTEXT.with(|slot| match slot.borrow().as_deref() {
        Some(context) => f(context),
        None => Err(OptimizationError::WorkerState(format!(
            "thread {:?} was not initialized by the pool",
            std::thread::current().name()
        ))),
    })
}

/// Logical cores minus one, at least one.
pub fn default_pool_size() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// Rayon thread pool whose workers each hold the run's [`ProblemContext`].
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
    planes: usize,
}

impl WorkerPool {
    /// Spawns `threads` workers and installs `context` on each of them.
    ///
    /// # Errors
    ///
    /// * [`OptimizationError::InvalidOptions`] if `threads` is zero.
    /// * [`OptimizationError::Pool`] if the threads cannot be created.
    pub fn spawn(context: &Arc<ProblemContext>, threads: usize) -> Result<Self, OptimizationError> {
        if threads == 0 {
            return Err(OptimizationError::InvalidOptions(
                "worker pool needs at least one thread".to_string(),
            ));
        }
        let broadcast = Arc::clone(context);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("wavefront-worker-{index}"))
            .start_handler(move |_| install_worker_context(Arc::clone(&broadcast)))
            .exit_handler(|_| clear_worker_context())
            .build()
            .map_err(|e| OptimizationError::Pool(e.to_string()))?;
        debug!("Spawned worker pool with {threads} threads");
        Ok(WorkerPool {
            pool,
            threads,
            planes: context.planes(),
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Evaluates every focus plane on the workers; costs come back in plane order.
    pub fn evaluate_planes(&self, params: &[f64]) -> Result<Vec<f64>, OptimizationError> {
        let planes = self.planes;
        self.pool.install(|| {
            (0..planes)
                .into_par_iter()
                .map(|plane| with_worker_context(|context| context.evaluate_plane(params, plane)))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostPipeline;
    use crate::objective::testing::spherical_context;

    #[test]
    fn test_pool_evaluates_every_plane() {
        let context = Arc::new(spherical_context(&[0.0, 0.125, 0.0, 0.0], CostPipeline::default()));
        let pool = WorkerPool::spawn(&context, 2).unwrap();
        let params = [0.02, 0.1, 0.0, 0.0];
        let costs = pool.evaluate_planes(&params).unwrap();
        assert_eq!(costs.len(), context.planes());
        for (plane, cost) in costs.iter().enumerate() {
            assert_eq!(*cost, context.evaluate_plane(&params, plane).unwrap());
        }
    }

    #[test]
    fn test_uninitialized_thread_reports_worker_state() {
        let result = with_worker_context(|_| Ok(()));
        assert!(matches!(result, Err(OptimizationError::WorkerState(_))));
        assert!(result.unwrap_err().is_transient());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let context = Arc::new(spherical_context(&[0.0, 0.125, 0.0, 0.0], CostPipeline::default()));
        assert!(matches!(
            WorkerPool::spawn(&context, 0),
            Err(OptimizationError::InvalidOptions(_))
        ));
        assert!(default_pool_size() >= 1);
    }
}
