//! Parallel task executor (spec §6 "Executor with spawn/join_all/clear_queue";
//! §4.7 "async start/stop"). `RayonExecutor` pairs a `rayon` thread pool
//! (deterministic parallel work, as `astraweave-physics::async_scheduler`
//! uses it) with a `tokio::task::JoinSet` that tracks in-flight tiles so
//! `join_all`/`clear_queue` have something to await or abort.

use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;

/// A FIFO task queue over a fixed worker pool. Tasks are independent and may
/// complete in any order (spec §5 "Scheduling model").
pub trait Executor: Send + Sync {
    fn spawn(&self, task: Box<dyn FnOnce() + Send + 'static>);
    fn join_all(&self);
    fn clear_queue(&self);
}

/// Default executor: CPU work runs on a `rayon::ThreadPool`; a private
/// single-threaded `tokio` runtime hosts the `JoinSet` used to track and
/// await/cancel outstanding tiles.
pub struct RayonExecutor {
    pool: Arc<rayon::ThreadPool>,
    runtime: tokio::runtime::Runtime,
    tasks: Mutex<JoinSet<()>>,
}

impl RayonExecutor {
    /// `num_threads = 0` lets rayon pick the hardware parallelism.
    pub fn new(num_threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .expect("failed to build rayon thread pool");
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("failed to build tokio runtime");
        Self {
            pool: Arc::new(pool),
            runtime,
            tasks: Mutex::new(JoinSet::new()),
        }
    }
}

impl Default for RayonExecutor {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Executor for RayonExecutor {
    fn spawn(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        let pool = Arc::clone(&self.pool);
        let _guard = self.runtime.enter();
        let mut tasks = self.tasks.lock().unwrap();
        tasks.spawn_blocking(move || pool.install(task));
    }

    fn join_all(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        self.runtime.block_on(async {
            while tasks.join_next().await.is_some() {}
        });
    }

    fn clear_queue(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.abort_all();
        self.runtime.block_on(async {
            while tasks.join_next().await.is_some() {}
        });
    }
}
