//! Worker threads of one node.
//!
//! Each worker loops: drain delayed results, run local work from the queue
//! head, otherwise let the steal algorithm find work elsewhere, otherwise
//! back off briefly. Results of tasks owned by other nodes travel back
//! through the result channel.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use raubzug_core::{RaubzugError, RemoteException, Task, TaskOutcome};

use crate::engine::LoadBalancer;

/// Executes a task's parameters; an `Err` is carried back to the owner as
/// the task's exception.
pub type TaskRunner = Arc<dyn Fn(&Task) -> Result<Vec<u8>, RemoteException> + Send + Sync>;

/// Fluent builder for a [`WorkerPool`].
///
/// # Example
/// ```ignore
/// let pool = WorkerBuilder::new(lb.clone())
///     .threads(4)
///     .runner(|task| Ok(task.params().to_vec()))
///     .spawn()?;
/// ```
pub struct WorkerBuilder {
    lb: Arc<LoadBalancer>,
    threads: usize,
    idle_backoff: Duration,
    runner: Option<TaskRunner>,
}

impl WorkerBuilder {
    pub fn new(lb: Arc<LoadBalancer>) -> Self {
        let idle_backoff = lb.config().idle_backoff();
        Self {
            lb,
            threads: 1,
            idle_backoff,
            runner: None,
        }
    }

    /// Number of worker threads (default: 1).
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Sleep after an unsuccessful round (default: from the balancer config).
    pub fn idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    pub fn runner<F>(mut self, runner: F) -> Self
    where
        F: Fn(&Task) -> Result<Vec<u8>, RemoteException> + Send + Sync + 'static,
    {
        self.runner = Some(Arc::new(runner));
        self
    }

    pub fn spawn(self) -> Result<WorkerPool, RaubzugError> {
        let runner = self
            .runner
            .ok_or_else(|| RaubzugError::Config("worker pool needs a task runner".into()))?;

        let mut handles = Vec::with_capacity(self.threads);
        for i in 0..self.threads {
            let worker = Worker {
                lb: self.lb.clone(),
                runner: runner.clone(),
                idle_backoff: self.idle_backoff,
            };
            let handle = std::thread::Builder::new()
                .name(format!("raubzug-worker-{}-{i}", self.lb.local().name))
                .spawn(move || worker.run())?;
            handles.push(handle);
        }
        info!(node = %self.lb.local(), threads = self.threads, "worker pool started");
        Ok(WorkerPool {
            lb: self.lb,
            handles,
        })
    }
}

/// Running worker threads; they stop once the load balancer exits.
pub struct WorkerPool {
    lb: Arc<LoadBalancer>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Shut the load balancer down and wait for every worker.
    pub fn shutdown(self) {
        self.lb.shutdown();
        for handle in self.handles {
            if handle.join().is_err() {
                warn!(node = %self.lb.local(), "worker thread panicked");
            }
        }
    }
}

struct Worker {
    lb: Arc<LoadBalancer>,
    runner: TaskRunner,
    idle_backoff: Duration,
}

impl Worker {
    fn run(self) {
        while !self.lb.is_exiting() {
            self.lb.handle_delayed_messages();

            let task = self
                .lb
                .next_local_task()
                .or_else(|| self.lb.client_iteration());
            match task {
                Some(task) => self.execute(task),
                None => std::thread::sleep(self.idle_backoff),
            }
        }
        self.lb.handle_delayed_messages();
        debug!(node = %self.lb.local(), "worker stopped");
    }

    fn execute(&self, mut task: Task) {
        let outcome = match (self.runner)(&task) {
            Ok(value) => TaskOutcome::Value(value),
            Err(exception) => TaskOutcome::Exception(exception),
        };
        task.set_outcome(outcome);

        if task.owner() == self.lb.local() {
            self.lb.complete_locally(task);
        } else if let Err(e) = self.lb.send_result(&mut task) {
            warn!(stamp = %task.stamp(), error = %e, "could not send result");
        }
    }
}
