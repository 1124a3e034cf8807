//! Asynchronous job dispatch.
//!
//! Embedding, tag, and proposition extraction run out-of-band from the
//! write path. The dispatcher executes named job units under the
//! configured backend; local backends log and swallow job failures
//! (there is no dispatcher-level retry), while the external-queue
//! backend fails loudly when the hand-off itself is rejected.

use crate::config::JobBackend;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::future::join_all;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// A unit of background work.
pub struct Job {
    name: String,
    params: serde_json::Value,
    future: Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>,
}

impl Job {
    /// Create a named job from an async unit.
    ///
    /// `params` describe the job for external-queue hand-off (node id,
    /// operation); local backends ignore them and drive the future.
    pub fn new<F>(name: impl Into<String>, params: serde_json::Value, future: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            params,
            future: Box::pin(future),
        }
    }

    /// Job name used in logs and queue hand-off.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn run(self) {
        let name = self.name;
        match self.future.await {
            Ok(()) => debug!("Job '{}' completed", name),
            Err(e) => warn!("Job '{}' failed: {}", name, e),
        }
    }
}

/// External task-queue adapter.
///
/// Implementations hand the job descriptor to an external system. They
/// may drop work when the queue is unavailable, but must return an
/// error rather than silently succeed.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job descriptor.
    async fn enqueue(&self, name: &str, params: serde_json::Value) -> Result<()>;
}

/// Dispatches jobs under the configured backend.
pub struct JobDispatcher {
    backend: JobBackend,
    queue: Option<Arc<dyn JobQueue>>,
}

impl JobDispatcher {
    /// Create a dispatcher for a local backend.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when `backend` is [`JobBackend::Queue`];
    /// use [`Self::with_queue`] for that.
    pub fn new(backend: JobBackend) -> Result<Self> {
        if backend == JobBackend::Queue {
            return Err(Error::Configuration(
                "queue backend requires a JobQueue adapter".to_string(),
            ));
        }
        Ok(Self {
            backend,
            queue: None,
        })
    }

    /// Create a dispatcher handing work to an external queue.
    #[must_use]
    pub fn with_queue(queue: Arc<dyn JobQueue>) -> Self {
        Self {
            backend: JobBackend::Queue,
            queue: Some(queue),
        }
    }

    /// The configured backend.
    #[must_use]
    pub fn backend(&self) -> JobBackend {
        self.backend
    }

    /// Dispatch one job.
    ///
    /// - `Inline` runs the job on the caller, swallowing its error.
    /// - `Thread` drives the job on a detached OS thread.
    /// - `EventLoop` spawns a cooperative task on the async runtime.
    /// - `Queue` hands the descriptor off; a rejected hand-off is
    ///   returned as an error.
    pub async fn dispatch(&self, job: Job) -> Result<()> {
        match self.backend {
            JobBackend::Inline => {
                job.run().await;
                Ok(())
            }
            JobBackend::Thread => {
                let handle = tokio::runtime::Handle::current();
                std::thread::spawn(move || {
                    handle.block_on(job.run());
                });
                Ok(())
            }
            JobBackend::EventLoop => {
                tokio::spawn(job.run());
                Ok(())
            }
            JobBackend::Queue => {
                let queue = self
                    .queue
                    .as_ref()
                    .ok_or_else(|| {
                        Error::Configuration("queue backend without adapter".to_string())
                    })?;
                queue.enqueue(&job.name, job.params.clone()).await
            }
        }
    }

    /// Dispatch a batch.
    ///
    /// `EventLoop` runs all jobs concurrently on the runtime and waits
    /// on a barrier; `Inline` runs them sequentially; `Thread` and
    /// `Queue` enqueue each job independently.
    pub async fn dispatch_parallel(&self, jobs: Vec<Job>) -> Result<()> {
        match self.backend {
            JobBackend::EventLoop => {
                join_all(jobs.into_iter().map(Job::run)).await;
                Ok(())
            }
            JobBackend::Inline => {
                for job in jobs {
                    job.run().await;
                }
                Ok(())
            }
            JobBackend::Thread | JobBackend::Queue => {
                for job in jobs {
                    self.dispatch(job).await?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn counting_job(counter: Arc<AtomicU64>) -> Job {
        Job::new("count", serde_json::json!({}), async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[tokio::test]
    async fn inline_runs_on_caller() {
        let dispatcher = JobDispatcher::new(JobBackend::Inline).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        dispatcher
            .dispatch(counting_job(Arc::clone(&counter)))
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inline_swallows_job_errors() {
        let dispatcher = JobDispatcher::new(JobBackend::Inline).unwrap();
        let job = Job::new("boom", serde_json::json!({}), async {
            Err(Error::Database("gone".to_string()))
        });
        assert!(dispatcher.dispatch(job).await.is_ok());
    }

    #[tokio::test]
    async fn event_loop_barrier_waits_for_all() {
        let dispatcher = JobDispatcher::new(JobBackend::EventLoop).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        let jobs = (0..5).map(|_| counting_job(Arc::clone(&counter))).collect();
        dispatcher.dispatch_parallel(jobs).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn thread_backend_completes_detached() {
        let dispatcher = JobDispatcher::new(JobBackend::Thread).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        dispatcher
            .dispatch(counting_job(Arc::clone(&counter)))
            .await
            .unwrap();

        // Detached thread: poll until it lands.
        for _ in 0..50 {
            if counter.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("detached job never completed");
    }

    #[tokio::test]
    async fn queue_backend_requires_adapter() {
        assert!(JobDispatcher::new(JobBackend::Queue).is_err());
    }

    #[tokio::test]
    async fn queue_failures_are_loud() {
        struct RejectingQueue;
        #[async_trait]
        impl JobQueue for RejectingQueue {
            async fn enqueue(&self, _name: &str, _params: serde_json::Value) -> Result<()> {
                Err(Error::Database("queue unavailable".to_string()))
            }
        }
        let dispatcher = JobDispatcher::with_queue(Arc::new(RejectingQueue));
        let job = Job::new("embed", serde_json::json!({"node_id": 1}), async { Ok(()) });
        assert!(dispatcher.dispatch(job).await.is_err());
    }

    #[tokio::test]
    async fn queue_receives_name_and_params() {
        struct RecordingQueue(parking_lot::Mutex<Vec<(String, serde_json::Value)>>);
        #[async_trait]
        impl JobQueue for RecordingQueue {
            async fn enqueue(&self, name: &str, params: serde_json::Value) -> Result<()> {
                self.0.lock().push((name.to_string(), params));
                Ok(())
            }
        }
        let queue = Arc::new(RecordingQueue(parking_lot::Mutex::new(Vec::new())));
        let dispatcher = JobDispatcher::with_queue(Arc::clone(&queue) as Arc<dyn JobQueue>);
        let job = Job::new(
            "generate_embedding",
            serde_json::json!({"node_id": 7}),
            async { Ok(()) },
        );
        dispatcher.dispatch(job).await.unwrap();

        let recorded = queue.0.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "generate_embedding");
        assert_eq!(recorded[0].1["node_id"], 7);
    }
}
