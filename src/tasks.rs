//! Fire-and-forget background jobs
//!
//! Callers hand over a future and move on. Jobs run on their own tasks with a
//! bounded number in flight; failures are logged here and never reach the
//! caller. A full queue drops the job instead of blocking the request path.
//! Shutdown stops intake, runs whatever is still queued and waits for it.

use std::future::Future;
use std::pin::Pin;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Job = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

struct QueuedJob {
    name: &'static str,
    job: Job,
}

pub struct BackgroundTasks {
    sender: mpsc::Sender<QueuedJob>,
    in_flight: Arc<Semaphore>,
    max_in_flight: usize,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundTasks {
    /// Spawns the dispatcher; must be called inside a tokio runtime
    pub fn new(queue_capacity: usize, max_in_flight: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let max_in_flight = max_in_flight.max(1);
        let in_flight = Arc::new(Semaphore::new(max_in_flight));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = tokio::spawn(run_dispatcher(receiver, Arc::clone(&in_flight), shutdown_rx));

        Self {
            sender,
            in_flight,
            max_in_flight,
            shutdown_tx,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Queue a job; returns false if it was dropped
    pub fn dispatch<F>(&self, name: &'static str, job: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let queued = QueuedJob {
            name,
            job: Box::pin(job),
        };

        match self.sender.try_send(queued) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(job = name, "Background queue is full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(job = name, "Background queue is closed, dropping job");
                false
            }
        }
    }

    /// Stop accepting jobs, then wait until queued and running ones finish
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background dispatcher failed");
            }
        }
        match self.in_flight.acquire_many(self.max_in_flight as u32).await {
            Ok(_permits) => info!("Background jobs drained"),
            Err(e) => warn!(error = %e, "Background job semaphore closed during shutdown"),
        }
    }
}

async fn spawn_job(queued: QueuedJob, in_flight: &Arc<Semaphore>) -> bool {
    let Ok(permit) = Arc::clone(in_flight).acquire_owned().await else {
        return false;
    };
    tokio::spawn(async move {
        let _permit = permit;
        match queued.job.await {
            Ok(()) => debug!(job = queued.name, "Background job finished"),
            Err(e) => error!(job = queued.name, error = %e, "Background job failed"),
        }
    });
    true
}

async fn run_dispatcher(
    mut receiver: mpsc::Receiver<QueuedJob>,
    in_flight: Arc<Semaphore>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            Some(queued) = receiver.recv() => {
                if !spawn_job(queued, &in_flight).await {
                    break;
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    receiver.close();
                    let mut drained = 0usize;
                    while let Some(queued) = receiver.recv().await {
                        if !spawn_job(queued, &in_flight).await {
                            break;
                        }
                        drained += 1;
                    }
                    if drained > 0 {
                        debug!(drained, "Ran queued background jobs on shutdown");
                    }
                    break;
                }
            }
            else => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_jobs_run_and_failures_are_contained() {
        let tasks = BackgroundTasks::new(8, 2);
        let runs = Arc::new(AtomicUsize::new(0));

        assert!(tasks.dispatch("failing", async { Err::<(), _>(anyhow::anyhow!("boom")) }));

        let (done_tx, done_rx) = oneshot::channel();
        let counter = Arc::clone(&runs);
        assert!(tasks.dispatch("counting", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
            anyhow::Ok(())
        }));

        done_rx.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        // The current-thread runtime does not poll the dispatcher until we yield
        let tasks = BackgroundTasks::new(1, 1);
        assert!(tasks.dispatch("first", async { anyhow::Ok(()) }));
        assert!(!tasks.dispatch("second", async { anyhow::Ok(()) }));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_jobs() {
        let tasks = BackgroundTasks::new(4, 2);
        let finished = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = oneshot::channel();

        let counter = Arc::clone(&finished);
        tasks.dispatch("slow", async move {
            let _ = started_tx.send(());
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        });

        started_rx.await.unwrap();
        tasks.shutdown().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_runs_queued_jobs() {
        let tasks = BackgroundTasks::new(16, 1);
        let finished = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = Arc::clone(&finished);
            assert!(tasks.dispatch("queued", async move {
                tokio::task::yield_now().await;
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }));
        }

        tasks.shutdown().await;
        assert_eq!(finished.load(Ordering::SeqCst), 5);
        assert!(!tasks.dispatch("late", async { anyhow::Ok(()) }));
    }
}
