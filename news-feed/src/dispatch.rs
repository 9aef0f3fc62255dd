//! Queue and worker pool for fanout jobs.
//!
//! Request handlers push a job and return immediately; a fixed set of worker
//! tasks pull jobs from a bounded multi-consumer channel. Fanout is
//! synchronous storage work, so each job runs on tokio's blocking pool.
//!
//! Shutdown first closes the gate every handle sends through, so each job is
//! either in the queue before shutdown proceeds or rejected with
//! [`DispatchError::Closed`]. Workers are then signalled on a watch channel,
//! run whatever is still queued, and exit.

use std::sync::Arc;

use thiserror::Error;
use tokio::{
    select,
    sync::{oneshot, watch, RwLock},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    fanout::{FanoutError, FanoutReport, FanoutService},
    model::TweetCreated,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("fanout queue is closed")]
    Closed,

    #[error("fanout worker dropped the job before reporting")]
    Dropped,

    #[error(transparent)]
    Fanout(#[from] FanoutError),
}

struct FanoutJob {
    tweet: TweetCreated,
    respond_to: Option<oneshot::Sender<Result<FanoutReport, FanoutError>>>,
}

/// Owns the worker tasks. Dropping it also stops the workers, but only
/// [`FanoutDispatcher::shutdown`] waits for them to finish the backlog.
pub struct FanoutDispatcher {
    handle: FanoutHandle,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

/// Cheap, cloneable sender side of the queue.
#[derive(Clone)]
pub struct FanoutHandle {
    jobs: flume::Sender<FanoutJob>,
    // Held for reading across a send; shutdown takes it for writing.
    closed: Arc<RwLock<bool>>,
}

impl FanoutDispatcher {
    /// Spawns `workers` tasks on the current tokio runtime.
    ///
    /// `capacity` bounds the number of queued jobs; once reached, enqueueing
    /// waits for a free slot.
    pub fn spawn(service: Arc<FanoutService>, workers: usize, capacity: usize) -> Self {
        let (jobs_tx, jobs_rx) = flume::bounded(capacity.max(1));
        let (shutdown, stopping) = watch::channel(false);

        let workers = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    jobs_rx.clone(),
                    Arc::clone(&service),
                    stopping.clone(),
                ))
            })
            .collect();

        Self {
            handle: FanoutHandle {
                jobs: jobs_tx,
                closed: Arc::new(RwLock::new(false)),
            },
            shutdown,
            workers,
        }
    }

    pub fn handle(&self) -> FanoutHandle {
        self.handle.clone()
    }

    /// Stops accepting jobs, lets workers drain the queue, and waits for them.
    pub async fn shutdown(self) {
        let FanoutDispatcher {
            handle,
            shutdown,
            workers,
        } = self;
        // Waits for sends already past the gate, so they land before the drain.
        *handle.closed.write().await = true;
        info!(queued = handle.queued(), workers = workers.len(), "stopping fanout workers");
        drop(handle);
        shutdown.send_replace(true);

        for worker in workers {
            if let Err(err) = worker.await {
                warn!(error = ?err, "fanout worker ended abnormally");
            }
        }
    }
}

impl FanoutHandle {
    /// Queues a fanout without waiting for it to run.
    pub async fn enqueue(&self, tweet: TweetCreated) -> Result<(), DispatchError> {
        self.send(FanoutJob {
            tweet,
            respond_to: None,
        })
        .await
    }

    /// Queues a fanout and waits for its report.
    pub async fn fanout_and_wait(
        &self,
        tweet: TweetCreated,
    ) -> Result<FanoutReport, DispatchError> {
        let (respond_to, report) = oneshot::channel();
        self.send(FanoutJob {
            tweet,
            respond_to: Some(respond_to),
        })
        .await?;

        let report = report.await.map_err(|_| DispatchError::Dropped)??;
        Ok(report)
    }

    /// Number of jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.jobs.len()
    }

    async fn send(&self, job: FanoutJob) -> Result<(), DispatchError> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(DispatchError::Closed);
        }
        self.jobs
            .send_async(job)
            .await
            .map_err(|_| DispatchError::Closed)
    }
}

async fn run_worker(
    worker: usize,
    jobs: flume::Receiver<FanoutJob>,
    service: Arc<FanoutService>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker, "fanout worker started");

    loop {
        select! {
            job = jobs.recv_async() => match job {
                Ok(job) => process_job(worker, &service, job).await,
                Err(_) => break,
            },
            _ = shutdown.changed() => {
                while let Ok(job) = jobs.try_recv() {
                    process_job(worker, &service, job).await;
                }
                break;
            }
        }
    }

    debug!(worker, "fanout worker stopped");
}

async fn process_job(worker: usize, service: &Arc<FanoutService>, job: FanoutJob) {
    let FanoutJob { tweet, respond_to } = job;
    let service = Arc::clone(service);

    let outcome = match tokio::task::spawn_blocking(move || service.fanout(&tweet)).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(worker, tweet_id = tweet.id, error = ?err, "fanout task panicked");
            return;
        }
    };

    if let Err(err) = &outcome {
        warn!(worker, tweet_id = tweet.id, error = %err, "fanout failed");
    }

    if let Some(respond_to) = respond_to {
        // The caller may have stopped waiting; the fanout itself already happened.
        let _ = respond_to.send(outcome);
    }
}
