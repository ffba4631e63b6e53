//! A pool of workers running jobs, with pub/sub of the job events.
//!
//! Every event emitted by a job is recorded in the worker history and
//! forwarded to the watchers. A watcher added late first receives the history,
//! so that a client can attach to a running analysis at any time.

use std::{
    collections::{HashMap, HashSet},
    panic::AssertUnwindSafe,
    sync::Arc,
};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{Instrument, error, info, info_span, instrument};

use crate::base::types::{Event, EventKind, JobStatus};

// Traits.

/// A unit of work submitted to the [`Pool`].
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// The key identifying the job, the pool never runs two jobs with the same key concurrently.
    fn job_key(&self) -> String;

    /// Run the job, emitting its events on the worker.
    async fn run(&self, worker: &Worker);
}

// Structs.

/// The receiving end of a worker events.
///
/// The stream ends when the job is completed.
pub struct Watcher {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Watcher {
    /// Receive the next event, `None` once the job is completed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Convert into a stream of events.
    pub fn into_stream(self) -> impl futures::Stream<Item = Event> {
        futures::stream::unfold(self, |mut watcher| async move { watcher.recv().await.map(|event| (event, watcher)) })
    }
}

#[derive(Default)]
struct WorkerState {
    history: Vec<Event>,
    watchers: Vec<mpsc::UnboundedSender<Event>>,
    closed: bool,
}

/// A job context that can be watched.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone, Default)]
pub struct Worker {
    state: Arc<Mutex<WorkerState>>,
}

impl Worker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an event to the history and every watcher.
    pub async fn emit(&self, kind: EventKind, data: impl Into<Value>) {
        let event = Event::new(kind, data);
        let mut state = self.state.lock().await;

        // Watchers that went away are dropped.
        state.watchers.retain(|watcher| watcher.send(event.clone()).is_ok());
        state.history.push(event);
    }

    /// Shortcut for a progress message.
    pub async fn progress(&self, message: impl Into<String>) {
        self.emit(EventKind::Progress, message.into()).await;
    }

    /// Add a watcher, replaying the past events first.
    pub async fn add_watcher(&self) -> Watcher {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;

        for event in &state.history {
            let _ = tx.send(event.clone());
        }
        if !state.closed {
            state.watchers.push(tx);
        }

        Watcher { rx }
    }

    /// A copy of every emitted event.
    pub async fn history(&self) -> Vec<Event> {
        self.state.lock().await.history.clone()
    }

    /// End the watchers streams.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.watchers.clear();
    }
}

type QueueItem = (Worker, Arc<dyn Job>);

#[derive(Default)]
struct PoolState {
    pending: HashMap<String, Worker>,
    completed: HashSet<String>,
}

/// Pool of workers to manage the jobs pub/sub.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Pool {
    state: Arc<Mutex<PoolState>>,
    queue: mpsc::UnboundedSender<QueueItem>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Pool {
    /// Start a pool with `max_worker` concurrent workers.
    ///
    /// This must be called from within a tokio runtime.
    pub fn new(max_worker: usize) -> Self {
        let (queue, rx) = mpsc::unbounded_channel::<QueueItem>();
        let rx = Arc::new(Mutex::new(rx));
        let state = Arc::new(Mutex::new(PoolState::default()));

        let tasks = (0..max_worker)
            .map(|id| {
                let rx = rx.clone();
                let state = state.clone();
                tokio::spawn(worker_loop(id, rx, state).instrument(info_span!("worker", id)))
            })
            .collect();

        Self {
            state,
            queue,
            tasks: Arc::new(Mutex::new(tasks)),
        }
    }

    /// Submit a job, unless it is already pending or completed.
    #[instrument(skip_all)]
    pub async fn submit(&self, job: impl Job) -> JobStatus {
        let key = job.job_key();
        let mut state = self.state.lock().await;

        if state.completed.contains(&key) {
            return JobStatus::Completed;
        }

        if !state.pending.contains_key(&key) {
            info!("Submitting job `{}`", key);
            let worker = Worker::new();
            let job: Arc<dyn Job> = Arc::new(job);
            if self.queue.send((worker.clone(), job)).is_err() {
                error!("The worker pool is stopped, dropping job `{}`.", key);
                return JobStatus::Stopped;
            }
            state.pending.insert(key, worker);
        }

        JobStatus::Pending
    }

    /// Check if a job is pending.
    pub async fn is_pending(&self, key: &str) -> bool {
        self.state.lock().await.pending.contains_key(key)
    }

    /// Check if a job was completed.
    pub async fn is_completed(&self, key: &str) -> bool {
        self.state.lock().await.completed.contains(key)
    }

    /// Forget a completed job, so that it can be submitted again.
    pub async fn forget(&self, key: &str) {
        self.state.lock().await.completed.remove(key);
    }

    /// Watch a pending job.
    pub async fn watch(&self, key: &str) -> Option<Watcher> {
        let worker = self.state.lock().await.pending.get(key).cloned()?;
        Some(worker.add_watcher().await)
    }

    /// Stop the workers.
    pub async fn stop(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in &tasks {
            task.abort();
        }
        futures::future::join_all(tasks).await;
    }
}

async fn worker_loop(id: usize, rx: Arc<Mutex<mpsc::UnboundedReceiver<QueueItem>>>, state: Arc<Mutex<PoolState>>) {
    loop {
        let item = rx.lock().await.recv().await;
        let Some((worker, job)) = item else {
            break;
        };

        let key = job.job_key();
        info!("Worker {} running job `{}`", id, key);

        if AssertUnwindSafe(job.run(&worker)).catch_unwind().await.is_err() {
            error!("Worker {} job `{}` panicked", id, key);
            worker.emit(EventKind::Error, "The job crashed unexpectedly").await;
            worker.emit(EventKind::Status, "Analysis failed: the job crashed").await;
        }

        {
            let mut state = state.lock().await;
            state.pending.remove(&key);
            state.completed.insert(key.clone());
        }
        worker.close().await;

        info!("Worker {} completed job `{}`", id, key);
    }
}

// Tests.
