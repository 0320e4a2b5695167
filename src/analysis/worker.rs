//! Background analysis worker.
//!
//! A single tokio task runs submissions one at a time and reports back over
//! a channel. Each submission gets a [`RequestId`]; a newer submission makes
//! every older one stale, and stale jobs still waiting in the queue are
//! skipped without touching the network.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::client::{AnalysisClient, AnalysisError, AnalysisRequest};
use super::result::ScreeningResult;
use crate::imaging::Frame;

/// No request is current.
const NO_REQUEST: u64 = 0;

/// Identifies one submission to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Messages from the worker to the UI loop.
#[derive(Debug)]
pub enum WorkerEvent {
    Completed {
        id: RequestId,
        result: ScreeningResult,
    },
    Failed {
        id: RequestId,
        error: AnalysisError,
    },
    /// The annotated result image finished downloading
    AnnotatedImage { id: RequestId, image: Frame },
}

impl WorkerEvent {
    pub fn id(&self) -> RequestId {
        match self {
            WorkerEvent::Completed { id, .. }
            | WorkerEvent::Failed { id, .. }
            | WorkerEvent::AnnotatedImage { id, .. } => *id,
        }
    }
}

struct Job {
    id: RequestId,
    request: AnalysisRequest,
}

pub struct AnalysisWorker {
    jobs: Option<UnboundedSender<Job>>,
    events: UnboundedSender<WorkerEvent>,
    current: Arc<AtomicU64>,
    next_id: u64,
    task: Option<JoinHandle<()>>,
}

impl AnalysisWorker {
    /// Start the worker task. Must be called inside a tokio runtime.
    pub fn spawn(client: AnalysisClient, events: UnboundedSender<WorkerEvent>) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let current = Arc::new(AtomicU64::new(NO_REQUEST));

        let task = tokio::spawn(run_worker(
            client,
            jobs_rx,
            events.clone(),
            Arc::clone(&current),
        ));

        Self {
            jobs: Some(jobs_tx),
            events,
            current,
            next_id: NO_REQUEST,
            task: Some(task),
        }
    }

    /// Queue a request. It supersedes every earlier one.
    pub fn submit(&mut self, request: AnalysisRequest) -> RequestId {
        self.next_id += 1;
        let id = RequestId(self.next_id);
        self.current.store(id.0, Ordering::SeqCst);

        let sent = self
            .jobs
            .as_ref()
            .is_some_and(|jobs| jobs.send(Job { id, request }).is_ok());
        if !sent {
            log::error!("Analysis worker is not running, request {} dropped", id);
            let _ = self.events.send(WorkerEvent::Failed {
                id,
                error: AnalysisError::WorkerStopped,
            });
        }
        id
    }

    /// Whether `id` is the latest submission and has not been invalidated.
    pub fn is_current(&self, id: RequestId) -> bool {
        self.current.load(Ordering::SeqCst) == id.0
    }

    /// Make the outstanding request stale. Its network call is not cancelled.
    pub fn invalidate(&self) {
        self.current.store(NO_REQUEST, Ordering::SeqCst);
    }

    /// Stop the worker and wait for the task to finish. Safe to call twice.
    pub async fn shutdown(&mut self) {
        self.invalidate();
        self.jobs = None;
        if let Some(task) = self.task.take() {
            // An in-flight request would otherwise hold shutdown up to the full timeout.
            task.abort();
            match task.await {
                Ok(()) => log::debug!("Analysis worker stopped"),
                Err(e) if e.is_cancelled() => log::debug!("Analysis worker cancelled"),
                Err(e) => log::warn!("Analysis worker ended abnormally: {}", e),
            }
        }
    }
}

async fn run_worker(
    client: AnalysisClient,
    mut jobs: UnboundedReceiver<Job>,
    events: UnboundedSender<WorkerEvent>,
    current: Arc<AtomicU64>,
) {
    let is_current = |id: RequestId| current.load(Ordering::SeqCst) == id.0;

    while let Some(Job { id, request }) = jobs.recv().await {
        if !is_current(id) {
            log::debug!("Skipping superseded analysis request {}", id);
            continue;
        }

        let response = match client.submit(&request).await {
            Ok(response) => response,
            Err(error) => {
                log::warn!("Analysis request {} failed: {}", id, error);
                if events.send(WorkerEvent::Failed { id, error }).is_err() {
                    break;
                }
                continue;
            }
        };

        let result = ScreeningResult::from_response(&response);
        log::info!(
            "Analysis request {} finished: {} ({:.2}%)",
            id,
            result.label(),
            result.confidence
        );
        let image_path = result.image_path.clone();
        if events.send(WorkerEvent::Completed { id, result }).is_err() {
            break;
        }

        // Best effort; the result stands without the annotated image.
        let Some(image_path) = image_path else {
            continue;
        };
        if !is_current(id) {
            continue;
        }
        match client.download_asset(&image_path).await {
            Ok(bytes) => match Frame::decode(&bytes) {
                Ok(image) => {
                    let _ = events.send(WorkerEvent::AnnotatedImage { id, image });
                }
                Err(e) => log::warn!("Annotated image {} is not readable: {}", image_path, e),
            },
            Err(e) => log::warn!("Failed to download annotated image {}: {}", image_path, e),
        }
    }
}
