//! Generation request queue.
//!
//! Routes submit a [`GenerationJob`] to a bounded MPSC channel. A single
//! worker task runs them one at a time via `spawn_blocking`, so route handlers
//! never block on the engine lock. Events travel back through a bounded
//! per-request channel: a slow client back-pressures generation and a dropped
//! receiver stops it.

use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::mpsc;

use llama_stream_engine::{run_session, SessionRegistry};
use llama_stream_types::{GenerateRequest, StreamEvent};

/// Everything needed to run one generation call.
pub struct GenerationJob {
    pub request: GenerateRequest,
    /// Where events go. Closing the receiving side cancels this job.
    pub events: mpsc::Sender<StreamEvent>,
}

/// Cloneable handle that route handlers use to submit generation work.
#[derive(Clone)]
pub struct GenerationQueue {
    tx: mpsc::Sender<GenerationJob>,
}

impl GenerationQueue {
    /// Create the queue and spawn the background worker.
    pub fn spawn(registry: Arc<SessionRegistry>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<GenerationJob>(capacity);
        tokio::spawn(generation_worker(rx, registry));
        Self { tx }
    }

    /// Submit a job. Waits if the queue is full.
    pub async fn submit(&self, job: GenerationJob) -> Result<(), String> {
        self.tx
            .send(job)
            .await
            .map_err(|_| "Generation queue closed".to_string())
    }
}

/// Long-lived task that pulls jobs off the channel one at a time.
async fn generation_worker(mut rx: mpsc::Receiver<GenerationJob>, registry: Arc<SessionRegistry>) {
    while let Some(job) = rx.recv().await {
        // Client went away while waiting in line.
        if job.events.is_closed() {
            debug!("[QUEUE] Skipping request whose client already disconnected");
            continue;
        }

        let registry = registry.clone();
        let join_result = tokio::task::spawn_blocking(move || {
            let GenerationJob { request, events } = job;
            run_session(&registry, &request, |event| events.blocking_send(event).is_ok());
        })
        .await;

        if let Err(e) = join_result {
            error!("[QUEUE] Generation task panicked: {e}");
        }
    }
    info!("[QUEUE] Generation worker stopped");
}
