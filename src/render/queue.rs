// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Strictly serialized offline render jobs.
//!
//! Jobs are admitted in call order and run one at a time on a dedicated worker task.
//! A failed job returns its error to its own caller and the queue moves on.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::Error;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Decrements the pending count when a job finishes, even if it panicked.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A FIFO queue that runs one render job at a time.
///
/// Cloning the queue shares the same worker. Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct RenderQueue {
    sender: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl RenderQueue {
    /// Creates a queue and spawns its worker.
    pub fn new() -> RenderQueue {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                // Each job runs in its own task so a panic can't take the worker down.
                if let Err(e) = tokio::spawn(job).await {
                    error!(err = %e, "Render job panicked");
                }
            }
            debug!("Render queue closed");
        });

        RenderQueue {
            sender,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Appends a job to the queue and returns a future for its result.
    ///
    /// The job is admitted immediately, before the returned future is polled, so
    /// admission order is call order. Dropping the returned future does not cancel the
    /// job.
    pub fn enqueue<F, Fut, T>(&self, job: F) -> impl Future<Output = Result<T, Error>> + Send
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        let position = self.pending.fetch_add(1, Ordering::SeqCst);
        let guard = PendingGuard(self.pending.clone());

        let admitted = self
            .sender
            .send(Box::pin(async move {
                let _guard = guard;
                let result = job().await;
                let _ = response_tx.send(result);
            }))
            .is_ok();
        if admitted {
            debug!(position, "Render job queued");
        }

        async move {
            if !admitted {
                return Err(Error::Disposed("render queue"));
            }
            match response_rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::render_failure(
                    "render queue",
                    "job ended without a result",
                )),
            }
        }
    }

    /// Number of jobs admitted that have not finished yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl Default for RenderQueue {
    fn default() -> Self {
        RenderQueue::new()
    }
}

impl std::fmt::Debug for RenderQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderQueue")
            .field("pending", &self.pending())
            .finish()
    }
}
