//! Single-consumer projection loop.
//!
//! Transaction events must be applied strictly in arrival order, so all
//! producers funnel through one bounded channel drained by one blocking
//! worker. Each submission is acknowledged with its projection outcome.

use tokio::sync::{mpsc, oneshot};
use tracing::error;

use crate::event::TxEvent;
use crate::projector::{ProjectError, TxProjector};

const EVENT_QUEUE_DEPTH: usize = 64;

struct ProjectCommand {
    event: TxEvent,
    ack: oneshot::Sender<Result<(), ProjectError>>,
}

/// Cloneable handle feeding events to the projection worker.
#[derive(Clone)]
pub struct ProjectorHandle {
    sender: mpsc::Sender<ProjectCommand>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("projection pipeline stopped")]
    Closed,
    #[error(transparent)]
    Project(#[from] ProjectError),
}

impl ProjectorHandle {
    /// Enqueue one event and wait for its projection outcome.
    pub async fn project(&self, event: TxEvent) -> Result<(), SubmitError> {
        let (ack, outcome) = oneshot::channel();
        self.sender
            .send(ProjectCommand { event, ack })
            .await
            .map_err(|_| SubmitError::Closed)?;
        outcome.await.map_err(|_| SubmitError::Closed)??;
        Ok(())
    }
}

/// Spawn the projection worker. Must be called from within a tokio runtime.
pub fn spawn_projector(projector: TxProjector) -> ProjectorHandle {
    let (sender, mut receiver) = mpsc::channel(EVENT_QUEUE_DEPTH);
    tokio::task::spawn_blocking(move || {
        while let Some(ProjectCommand { event, ack }) = receiver.blocking_recv() {
            let result = projector.project(&event);
            if let Err(err) = &result {
                error!(tx_id = %event.tx_id, error = %err, "failed to project transaction event");
            }
            let _ = ack.send(result);
        }
    });
    ProjectorHandle { sender }
}
