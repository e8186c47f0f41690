//! Transaction-event ingest adapter.
//!
//! The transport collaborator realised as HTTP: one confirmed transaction
//! per request, forwarded to the single-writer projection loop. The status
//! code distinguishes fatal chain inconsistencies from retryable storage
//! failures.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use tracing::error;

use wallet_indexer::event::TxEvent;
use wallet_indexer::projector::ProjectError;
use wallet_indexer::runtime::SubmitError;

use crate::error::ErrorKind;
use crate::ApiContext;

pub(crate) async fn submit_event(
    State(context): State<ApiContext>,
    payload: Option<Json<TxEvent>>,
) -> Result<Json<Value>, ErrorKind> {
    let Some(Json(event)) = payload else {
        return Err(ErrorKind::InvalidBody);
    };
    match context.projector.project(event).await {
        Ok(()) => Ok(Json(json!({ "success": true }))),
        Err(SubmitError::Project(ProjectError::InconsistentChain(reason))) => {
            error!(%reason, "rejected inconsistent transaction event");
            Err(ErrorKind::InconsistentChain)
        }
        Err(err) => {
            error!(error = %err, "event projection unavailable");
            Err(ErrorKind::StorageUnavailable)
        }
    }
}
