pub(crate) mod events;
pub(crate) mod wallet;

use axum::Json;
use serde_json::{json, Value};

/// Liveness probe.
pub(crate) async fn health() -> Json<Value> {
    Json(json!({ "success": true, "status": "ok" }))
}
