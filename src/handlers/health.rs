use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::Result;
use crate::repository::Repository;
use crate::services::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    state.repo.ping().await?;
    Ok(Json(json!({"status": "ok"})))
}
