use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::http::error::ApiError;
use crate::http::AppState;

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

pub async fn version(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    // A cheap probe that the schema is in place, not just that the file opens.
    let tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
            [],
            |row| row.get(0),
        )
        .map_err(ApiError::db)?;
    Ok(Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "schemaTables": tables,
    })))
}
