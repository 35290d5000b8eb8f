use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::backup::write_backup_bundle;
use crate::http::error::ApiError;
use crate::http::extract::CurrentAdmin;
use crate::http::AppState;

/// POST /api/backup: zip the database into <data_dir>/backups/. The
/// connection lock is held for the copy so the file on disk is settled.
pub async fn create(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let config = state.config();
    let file_name = format!(
        "campus-backup-{}.zip",
        chrono::Utc::now().format("%Y%m%d%H%M%S")
    );
    let out_path = config.backup_dir().join(&file_name);

    let _conn = state.db();
    let summary = write_backup_bundle(&config.db_path(), &out_path)
        .map_err(|e| ApiError::internal(e, "backup failed"))?;

    tracing::info!(file = %file_name, size_bytes = summary.size_bytes, "backup written");
    Ok(Json(json!({
        "file": file_name,
        "sizeBytes": summary.size_bytes,
        "databaseSha256": summary.db_sha256,
    })))
}
