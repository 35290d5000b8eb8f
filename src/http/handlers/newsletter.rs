use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::OptionalExtension;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::http::extract::{AppJson, CurrentAdmin};
use crate::http::helpers::now;
use crate::http::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/subscribers", get(list_subscribers))
}

/// Shape check only; deliverability is the mailer's problem.
fn plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    if email.chars().any(char::is_whitespace) || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

#[derive(Debug, Deserialize)]
struct SubscribeBody {
    email: String,
}

/// POST /api/newsletter/subscribe: the public signup form. Addresses are
/// stored trimmed and lowercased so case variants cannot double-subscribe.
async fn subscribe(
    State(state): State<AppState>,
    AppJson(body): AppJson<SubscribeBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let email = body.email.trim().to_lowercase();
    if !plausible_email(&email) {
        return Err(ApiError::bad_request("email is not valid"));
    }

    let conn = state.db();
    let existing: Option<i64> = conn
        .query_row("SELECT 1 FROM subscribers WHERE email = ?", [&email], |r| {
            r.get(0)
        })
        .optional()
        .map_err(ApiError::db)?;
    if existing.is_some() {
        return Err(ApiError::bad_request("Email already subscribed"));
    }

    let id = Uuid::new_v4().to_string();
    let stamp = now();
    conn.execute(
        "INSERT INTO subscribers(id, email, subscribed_at) VALUES(?, ?, ?)",
        (&id, &email, &stamp),
    )
    .map_err(ApiError::db)?;

    tracing::info!(subscriber_id = %id, "newsletter signup");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": id, "email": email, "subscribedAt": stamp })),
    ))
}

/// GET /api/newsletter/subscribers.
async fn list_subscribers(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let mut stmt = conn
        .prepare("SELECT id, email, subscribed_at FROM subscribers ORDER BY subscribed_at, email")
        .map_err(ApiError::db)?;
    let subscribers = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "email": row.get::<_, String>(1)?,
                "subscribedAt": row.get::<_, String>(2)?,
            }))
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    Ok(Json(json!({ "subscribers": subscribers })))
}

#[cfg(test)]
mod tests {
    use super::plausible_email;

    #[test]
    fn email_shapes() {
        assert!(plausible_email("parent@example.com"));
        assert!(plausible_email("a.b+tag@mail.example.co"));
        assert!(!plausible_email("no-at-sign"));
        assert!(!plausible_email("@example.com"));
        assert!(!plausible_email("user@"));
        assert!(!plausible_email("user@nodot"));
        assert!(!plausible_email("user@.com"));
        assert!(!plausible_email("two words@example.com"));
    }
}
