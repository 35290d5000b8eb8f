use axum::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;

use crate::auth::{self, AuthUser};
use crate::http::error::ApiError;
use crate::http::AppState;

/// Any authenticated caller, regardless of role.
pub struct CurrentUser(pub AuthUser);

/// Admin or teacher.
pub struct CurrentStaff(pub AuthUser);

/// Admin only.
pub struct CurrentAdmin(pub AuthUser);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthorized)?;
        let conn = state.db();
        let user = auth::authenticate(&conn, state.bootstrap_digest(), token)
            .map_err(|e| ApiError::internal(e, "token lookup failed"))?
            .ok_or(ApiError::Unauthorized)?;
        Ok(CurrentUser(user))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentStaff {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.role.is_staff() {
            return Err(ApiError::Forbidden);
        }
        Ok(CurrentStaff(user))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if user.role != auth::Role::Admin {
            return Err(ApiError::Forbidden);
        }
        Ok(CurrentAdmin(user))
    }
}

/// Json body extractor that keeps malformed input on the API's error
/// contract instead of axum's plain-text rejection.
pub struct AppJson<T>(pub T);

#[async_trait]
impl<T> FromRequest<AppState> for AppJson<T>
where
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(match rejection {
                JsonRejection::MissingJsonContentType(_) => {
                    ApiError::bad_request("expected application/json request body")
                }
                other => ApiError::bad_request(other.body_text()),
            }),
        }
    }
}

/// Query-string extractor on the same error contract.
pub struct AppQuery<T>(pub T);

#[async_trait]
impl<T> FromRequestParts<AppState> for AppQuery<T>
where
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match Query::<T>::try_from_uri(&parts.uri) {
            Ok(Query(value)) => Ok(AppQuery(value)),
            Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
        }
    }
}
