//! Routes.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use keyledger::{
    CryptoKeyId, FieldError, KeyAttributesUpdate, KeyTypeId, KeyTypeUpdate, NewCryptoKey, NewKeyType,
    RotateRequest,
};
use keyledger_store::{ExpiryCheck, KeyTypeDeletion, SweepOutcome};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::params::{CryptoKeyListParams, DeleteParams, KeyTypeListParams};
use crate::Shared;

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: Shared) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/key-types", get(list_key_types).post(create_key_type))
        .route(
            "/api/key-types/:id",
            get(get_key_type).patch(update_key_type).delete(delete_key_type),
        )
        .route("/api/keys", get(list_keys).post(create_key))
        .route("/api/keys/:id", get(get_key).patch(update_key).delete(delete_key))
        .route("/api/keys/:id/history", get(key_history))
        .route("/api/keys/:id/suspend", post(suspend_key))
        .route("/api/keys/:id/reactivate", post(reactivate_key))
        .route("/api/keys/:id/revoke", post(revoke_key))
        .route("/api/keys/:id/destroy", post(destroy_key))
        .route("/api/keys/:id/rotate", post(rotate_key))
        .route("/api/keys/:id/check-expiry", post(check_expiry))
        .route("/api/sweep", post(sweep))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReasonReq {
    reason: Option<String>,
}

/// Optional JSON body. Empty means `T::default()`; anything else must parse.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| FieldError::new("body", e.to_string()).into())
}

fn reason(body: &Bytes) -> Result<Option<String>, ApiError> {
    optional_body::<ReasonReq>(body).map(|req| req.reason)
}

// ---------------------------------------------------------------------------
// Key types
// ---------------------------------------------------------------------------

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

async fn list_key_types(
    State(state): State<Shared>,
    Query(params): Query<KeyTypeListParams>,
) -> ApiResult<impl IntoResponse> {
    let query = params.into_query()?;
    let key_types = state
        .blocking(move |ledger, store| ledger.key_types().list(store, &query))
        .await?;
    Ok(Json(key_types))
}

async fn create_key_type(
    State(state): State<Shared>,
    Json(req): Json<NewKeyType>,
) -> ApiResult<impl IntoResponse> {
    let key_type = state
        .blocking(move |ledger, store| ledger.key_types().create(store, req))
        .await?;
    Ok((StatusCode::CREATED, Json(key_type)))
}

async fn get_key_type(State(state): State<Shared>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let id = KeyTypeId::new(id);
    let key_type = state
        .blocking(move |ledger, store| ledger.key_types().get(store, &id))
        .await?;
    Ok(Json(key_type))
}

async fn update_key_type(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(req): Json<KeyTypeUpdate>,
) -> ApiResult<impl IntoResponse> {
    let id = KeyTypeId::new(id);
    let key_type = state
        .blocking(move |ledger, store| ledger.key_types().update(store, &id, req))
        .await?;
    Ok(Json(key_type))
}

async fn delete_key_type(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> ApiResult<impl IntoResponse> {
    let id = KeyTypeId::new(id);
    let outcome = state
        .blocking(move |ledger, store| ledger.key_types().delete(store, &id, params.force))
        .await?;
    Ok(Json(match outcome {
        KeyTypeDeletion::Removed => json!({"status": "removed"}),
        KeyTypeDeletion::Disabled { key_type, destroyed } => json!({
            "status": "disabled",
            "key_type": key_type,
            "destroyed_keys": destroyed,
        }),
    }))
}

// ---------------------------------------------------------------------------
// Crypto keys
// ---------------------------------------------------------------------------

async fn list_keys(
    State(state): State<Shared>,
    Query(params): Query<CryptoKeyListParams>,
) -> ApiResult<impl IntoResponse> {
    let query = params.into_query()?;
    let keys = state
        .blocking(move |ledger, store| ledger.keys().list(store, &query))
        .await?;
    Ok(Json(keys))
}

async fn create_key(State(state): State<Shared>, Json(req): Json<NewCryptoKey>) -> ApiResult<impl IntoResponse> {
    let key = state
        .blocking(move |ledger, store| ledger.keys().create(store, req))
        .await?;
    Ok((StatusCode::CREATED, Json(key)))
}

async fn get_key(State(state): State<Shared>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let id = CryptoKeyId::new(id);
    let key = state
        .blocking(move |ledger, store| ledger.keys().get(store, &id))
        .await?;
    Ok(Json(key))
}

async fn update_key(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(req): Json<KeyAttributesUpdate>,
) -> ApiResult<impl IntoResponse> {
    let id = CryptoKeyId::new(id);
    let key = state
        .blocking(move |ledger, store| ledger.keys().update(store, &id, req))
        .await?;
    Ok(Json(key))
}

async fn delete_key(State(state): State<Shared>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let id = CryptoKeyId::new(id);
    state
        .blocking(move |ledger, store| ledger.keys().delete(store, &id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn key_history(State(state): State<Shared>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let id = CryptoKeyId::new(id);
    let history = state
        .blocking(move |ledger, store| ledger.keys().history(store, &id))
        .await?;
    Ok(Json(history))
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

async fn suspend_key(
    State(state): State<Shared>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let id = CryptoKeyId::new(id);
    let reason = reason(&body)?;
    let key = state
        .blocking(move |ledger, store| ledger.lifecycle().suspend(store, &id, reason.as_deref()))
        .await?;
    Ok(Json(key))
}

async fn reactivate_key(
    State(state): State<Shared>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let id = CryptoKeyId::new(id);
    let reason = reason(&body)?;
    let key = state
        .blocking(move |ledger, store| ledger.lifecycle().reactivate(store, &id, reason.as_deref()))
        .await?;
    Ok(Json(key))
}

async fn revoke_key(
    State(state): State<Shared>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let id = CryptoKeyId::new(id);
    let reason = reason(&body)?.unwrap_or_default();
    let key = state
        .blocking(move |ledger, store| ledger.lifecycle().revoke(store, &id, &reason))
        .await?;
    Ok(Json(key))
}

async fn destroy_key(
    State(state): State<Shared>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let id = CryptoKeyId::new(id);
    let reason = reason(&body)?;
    let key = state
        .blocking(move |ledger, store| ledger.lifecycle().destroy(store, &id, reason.as_deref()))
        .await?;
    Ok(Json(key))
}

async fn rotate_key(
    State(state): State<Shared>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let id = CryptoKeyId::new(id);
    let req: RotateRequest = optional_body(&body)?;
    let rotation = state
        .blocking(move |ledger, store| ledger.lifecycle().rotate(store, &id, req))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "predecessor": rotation.predecessor,
            "successor": rotation.successor,
            "history": rotation.record,
        })),
    ))
}

async fn check_expiry(State(state): State<Shared>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let id = CryptoKeyId::new(id);
    let check = state
        .blocking(move |ledger, store| ledger.lifecycle().check_expiry(store, &id))
        .await?;
    Ok(Json(match check {
        ExpiryCheck::Expired(key) => json!({"status": "expired", "key": key}),
        ExpiryCheck::NotDue { expires_at } => json!({"status": "not_due", "expires_at": expires_at}),
    }))
}

async fn sweep(State(state): State<Shared>) -> ApiResult<impl IntoResponse> {
    let sweeper = state.sweeper.clone();
    let outcome = tokio::task::spawn_blocking(move || sweeper.sweep())
        .await
        .map_err(|e| ApiError::Internal(format!("sweep task failed: {}", e)))??;
    Ok(Json(match outcome {
        SweepOutcome::Skipped => json!({"status": "skipped"}),
        SweepOutcome::Completed(report) => json!({
            "status": "completed",
            "started_at": report.started_at,
            "expired": report.expired,
            "skipped": report.skipped,
            "failed": report
                .failed
                .iter()
                .map(|(id, error)| json!({"id": id, "error": error}))
                .collect::<Vec<_>>(),
            "upcoming": report
                .upcoming
                .iter()
                .map(|(id, expires_at)| json!({"id": id, "expires_at": expires_at}))
                .collect::<Vec<_>>(),
        }),
    }))
}
