//!
//! authorizer HTTP server
//! ----------------------
//! This module defines the Axum-based HTTP API over the ACL engine.
//!
//! Responsibilities:
//! - Route table for the /v1 surface (services, objects, and the per-object
//!   grant/deny/revoke/set/has/get/match/list operations).
//! - Batch request bodies: every mutation and point-query endpoint takes a
//!   JSON array of items and processes them sequentially, fail-fast, with no
//!   rollback of earlier items (no transactional batch semantics).
//! - Element-wise responses for has/get/match, a flat record array for list,
//!   and 204 No Content for mutations.
//! - Error mapping: malformed bodies reject the whole batch with 400 before
//!   any write; store failures surface as 503 with a JSON error body.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::acl::{self, Acl, Verdict};
use crate::error::AppError;
use crate::storage::SharedStore;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "status": "error",
            "code": self.code_str(),
            "message": self.message(),
        }));
        (status, body).into_response()
    }
}

/// Start the authorizer HTTP server bound to the given port, with the store
/// rooted at `db_root`.
pub async fn run_with_ports(http_port: u16, db_root: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(db_root)
        .with_context(|| format!("Failed to create or access store root: {}", db_root))?;
    let store = SharedStore::new(db_root)
        .with_context(|| format!("While opening store with root: {}", db_root))?;

    let app = router(AppState { store });

    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Convenience entry point reading `AUTHORIZER_HTTP_PORT` (default 8089) and
/// `AUTHORIZER_DB_FOLDER` (default "acls") from the environment.
pub async fn run() -> anyhow::Result<()> {
    let http_port: u16 = std::env::var("AUTHORIZER_HTTP_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8089);
    let db_root = std::env::var("AUTHORIZER_DB_FOLDER").unwrap_or_else(|_| "acls".to_string());
    run_with_ports(http_port, &db_root).await
}

/// Mount all /v1 routes onto a router carrying the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "authorizer ok" }))
        .route("/v1/service/", get(list_services_handler))
        .route("/v1/service/{service}/object/", get(list_objects_handler))
        .route("/v1/service/{service}/object/{object}/grant/", post(grant_handler))
        .route("/v1/service/{service}/object/{object}/deny/", post(deny_handler))
        .route("/v1/service/{service}/object/{object}/revoke/", post(revoke_handler))
        .route("/v1/service/{service}/object/{object}/set/", put(set_handler))
        .route("/v1/service/{service}/object/{object}/has/", get(has_handler))
        .route("/v1/service/{service}/object/{object}/get/", get(get_handler))
        .route("/v1/service/{service}/object/{object}/match/", get(match_handler))
        .route("/v1/service/{service}/object/{object}/list/", get(list_handler))
        .with_state(state)
}

/// Batch item naming privileges to grant/deny/revoke or check.
#[derive(Debug, Deserialize)]
struct NamedPrivilegesItem {
    user: String,
    key: String,
    privileges: Vec<String>,
}

/// Batch item carrying a whole replacement mapping for set.
#[derive(Debug, Deserialize)]
struct SetItem {
    user: String,
    key: String,
    privileges: BTreeMap<String, Verdict>,
}

/// Batch item addressing one record for get.
#[derive(Debug, Deserialize)]
struct GetItem {
    user: String,
    key: String,
}

/// Batch item for match: key-less, privileges to match across keys.
#[derive(Debug, Deserialize)]
struct MatchItem {
    user: String,
    privileges: Vec<String>,
}

#[derive(Debug, Serialize)]
struct HasReply {
    key: String,
    user: String,
    privilege: Verdict,
}

#[derive(Debug, Serialize)]
struct GetReply {
    key: String,
    user: String,
    privileges: BTreeMap<String, Verdict>,
}

#[derive(Debug, Serialize)]
struct MatchReply {
    user: String,
    keys: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ListParams {
    key: Option<String>,
    user: Option<String>,
}

// A rejected body aborts the whole batch before any write.
fn parse_body<T>(body: Result<Json<Vec<T>>, JsonRejection>) -> Result<Vec<T>, AppError> {
    match body {
        Ok(Json(items)) => Ok(items),
        Err(rejection) => {
            let text = rejection.body_text();
            Err(AppError::user("malformed_body", text.as_str()))
        }
    }
}

fn require_user(user: &str) -> Result<(), AppError> {
    if user.is_empty() {
        return Err(AppError::user("missing_user", "Missing user from an item"));
    }
    Ok(())
}

fn require_coords(user: &str, key: &str) -> Result<(), AppError> {
    require_user(user)?;
    if key.is_empty() {
        return Err(AppError::user("missing_key", "Missing key from an item"));
    }
    Ok(())
}

async fn grant_handler(
    State(state): State<AppState>,
    Path((service, object)): Path<(String, String)>,
    body: Result<Json<Vec<NamedPrivilegesItem>>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    for item in parse_body(body)? {
        require_coords(&item.user, &item.key)?;
        acl::grant(&*state.store.0, &service, &object, &item.key, &item.user, &item.privileges)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn deny_handler(
    State(state): State<AppState>,
    Path((service, object)): Path<(String, String)>,
    body: Result<Json<Vec<NamedPrivilegesItem>>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    for item in parse_body(body)? {
        require_coords(&item.user, &item.key)?;
        acl::deny(&*state.store.0, &service, &object, &item.key, &item.user, &item.privileges)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn revoke_handler(
    State(state): State<AppState>,
    Path((service, object)): Path<(String, String)>,
    body: Result<Json<Vec<NamedPrivilegesItem>>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    for item in parse_body(body)? {
        require_coords(&item.user, &item.key)?;
        acl::revoke(&*state.store.0, &service, &object, &item.key, &item.user, &item.privileges)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn set_handler(
    State(state): State<AppState>,
    Path((service, object)): Path<(String, String)>,
    body: Result<Json<Vec<SetItem>>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    for item in parse_body(body)? {
        require_coords(&item.user, &item.key)?;
        acl::set(&*state.store.0, &service, &object, &item.key, &item.user, item.privileges)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn has_handler(
    State(state): State<AppState>,
    Path((service, object)): Path<(String, String)>,
    body: Result<Json<Vec<NamedPrivilegesItem>>, JsonRejection>,
) -> Result<Json<Vec<HasReply>>, AppError> {
    let items = parse_body(body)?;
    let mut replies = Vec::with_capacity(items.len());
    for item in items {
        require_coords(&item.user, &item.key)?;
        let allowed = acl::has(&*state.store.0, &service, &object, &item.key, &item.user, &item.privileges)?;
        replies.push(HasReply {
            key: item.key,
            user: item.user,
            privilege: if allowed { Verdict::Allow } else { Verdict::Deny },
        });
    }
    Ok(Json(replies))
}

async fn get_handler(
    State(state): State<AppState>,
    Path((service, object)): Path<(String, String)>,
    body: Result<Json<Vec<GetItem>>, JsonRejection>,
) -> Result<Json<Vec<GetReply>>, AppError> {
    let items = parse_body(body)?;
    let mut replies = Vec::with_capacity(items.len());
    for item in items {
        require_coords(&item.user, &item.key)?;
        // A missing record degrades to an empty privilege mapping.
        let privileges = acl::get(&*state.store.0, &service, &object, &item.key, &item.user)?
            .map(|acl| acl.privileges)
            .unwrap_or_default();
        replies.push(GetReply { key: item.key, user: item.user, privileges });
    }
    Ok(Json(replies))
}

async fn match_handler(
    State(state): State<AppState>,
    Path((service, object)): Path<(String, String)>,
    body: Result<Json<Vec<MatchItem>>, JsonRejection>,
) -> Result<Json<Vec<MatchReply>>, AppError> {
    let items = parse_body(body)?;
    let mut replies = Vec::with_capacity(items.len());
    for item in items {
        require_user(&item.user)?;
        let keys = acl::match_keys(&*state.store.0, &service, &object, &item.user, &item.privileges)?;
        replies.push(MatchReply { user: item.user, keys });
    }
    Ok(Json(replies))
}

async fn list_handler(
    State(state): State<AppState>,
    Path((service, object)): Path<(String, String)>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Acl>>, AppError> {
    let records = acl::list(
        &*state.store.0,
        &service,
        &object,
        params.key.as_deref(),
        params.user.as_deref(),
    )?;
    Ok(Json(records))
}

async fn list_services_handler(State(state): State<AppState>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(acl::list_services(&*state.store.0)?))
}

async fn list_objects_handler(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(acl::list_objects(&*state.store.0, &service)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_item_shape() {
        let item: NamedPrivilegesItem =
            serde_json::from_value(json!({"user": "john", "key": "1", "privileges": ["faz", "boo"]})).unwrap();
        assert_eq!(item.user, "john");
        assert_eq!(item.key, "1");
        assert_eq!(item.privileges, vec!["faz".to_string(), "boo".to_string()]);
    }

    #[test]
    fn grant_item_missing_key_rejected() {
        let parsed: Result<NamedPrivilegesItem, _> =
            serde_json::from_value(json!({"user": "john", "privileges": ["faz"]}));
        assert!(parsed.is_err());
    }

    #[test]
    fn set_item_verdict_values() {
        let item: SetItem = serde_json::from_value(
            json!({"user": "john", "key": "1", "privileges": {"faz": "allow", "boo": "deny"}}),
        )
        .unwrap();
        assert_eq!(item.privileges.get("faz"), Some(&Verdict::Allow));
        assert_eq!(item.privileges.get("boo"), Some(&Verdict::Deny));
    }

    #[test]
    fn set_item_unknown_verdict_rejected() {
        let parsed: Result<SetItem, _> = serde_json::from_value(
            json!({"user": "john", "key": "1", "privileges": {"faz": "maybe"}}),
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn has_reply_serializes_verdict_lowercase() {
        let reply = HasReply { key: "1".into(), user: "john".into(), privilege: Verdict::Allow };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"key": "1", "user": "john", "privilege": "allow"})
        );
    }

    #[test]
    fn match_reply_shape() {
        let reply = MatchReply { user: "john".into(), keys: vec!["1".into(), "2".into()] };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"user": "john", "keys": ["1", "2"]})
        );
    }

    #[test]
    fn empty_coordinates_rejected() {
        assert!(require_coords("john", "").is_err());
        assert!(require_coords("", "1").is_err());
        assert!(require_coords("john", "1").is_ok());
        assert!(require_user("").is_err());
    }
}
