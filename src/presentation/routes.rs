//! Route definitions and shared application state
//!
//! Request flow for data endpoints: validate caller input, resolve
//! identity, consume rate limit quota, then touch storage. Malformed input
//! is rejected before it burns quota or costs a storage round trip.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::application::{SessionScope, SubscribeHooks, TeamScope};
use crate::config::RateLimitConfig;
use crate::domain::errors::ApiError;
use crate::domain::identity::{IdentityResolver, RequestIdentity};
use crate::infrastructure::pubsub::PubSub;
use crate::infrastructure::rate_limit::{LimitScope, WindowLimiter};
use crate::infrastructure::store::ScopedKvStore;
use crate::presentation::models::PublishRequest;
use crate::presentation::ws;

/// Shared state threaded into every handler.
///
/// Explicit instances owned here and passed by the router; no module-level
/// singletons.
#[derive(Clone)]
pub struct AppState {
    pub team_store: ScopedKvStore,
    pub session_store: ScopedKvStore,
    pub pubsub: PubSub,
    pub limiter: WindowLimiter,
    pub identity: Arc<dyn IdentityResolver>,
    pub hooks: SubscribeHooks,
    pub limits: RateLimitConfig,
}

impl AppState {
    pub fn team_scope(&self, identity: &RequestIdentity) -> Result<TeamScope, ApiError> {
        Ok(self.team_scope_for(identity.team_id()?.to_string()))
    }

    pub fn team_scope_for(&self, team_id: String) -> TeamScope {
        TeamScope::new(team_id, self.team_store.clone(), self.pubsub.clone())
    }

    pub fn session_scope(&self, identity: &RequestIdentity) -> Result<SessionScope, ApiError> {
        Ok(SessionScope::new(
            identity.session_id()?.to_string(),
            self.session_store.clone(),
        ))
    }

    /// Enforce every configured limit for this request; the first failure
    /// short-circuits and is surfaced.
    pub async fn enforce_limits(&self, identity: &RequestIdentity) -> Result<(), ApiError> {
        if !self.limits.enabled {
            return Ok(());
        }

        if let Some(limit) = &self.limits.team {
            if let Ok(team_id) = identity.team_id() {
                let key = format!("{}:{}", LimitScope::Team, team_id);
                self.limiter
                    .enforce(&key, limit.limit, limit.window_secs)
                    .await?;
            }
        }

        // The session quota only applies when the request carries a session
        // identity; session-less requests are covered by the team quota.
        if let Some(limit) = &self.limits.session {
            if let Ok(session_id) = identity.session_id() {
                let key = format!("{}:{}", LimitScope::Session, session_id);
                self.limiter
                    .enforce(&key, limit.limit, limit.window_secs)
                    .await?;
            }
        }

        Ok(())
    }
}

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/team/data", get(get_team_data).post(set_team_data))
        .route(
            "/session/data",
            get(get_session_data).post(set_session_data),
        )
        .route("/team/publish", post(publish_team_message))
        .route("/subscribe", get(ws::subscribe))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health-check endpoint for load balancers and orchestrators
async fn healthz() -> Json<Value> {
    Json(json!({ "healthy": true }))
}

#[derive(Debug, Deserialize)]
struct DataQuery {
    /// Optional JSON default applied on first read
    data: Option<String>,
}

fn parse_data_param(raw: Option<&str>) -> Result<Option<Value>, ApiError> {
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
        None => Ok(None),
    }
}

async fn get_team_data(
    State(state): State<AppState>,
    Query(query): Query<DataQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    // Reject malformed input before it consumes any quota.
    let default = parse_data_param(query.data.as_deref())?;
    let identity = state.identity.resolve(&headers);
    state.enforce_limits(&identity).await?;

    let scope = state.team_scope(&identity)?;
    let value = match default {
        Some(default) => Some(scope.get_or_default(&default).await?),
        None => scope.get().await?,
    };

    Ok(Json(value.unwrap_or(Value::Null)))
}

async fn set_team_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let value: Value = serde_json::from_str(&body)?;
    let identity = state.identity.resolve(&headers);
    state.enforce_limits(&identity).await?;

    let scope = state.team_scope(&identity)?;
    scope.set(&value).await?;

    Ok(Json(value))
}

async fn get_session_data(
    State(state): State<AppState>,
    Query(query): Query<DataQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let default = parse_data_param(query.data.as_deref())?;
    let identity = state.identity.resolve(&headers);
    state.enforce_limits(&identity).await?;

    let scope = state.session_scope(&identity)?;
    let value = match default {
        Some(default) => Some(scope.get_or_default(&default).await?),
        None => scope.get().await?,
    };

    Ok(Json(value.unwrap_or(Value::Null)))
}

async fn set_session_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let value: Value = serde_json::from_str(&body)?;
    let identity = state.identity.resolve(&headers);
    state.enforce_limits(&identity).await?;

    let scope = state.session_scope(&identity)?;
    scope.set(&value).await?;

    Ok(Json(value))
}

async fn publish_team_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let request: PublishRequest = serde_json::from_str(&body)?;
    let identity = state.identity.resolve(&headers);
    state.enforce_limits(&identity).await?;

    let scope = state.team_scope(&identity)?;
    scope.publish(&request.channel, &request.message).await?;

    Ok(Json(json!({ "published": true })))
}
