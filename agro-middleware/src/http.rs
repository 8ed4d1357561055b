/**
 * REMOTE API - Request/reply facade used by the greenhouse dashboard
 *
 * ROLE :
 * Thin axum layer over `Middleware`. Reads return snapshots of the pool
 * heads, writes route manual commands and failover requests.
 *
 * ERRORS :
 * Domain errors never surface as HTTP failures. Control routes always answer
 * 200 with `{"ok": true}` or `{"ok": false, "error": "..."}`.
 */

use crate::controller::DEFAULT_HISTORY_LIMIT;
use crate::error::ControlError;
use crate::middleware::Middleware;
use crate::models::{ActuatorState, HistoryPoint, PoolMember};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub middleware: Arc<Middleware>,
}

#[derive(Debug, Deserialize)]
struct ActionBody {
    action: String,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/sensors", get(get_sensors))
        .route("/sensors/{kind}", post(control_sensor))
        .route("/actuators", get(get_actuators))
        .route("/actuators/{kind}", post(control_actuator))
        .route("/pools", get(list_pools))
        .route("/pools/{kind}/failover", post(simulate_failover))
        .route("/history/{kind}", get(get_history))
        .route("/contracts", get(list_contracts))
        .with_state(app_state)
}

fn status(result: Result<Value, ControlError>) -> Json<Value> {
    match result {
        Ok(extra) => {
            let mut body = json!({ "ok": true });
            if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
                body.extend(extra);
            }
            Json(body)
        }
        Err(e) => {
            warn!(error = %e, "request rejected");
            Json(json!({ "ok": false, "error": e.to_string() }))
        }
    }
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<crate::health::MiddlewareHealth> {
    Json(app.middleware.health().await)
}

// GET /sensors
async fn get_sensors(State(app): State<AppState>) -> Json<BTreeMap<String, f64>> {
    Json(app.middleware.snapshot_sensors().await)
}

// GET /actuators
async fn get_actuators(
    State(app): State<AppState>,
) -> Json<BTreeMap<String, Option<ActuatorState>>> {
    Json(app.middleware.snapshot_actuators().await)
}

// POST /actuators/{kind}  {"action": "on"|"off"}
async fn control_actuator(
    State(app): State<AppState>,
    Path(kind): Path<String>,
    Json(body): Json<ActionBody>,
) -> Json<Value> {
    status(app.middleware.control_actuator(&kind, &body.action).await.map(|_| Value::Null))
}

// POST /sensors/{kind}  {"action": "on"|"off"}
async fn control_sensor(
    State(app): State<AppState>,
    Path(kind): Path<String>,
    Json(body): Json<ActionBody>,
) -> Json<Value> {
    status(app.middleware.control_sensor(&kind, &body.action).await.map(|_| Value::Null))
}

// POST /pools/{kind}/failover
async fn simulate_failover(State(app): State<AppState>, Path(kind): Path<String>) -> Json<Value> {
    status(
        app.middleware
            .simulate_failover(&kind)
            .await
            .map(|promotion| json!({ "promotion": promotion })),
    )
}

// GET /history/{kind}?limit=N
async fn get_history(
    State(app): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<HistoryPoint>> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    // an unknown subsystem simply has no history
    Json(app.middleware.history(&kind, limit).await.unwrap_or_default())
}

// GET /pools
async fn list_pools(State(app): State<AppState>) -> Json<BTreeMap<String, Vec<PoolMember>>> {
    Json(app.middleware.list_pools().await)
}

// GET /contracts
async fn list_contracts(State(app): State<AppState>) -> Json<Vec<crate::contracts::Contract>> {
    Json(app.middleware.contracts().list_contracts())
}
