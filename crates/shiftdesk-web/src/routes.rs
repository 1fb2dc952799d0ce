//! Web routes.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::services::ServeDir;
use tracing::{debug, info};

use shiftdesk_cache::{EngineHealth, SyncEngine, SyncPhase};
use shiftdesk_store::{AgentRoster, ShiftTable, load_agents, save_agents};

use crate::error::WebError;
use crate::sse::create_sse_stream;

/// Shared state for the web server.
pub struct AppState {
    pub engine: Arc<SyncEngine>,
}

/// Create the web router around the process-wide engine.
pub fn create_router(engine: Arc<SyncEngine>, static_dir: Option<&str>) -> Router {
    let state = Arc::new(AppState { engine });

    let mut router = Router::new()
        // Shift tables
        .route("/loadShiftTables", get(load_shift_tables))
        .route(
            "/saveShiftTables",
            post(save_shift_tables).fallback(method_not_allowed),
        )
        .route("/publishedShiftTables/{country}", get(published_shift_tables))
        .route("/syncStatus", get(sync_status))
        // Agents
        .route("/loadAgents", get(load_agent_roster))
        .route("/saveAgents", post(save_agent_roster).fallback(method_not_allowed))
        // Other
        .route("/health", get(health))
        .with_state(state);

    if let Some(dir) = static_dir {
        router = router.nest_service("/static", ServeDir::new(dir));
    }

    router
}

/// Serve `router` on `port` until `shutdown` resolves.
pub async fn serve<F>(router: Router, port: u16, shutdown: F) -> Result<(), WebError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("shiftdesk listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShiftTablesResponse {
    shift_tables: Vec<ShiftTable>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveShiftTablesRequest {
    shift_tables: Value,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    engine: EngineHealth,
}

fn message(text: &str) -> Json<Value> {
    Json(json!({ "message": text }))
}

async fn method_not_allowed() -> impl IntoResponse {
    (StatusCode::METHOD_NOT_ALLOWED, message("Method not allowed"))
}

async fn load_shift_tables(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.snapshot();
    debug!(tables = snapshot.len(), "serving shift tables");
    Json(ShiftTablesResponse {
        shift_tables: snapshot.tables,
    })
}

async fn save_shift_tables(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SaveShiftTablesRequest>, JsonRejection>,
) -> Result<impl IntoResponse, WebError> {
    let Json(request) = body.map_err(|e| WebError::Body(e.body_text()))?;

    let outcome = state
        .engine
        .set_snapshot(json!({ "tables": request.shift_tables }))
        .await?;
    debug!(?outcome, "shift tables saved");

    Ok(message("Shift tables saved successfully"))
}

async fn published_shift_tables(
    State(state): State<Arc<AppState>>,
    Path(country): Path<String>,
) -> impl IntoResponse {
    Json(ShiftTablesResponse {
        shift_tables: state.engine.snapshot().published_for(&country),
    })
}

async fn sync_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("status stream opened");
    create_sse_stream(state.engine.status_stream())
}

async fn load_agent_roster(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let engine = &state.engine;
    Json(load_agents(&**engine.store(), &engine.config().countries).await)
}

async fn save_agent_roster(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AgentRoster>, JsonRejection>,
) -> Result<impl IntoResponse, WebError> {
    let Json(roster) = body.map_err(|e| WebError::Body(e.body_text()))?;

    save_agents(&**state.engine.store(), &roster).await?;
    info!(countries = roster.agents.len(), "agent roster saved");

    Ok(message("Agents saved successfully"))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let engine = state.engine.health();
    let status = match engine.phase {
        SyncPhase::Error => "degraded",
        _ => "ok",
    };
    Json(HealthResponse { status, engine })
}
