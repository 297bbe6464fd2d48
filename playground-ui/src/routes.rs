//! HTTP route handlers for the UI API.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use playground::core::session::{InputGroup, InputsAction, Session, apply_inputs_action};
use playground::core::types::EngineSnapshot;
use playground::engine::{EngineError, RunRequest};
use playground::share::{Restored, restore_session, share_session};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/state", get(get_state))
        .route("/output", get(get_output))
        .route("/run", post(run))
        .route("/stop", post(stop))
        .route("/inputs", post(edit_inputs))
        .route("/permalink/encode", post(encode_permalink))
        .route("/permalink/decode", post(decode_permalink))
}

/// Error body: `{"error": "..."}` with a status derived from the failure.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match err {
            EngineError::AlreadyRunning | EngineError::RunQueued | EngineError::NotRunning(_) => {
                StatusCode::CONFLICT
            }
            EngineError::InvalidGroup { .. } => StatusCode::BAD_REQUEST,
            EngineError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

/// GET /api/state - current engine snapshot.
async fn get_state(State(state): State<AppState>) -> Json<EngineSnapshot> {
    Json(state.engine.snapshot())
}

#[derive(Serialize)]
struct OutputResponse {
    output: String,
}

/// GET /api/output - buffered stdout of the current or last run.
async fn get_output(State(state): State<AppState>) -> Result<Json<OutputResponse>, ApiError> {
    let output = state.engine.buffered_output().await?;
    Ok(Json(OutputResponse { output }))
}

#[derive(Debug, Deserialize)]
struct RunBody {
    session: Session,
    /// Run only this group; all groups otherwise.
    #[serde(default)]
    group: Option<usize>,
    /// Overrides the configured timeout. `0` disables it.
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// POST /api/run - start a run; progress arrives on `/events`.
async fn run(
    State(state): State<AppState>,
    Json(body): Json<RunBody>,
) -> Result<(StatusCode, Json<EngineSnapshot>), ApiError> {
    let timeout = match body.timeout_secs {
        Some(0) => None,
        Some(secs) => Some(std::time::Duration::from_secs(secs)),
        None => state.config.timeout(),
    };
    let request = RunRequest::from_session(&body.session, body.group, timeout);
    state.engine.start(request).await?;
    info!(group = ?body.group, "run accepted");
    Ok((StatusCode::ACCEPTED, Json(state.engine.snapshot())))
}

/// POST /api/stop - terminate the active run.
async fn stop(State(state): State<AppState>) -> Result<Json<EngineSnapshot>, ApiError> {
    state.engine.stop().await?;
    Ok(Json(state.engine.snapshot()))
}

#[derive(Debug, Deserialize)]
struct InputsBody {
    groups: Vec<InputGroup>,
    action: InputsAction,
}

/// POST /api/inputs - apply one list operation and return the new groups.
async fn edit_inputs(Json(body): Json<InputsBody>) -> Result<Json<Vec<InputGroup>>, ApiError> {
    let mut groups = body.groups;
    apply_inputs_action(&mut groups, body.action).map_err(|e| ApiError {
        status: StatusCode::BAD_REQUEST,
        message: e.to_string(),
    })?;
    Ok(Json(groups))
}

#[derive(Debug, Deserialize)]
struct EncodeBody {
    session: Session,
}

#[derive(Debug, Serialize)]
struct EncodeResponse {
    token: String,
}

/// POST /api/permalink/encode - session to token.
async fn encode_permalink(
    State(state): State<AppState>,
    Json(body): Json<EncodeBody>,
) -> Json<EncodeResponse> {
    Json(EncodeResponse {
        token: share_session(&body.session, &state.config),
    })
}

#[derive(Debug, Deserialize)]
struct DecodeBody {
    token: String,
}

/// POST /api/permalink/decode - token to session, redirect, or failure.
async fn decode_permalink(
    State(state): State<AppState>,
    Json(body): Json<DecodeBody>,
) -> Json<Restored> {
    let restored = restore_session(&body.token, &state.compat, &state.config);
    if let Restored::Failed { reason, .. } = &restored {
        warn!(reason = %reason, "could not restore session");
    }
    Json(restored)
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use playground::io::config::EngineConfig;
    use playground::permalink::CompatTable;
    use playground::test_support::{LOOP, ScriptedSpawner, abc_session};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        let state = AppState::new(
            ScriptedSpawner::new(),
            EngineConfig::default(),
            CompatTable::default(),
        );
        api_router().with_state(state)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn state_starts_idle() {
        let app = app();
        let (status, body) = call(&app, "GET", "/state", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "idle");
    }

    #[tokio::test]
    async fn run_conflicts_while_running_and_stop_recovers() {
        let app = app();
        let run = json!({ "session": abc_session(LOOP), "group": 0 });

        let (status, _) = call(&app, "POST", "/run", run.clone()).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        // The scripted worker becomes ready on the actor's next turn.
        let mut state = Value::Null;
        for _ in 0..100 {
            state = call(&app, "GET", "/state", Value::Null).await.1;
            if state["state"] == "running" {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(state["state"], "running");

        let (status, body) = call(&app, "POST", "/run", run).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().is_some_and(|e| e.contains("running")));

        let (status, _) = call(&app, "POST", "/stop", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn stop_while_idle_conflicts() {
        let app = app();
        let (status, _) = call(&app, "POST", "/stop", Value::Null).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn invalid_group_is_bad_request() {
        let app = app();
        let run = json!({ "session": abc_session("echo"), "group": 9 });
        let (status, _) = call(&app, "POST", "/run", run).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn permalink_encode_then_decode() {
        let app = app();
        let (status, body) = call(
            &app,
            "POST",
            "/permalink/encode",
            json!({ "session": abc_session("code") }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().expect("token").to_string();

        let (status, body) =
            call(&app, "POST", "/permalink/decode", json!({ "token": token })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "session");
        assert_eq!(body["session"]["code"], "code");
        assert_eq!(body["session"]["input_groups"][2]["name"], "C");
    }

    #[tokio::test]
    async fn garbage_permalink_falls_back_to_empty_session() {
        let app = app();
        let (_, body) = call(&app, "POST", "/permalink/decode", json!({ "token": "???" })).await;
        assert_eq!(body["status"], "failed");
        assert_eq!(body["session"]["code"], "");
    }

    #[tokio::test]
    async fn inputs_operations_apply_or_reject() {
        let app = app();
        let groups = abc_session("x").input_groups;
        let (status, body) = call(
            &app,
            "POST",
            "/inputs",
            json!({ "groups": groups, "action": { "type": "add-group" } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[3]["name"], "Group 4");

        let (status, _) = call(
            &app,
            "POST",
            "/inputs",
            json!({ "groups": groups, "action": { "type": "delete-group", "group": 5 } }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
