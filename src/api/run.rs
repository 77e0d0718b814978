use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::pipeline::state::Preferences;

#[derive(Debug, Deserialize)]
pub(crate) struct RunBriefingRequest {
    recipient: String,
    #[serde(flatten)]
    preferences: Preferences,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// 1人分のパイプラインを同期実行し、終端状態をそのまま返す。
pub(crate) async fn run_briefing(
    State(state): State<AppState>,
    Json(payload): Json<RunBriefingRequest>,
) -> impl IntoResponse {
    state.telemetry().record_manual_run_invocation();

    let recipient = payload.recipient.trim();
    if recipient.is_empty() {
        let body = Json(ErrorResponse {
            error: "recipient must not be empty".into(),
        });
        return (StatusCode::BAD_REQUEST, body).into_response();
    }

    let terminal = state
        .scheduler()
        .run_manual(recipient, payload.preferences)
        .await;

    (StatusCode::OK, Json(terminal)).into_response()
}
