use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::admission::{AdmissionError, AdmitOutcome};
use crate::AppState;

/// **处理入站竞价请求**
///
/// 200 已接收，204 不参与（过滤），400 请求有误，503 缓冲区已满。
pub async fn handle_bid_request(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    // simd-json 需要可写缓冲区
    let mut body = body.to_vec();
    let request = match state.admission.parse(&mut body) {
        Ok(request) => request,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid json payload" })),
            )
                .into_response();
        }
    };

    match state.admission.admit(&request) {
        Ok(AdmitOutcome::Accepted) => {
            (StatusCode::OK, Json(json!({ "status": "accepted" }))).into_response()
        }
        // 204 告诉交易所 "不参与"，不是错误
        Ok(AdmitOutcome::Filtered(_)) => StatusCode::NO_CONTENT.into_response(),
        Ok(AdmitOutcome::Rejected(reason)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "bad request", "reason": reason.reason() })),
        )
            .into_response(),
        Err(e) if e.is_backpressure() => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "buffer full" })),
        )
            .into_response(),
        Err(AdmissionError::Publish(e)) => {
            error!(request_id = %request.id, error = %e, "bid stream unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "stream unavailable" })),
            )
                .into_response()
        }
        Err(AdmissionError::Encode(e)) => {
            error!(request_id = %request.id, error = %e, "failed to encode bid request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "serialization error" })),
            )
                .into_response()
        }
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Response {
    Json(state.stats.snapshot()).into_response()
}
