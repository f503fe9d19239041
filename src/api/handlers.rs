use axum::http::StatusCode;
use serde::Serialize;

use crate::core::types::{ScanPhase, ScanStatus};

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ApiHttpResponse {
    pub status: u16,
    pub body: String,
    pub content_type: &'static str,
}

impl ApiHttpResponse {
    fn json<T: Serialize>(status: StatusCode, payload: &T) -> Self {
        match serde_json::to_string(payload) {
            Ok(body) => Self {
                status: status.as_u16(),
                body,
                content_type: "application/json",
            },
            Err(err) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                body: format!("{{\"error\":\"failed to serialize response: {}\"}}", err),
                content_type: "application/json",
            },
        }
    }

    pub fn not_found() -> Self {
        Self::json(
            StatusCode::NOT_FOUND,
            &ErrorResponse {
                error: "Unknown endpoint".to_string(),
            },
        )
    }
}

#[derive(Serialize, Debug)]
struct HealthBody<'a> {
    healthy: bool,
    phase: &'a str,
}

/// 200 while the scanner runs, 503 once it has failed.
pub fn get_health(status: &ScanStatus) -> ApiHttpResponse {
    let healthy = status.phase != ScanPhase::Error;
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    ApiHttpResponse::json(
        code,
        &HealthBody {
            healthy,
            phase: status.phase.as_str(),
        },
    )
}

pub fn get_status(status: &ScanStatus) -> ApiHttpResponse {
    ApiHttpResponse::json(StatusCode::OK, status)
}
