pub mod handlers;

use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Response, StatusCode, Uri, header},
    routing::get,
};
use tokio::sync::watch;
use tracing::{error, info};

use crate::core::types::ScanStatus;
use handlers::{ApiHttpResponse, get_health, get_status};

pub fn handle_request(path: &str, status: &ScanStatus) -> ApiHttpResponse {
    match path {
        "/health" => get_health(status),
        "/status" => get_status(status),
        _ => ApiHttpResponse::not_found(),
    }
}

async fn api_handler(
    State(watcher): State<watch::Receiver<ScanStatus>>,
    uri: Uri,
) -> Response<Body> {
    let status = *watcher.borrow();
    build_response(handle_request(uri.path(), &status))
}

fn build_response(api_response: ApiHttpResponse) -> Response<Body> {
    Response::builder()
        .status(api_response.status)
        .header(header::CONTENT_TYPE, api_response.content_type)
        .body(Body::from(api_response.body))
        .unwrap_or_else(|err| {
            error!("Failed to build response: {err}");
            let mut response = Response::new(Body::from("{\"error\":\"Internal server error\"}"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
}

pub fn router(watcher: watch::Receiver<ScanStatus>) -> Router {
    Router::new()
        .route("/health", get(api_handler))
        .route("/status", get(api_handler))
        .fallback(api_handler)
        .with_state(watcher)
}

/// Serves the status API until `shutdown` resolves.
pub async fn serve<F>(listen_addr: &str, watcher: watch::Receiver<ScanStatus>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = listen_addr
        .parse()
        .with_context(|| format!("Invalid API listen address: {}", listen_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API listener on {}", addr))?;
    info!("🌐 Status API listening on {}", listener.local_addr()?);

    axum::serve(listener, router(watcher).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Status API stopped");
    Ok(())
}
