use std::time::Instant;

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::{error, warn};
use uuid::Uuid;

use crate::application::{error::ErrorReport, orchestrator::CallerContext};

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Log failed responses together with the error chain their handler attached.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let account_id = response
            .extensions()
            .get::<CallerContext>()
            .map(|ctx| ctx.account_id.clone())
            .unwrap_or_default();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "healthreport::http::response",
                status = status.as_u16(),
                method = %method,
                path = %loggable_path(uri.path()),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                account_id = account_id,
                "request failed",
            );
        } else {
            warn!(
                target = "healthreport::http::response",
                status = status.as_u16(),
                method = %method,
                path = %loggable_path(uri.path()),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                account_id = account_id,
                "client request error",
            );
        }
    }

    response
}

/// Share tokens are bearer secrets and never reach the logs.
fn loggable_path(path: &str) -> &str {
    if path.starts_with(SHARE_PATH_PREFIX) {
        "/share/{token}"
    } else {
        path
    }
}

const SHARE_PATH_PREFIX: &str = "/share/";
