use axum::body::Body;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::application::orchestrator::CallerContext;

use super::error::ApiError;

pub const ACCOUNT_HEADER: &str = "x-account-id";
pub const ORGANIZATION_HEADER: &str = "x-organization-id";
pub const REQUESTER_HEADER: &str = "x-requester-id";

/// Turn the gateway identity headers into a [`CallerContext`] extension.
///
/// The gateway in front of this service authenticates callers; the headers
/// are trusted as-is.
pub async fn caller_identity(mut request: Request<Body>, next: Next) -> Response {
    let ctx = match caller_from_headers(request.headers()) {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };
    request.extensions_mut().insert(ctx.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

fn caller_from_headers(headers: &HeaderMap) -> Result<CallerContext, ApiError> {
    let account_id = header_value(headers, ACCOUNT_HEADER)
        .ok_or_else(|| ApiError::unauthorized("missing x-account-id header"))?;
    let requester_id = header_value(headers, REQUESTER_HEADER)
        .ok_or_else(|| ApiError::unauthorized("missing x-requester-id header"))?;
    Ok(CallerContext {
        account_id,
        organization_id: header_value(headers, ORGANIZATION_HEADER),
        requester_id,
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    #[test]
    fn organization_header_is_optional() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCOUNT_HEADER, HeaderValue::from_static("acct-1"));
        headers.insert(REQUESTER_HEADER, HeaderValue::from_static("dr-who"));

        let ctx = caller_from_headers(&headers).expect("caller");
        assert_eq!(ctx.account_id, "acct-1");
        assert_eq!(ctx.organization_id, None);
    }

    #[test]
    fn blank_account_is_unauthorized() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCOUNT_HEADER, HeaderValue::from_static("  "));
        headers.insert(REQUESTER_HEADER, HeaderValue::from_static("dr-who"));

        let err = caller_from_headers(&headers).expect_err("blank account");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
