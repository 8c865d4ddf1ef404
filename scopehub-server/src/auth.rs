//! Bearer-token guard for the admin endpoints.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use constant_time_eq::constant_time_eq;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn require_scope_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token);

    if is_authorized(state.settings.scope_api_key.as_deref(), presented) {
        next.run(request).await
    } else {
        tracing::debug!(path = %request.uri().path(), "rejected admin request");
        ApiError::unauthorized().into_response()
    }
}

fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

/// Constant-time comparison. Without a configured key nothing is authorized.
pub fn is_authorized(expected: Option<&str>, presented: Option<&str>) -> bool {
    match (expected, presented) {
        (Some(expected), Some(presented)) => {
            constant_time_eq(expected.as_bytes(), presented.as_bytes())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("key"), Some("key"), true)]
    #[case(Some("key"), Some("kex"), false)]
    #[case(Some("key"), Some("key-longer"), false)]
    #[case(Some("key"), None, false)]
    #[case(None, Some("key"), false)]
    #[case(None, None, false)]
    fn authorization_matrix(
        #[case] expected: Option<&str>,
        #[case] presented: Option<&str>,
        #[case] allowed: bool,
    ) {
        assert_eq!(is_authorized(expected, presented), allowed);
    }

    #[rstest]
    #[case("Bearer abc", Some("abc"))]
    #[case("bearer  abc ", Some("abc"))]
    #[case("Basic abc", None)]
    #[case("abc", None)]
    fn bearer_parsing(#[case] header: &str, #[case] token: Option<&str>) {
        assert_eq!(bearer_token(header), token);
    }
}
