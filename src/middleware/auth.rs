use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::handlers::AppState;
use crate::session::{Session, SessionError};
use crate::token::{Claims, TokenError};

/// Response header carrying an advisory replacement access token
pub const RENEWED_ACCESS_HEADER: HeaderName = HeaderName::from_static("x-renewed-access");

// Extension to store the authenticated session in the request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: Claims,
    /// Session as of this request, activity already counted
    pub session: Session,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Validate the bearer token against its session, count the request, and
/// attach a renewed access token to the response when one is due
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, TokenError> {
    let token = bearer_token(request.headers()).ok_or(TokenError::Malformed)?;
    let identity = state.tokens.validate(token).await?;

    let session = match state.sessions.record_activity(&identity.claims.sid).await {
        Ok(session) => session,
        Err(SessionError::Durable(e)) => return Err(TokenError::Unavailable(e.to_string())),
        Err(e) => {
            debug!("Activity not recorded for {}: {}", identity.claims.sid, e);
            identity.session
        }
    };

    let claims = identity.claims;
    request.extensions_mut().insert(AuthContext {
        claims: claims.clone(),
        session,
    });

    let mut response = next.run(request).await;

    // Checked after the handler so a logout never hands out a fresh token
    if let Some(renewed) = state.tokens.maybe_renew(&claims, state.sessions.now()).await {
        match HeaderValue::from_str(&renewed) {
            Ok(value) => {
                response.headers_mut().insert(RENEWED_ACCESS_HEADER, value);
            }
            Err(e) => warn!("Renewed token is not a valid header value: {}", e),
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert("Authorization", HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_none());

        headers.insert("Authorization", HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).is_none());

        headers.insert("Authorization", HeaderValue::from_static("Bearer a.b.c"));
        assert_eq!(bearer_token(&headers), Some("a.b.c"));
    }
}
