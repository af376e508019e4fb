//! Credential extraction for the WebSocket upgrade request.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::error::ApiError;

/// Raw bearer credential, from `?token=` or an `Authorization: Bearer` header.
///
/// Browsers cannot set headers on a WebSocket handshake, so the query
/// parameter is checked first.
#[derive(Debug, Clone)]
pub struct BearerCredential(pub String);

impl<S: Send + Sync> FromRequestParts<S> for BearerCredential {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(token) = parts.uri.query().and_then(token_from_query) {
            return Ok(Self(token));
        }

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing access token"))?;

        let token = header
            .strip_prefix("Bearer ")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header format"))?;

        Ok(Self(token.to_string()))
    }
}

fn token_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "token")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}
