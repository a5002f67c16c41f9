//! /v1 鉴权
//!
//! 1. `x-api-key` 与配置的 NEXA_API_KEY 相同则直接放行
//! 2. 否则要求 `Authorization: Bearer <token>`：配置了 dev_token 且完全相同则放行，
//!    其余按 HS256 JWT 以 token_secret 校验（存在 exp 时校验过期）

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::config::AuthSection;
use crate::core::GatewayError;
use crate::gateway::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

pub fn authorize(auth: &AuthSection, headers: &HeaderMap) -> Result<(), GatewayError> {
    if let (Some(expected), Some(given)) = (
        auth.api_key.as_deref().filter(|k| !k.is_empty()),
        headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()),
    ) {
        if given == expected {
            return Ok(());
        }
    }

    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| GatewayError::Unauthorized("missing credentials".to_string()))?;

    if auth.dev_token.as_deref().is_some_and(|dev| !dev.is_empty() && dev == token) {
        return Ok(());
    }

    verify_jwt(token, &auth.token_secret)
}

fn verify_jwt(token: &str, secret: &str) -> Result<(), GatewayError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    decode::<serde_json::Value>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|_| ())
        .map_err(|e| {
            tracing::debug!(error = %e, "bearer token rejected");
            GatewayError::Unauthorized("invalid token".to_string())
        })
}

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    authorize(&state.config.auth, request.headers())?;
    Ok(next.run(request).await)
}
