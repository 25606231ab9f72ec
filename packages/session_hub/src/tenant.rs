//! Tenant resolution: bearer token → tenant id, once per request.
//!
//! Handlers never look at headers themselves; they extract [`TenantContext`],
//! which the middleware inserts after resolving the caller.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::SessionError;
use crate::repository::HubRepository;

/// Development-mode header naming the tenant when auth is disabled
pub const TENANT_HEADER: &str = "x-tenant-id";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub u64);

impl TenantId {
    pub(crate) fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub(crate) fn from_i64(raw: i64) -> Self {
        TenantId(raw as u64)
    }

    /// Label used for the tenant's credential store and client
    pub fn store_label(self) -> String {
        format!("tenant-{}", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(TenantId)
    }
}

/// The resolved caller of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant: TenantId,
}

#[derive(Clone)]
pub struct TenantState {
    pub repository: HubRepository,
    pub auth_config: Arc<AuthConfig>,
}

/// SHA-256 of a bearer token, hex encoded; only hashes are stored
pub fn hash_token(token: &str) -> String {
    Sha256::digest(token.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Mint a new random API token
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("hub_{}", hex)
}

fn bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn is_loopback(request: &Request<Body>) -> bool {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .is_some_and(|ci| ci.0.ip().is_loopback())
}

/// Resolve the tenant for every request under `/api/session`.
///
/// 1. `Authorization: Bearer <token>` → hashed → `api_tokens` lookup
/// 2. auth disabled + loopback + `X-Tenant-Id` → that tenant
/// 3. anything else → 401
pub async fn tenant_middleware(
    State(state): State<TenantState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(&request) {
        return match state.repository.resolve_api_token(&hash_token(token)).await {
            Ok(Some(tenant)) => {
                request.extensions_mut().insert(TenantContext { tenant });
                next.run(request).await
            }
            Ok(None) => {
                debug!("Rejected unknown or revoked API token");
                SessionError::AuthenticationRequired.into_response()
            }
            Err(e) => SessionError::Storage(e).into_response(),
        };
    }

    if !state.auth_config.enabled && is_loopback(&request) {
        let tenant = request
            .headers()
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<TenantId>().ok());
        if let Some(tenant) = tenant {
            request.extensions_mut().insert(TenantContext { tenant });
            return next.run(request).await;
        }
    }

    SessionError::AuthenticationRequired.into_response()
}

/// Only loopback callers may reach operator routes
pub async fn loopback_only(request: Request<Body>, next: Next) -> Response {
    if is_loopback(&request) {
        next.run(request).await
    } else {
        SessionError::AuthenticationRequired.into_response()
    }
}

impl<S> axum::extract::FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = SessionError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantContext>()
            .copied()
            .ok_or(SessionError::AuthenticationRequired)
    }
}
