// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication: bearer token, minted auth-session cookies, and the HTTP
//! middleware enforcing both.
//!
//! A request is authorized by the configured bearer token (query parameter)
//! or by an unexpired auth-session cookie. The first successful token use
//! mints a 256-bit session token and returns it as a hardened cookie;
//! subsequent requests prefer the cookie. Static assets bypass auth, HTML
//! does not.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::RngCore;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use relay_proto::record::epoch_ms;

use crate::state::SharedHub;

/// Cookie carrying the minted auth-session token.
pub const COOKIE_NAME: &str = "relay_auth";

/// Idle lifetime of an auth session.
const SESSION_IDLE_MAX: Duration = Duration::from_secs(24 * 60 * 60);

/// How often idle sessions are swept.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

#[derive(Debug, Clone, Copy)]
struct AuthSession {
    created: u64,
    last_seen: u64,
}

/// Table of minted auth sessions. Mutated only through these methods.
#[derive(Default)]
pub struct AuthSessions {
    sessions: RwLock<HashMap<String, AuthSession>>,
}

impl AuthSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new cryptographically random 256-bit session token.
    pub async fn mint(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let token: String = bytes.iter().map(|b| format!("{b:02x}")).collect();

        let now = epoch_ms();
        self.sessions
            .write()
            .await
            .insert(token.clone(), AuthSession { created: now, last_seen: now });
        token
    }

    /// Validate a session token, extending its idle deadline on success.
    pub async fn validate(&self, token: &str) -> bool {
        let now = epoch_ms();
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(token) {
            Some(session) if now.saturating_sub(session.last_seen) <= idle_max_ms() => {
                session.last_seen = now;
                true
            }
            Some(_) => {
                sessions.remove(token);
                false
            }
            None => false,
        }
    }

    /// Drop sessions idle past the cap. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = epoch_ms();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| now.saturating_sub(s.last_seen) <= idle_max_ms());
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Hourly sweep loop.
    pub async fn run_sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(SESSION_SWEEP_INTERVAL) => {}
            }
            let removed = self.sweep().await;
            if removed > 0 {
                debug!(removed, "swept idle auth sessions");
            }
        }
    }

    #[cfg(test)]
    async fn backdate(&self, token: &str, last_seen: u64) {
        if let Some(s) = self.sessions.write().await.get_mut(token) {
            s.last_seen = last_seen;
            s.created = last_seen;
        }
    }
}

fn idle_max_ms() -> u64 {
    SESSION_IDLE_MAX.as_millis() as u64
}

/// Extract the auth-session cookie value from request headers.
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let pair = pair.trim();
        if let Some(value) = pair.strip_prefix(COOKIE_NAME) {
            if let Some(value) = value.strip_prefix('=') {
                return Some(value.to_owned());
            }
        }
    }
    None
}

/// Build the hardened Set-Cookie header value for a minted session token.
pub fn build_cookie(token: &str) -> String {
    format!("{COOKIE_NAME}={token}; HttpOnly; Secure; SameSite=Strict; Path=/")
}

/// Extract a `token=` value from a raw query string.
pub fn query_token(query: Option<&str>) -> Option<&str> {
    for pair in query?.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            return Some(value);
        }
    }
    None
}

/// Static assets (css/js/images/fonts) bypass auth; HTML does not.
pub fn is_static_asset(path: &str) -> bool {
    let ext = path.rsplit('.').next().unwrap_or("");
    matches!(
        ext,
        "css" | "js" | "mjs" | "map" | "png" | "jpg" | "jpeg" | "gif" | "svg" | "ico" | "webp"
            | "woff" | "woff2" | "ttf" | "otf"
    ) && path.contains('.')
}

/// Outcome of an authorization check.
pub enum Authorized {
    /// Valid cookie (or auth disabled for this path).
    Ok,
    /// Valid bearer token; a fresh session cookie should be attached.
    OkMintCookie(String),
    No,
}

/// Check a request's credentials: cookie first, bearer token second.
pub async fn authorize(hub: &SharedHub, headers: &HeaderMap, query: Option<&str>) -> Authorized {
    if let Some(cookie) = session_cookie(headers) {
        if hub.auth.validate(&cookie).await {
            return Authorized::Ok;
        }
    }

    if let (Some(expected), Some(provided)) = (hub.config.auth_token.as_deref(), query_token(query))
    {
        if constant_time_eq(expected, provided) {
            let token = hub.auth.mint().await;
            return Authorized::OkMintCookie(token);
        }
    }

    Authorized::No
}

/// Axum middleware enforcing auth on HTML and API routes.
///
/// WebSocket upgrades, the agent endpoint, and the webhook authenticate in
/// their own handlers; static assets pass through.
pub async fn auth_layer(
    State(hub): State<SharedHub>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_owned();

    let is_upgrade = req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if is_upgrade || path == "/agent" || path == "/webhook/github" || is_static_asset(&path) {
        return next.run(req).await;
    }

    let query = req.uri().query().map(str::to_owned);
    match authorize(&hub, req.headers(), query.as_deref()).await {
        Authorized::Ok => next.run(req).await,
        Authorized::OkMintCookie(token) => {
            let mut response = next.run(req).await;
            if let Ok(value) = build_cookie(&token).parse() {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            response
        }
        Authorized::No => (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({"error": "unauthorized"})),
        )
            .into_response(),
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
