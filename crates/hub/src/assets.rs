// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Root handler and reverse-proxy path-prefix handling.
//!
//! `/` serves double duty: a WebSocket upgrade runs the client protocol,
//! anything else gets the dashboard page. The asset bundle itself is an
//! external artifact served from a configured directory.

use axum::extract::{FromRequestParts, Request, State, WebSocketUpgrade};
use axum::http::{header, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Redirect, Response};

use crate::state::SharedHub;
use crate::ws;

/// Placeholder page when no asset directory is configured.
const FALLBACK_PAGE: &str = "<!doctype html><title>claude-relay</title>\
<p>relay hub is running; no client assets are configured.</p>";

/// `GET /` — WebSocket upgrade or the dashboard page.
pub async fn root_handler(State(hub): State<SharedHub>, req: Request) -> Response {
    let (mut parts, _body) = req.into_parts();

    let wants_upgrade = parts
        .headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if wants_upgrade {
        let query = parts.uri.query().map(str::to_owned);
        let authed = ws::client_authorized(&hub, &parts.headers, query.as_deref()).await;
        return match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => ws::handle_upgrade(hub, upgrade, authed),
            Err(rejection) => rejection.into_response(),
        };
    }

    // Plain GET: the auth middleware has already vetted it.
    match hub.config.assets_dir.as_ref() {
        Some(dir) => match tokio::fs::read_to_string(dir.join("index.html")).await {
            Ok(page) => Html(page).into_response(),
            Err(_) => (StatusCode::NOT_FOUND, "index.html not found").into_response(),
        },
        None => Html(FALLBACK_PAGE.to_owned()).into_response(),
    }
}

/// Rewrite requests under the configured reverse-proxy prefix.
///
/// `<prefix>/x` is served as `/x`; the bare prefix without a trailing slash
/// redirects to the prefixed root.
pub async fn rewrite_prefix(
    State(hub): State<SharedHub>,
    mut req: Request,
) -> Result<Request, Response> {
    let Some(prefix) = hub.config.path_prefix.clone() else {
        return Ok(req);
    };

    let path = req.uri().path();
    if path == prefix {
        return Err(Redirect::permanent(&format!("{prefix}/")).into_response());
    }

    let Some(rest) = path.strip_prefix(&format!("{prefix}/")) else {
        return Ok(req);
    };
    let bare = format!("/{rest}");
    let new_uri = match req.uri().query() {
        Some(query) => format!("{bare}?{query}"),
        None => bare,
    };
    match new_uri.parse::<Uri>() {
        Ok(uri) => {
            *req.uri_mut() = uri;
            Ok(req)
        }
        Err(_) => Err((StatusCode::BAD_REQUEST, "bad path").into_response()),
    }
}
