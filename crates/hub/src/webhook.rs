// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Repo-update webhook.
//!
//! Shares the hub listener but not its auth: deliveries are verified with
//! an HMAC-SHA256 signature against the shared secret (constant-time via
//! `ring`). When no secret is configured, verification is skipped.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use ring::hmac;
use tracing::{info, warn};

use crate::state::SharedHub;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// `POST /webhook/github`.
pub async fn webhook_handler(
    State(hub): State<SharedHub>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(ref secret) = hub.config.webhook_secret {
        if !signature_valid(secret, &headers, &body) {
            warn!("webhook signature mismatch");
            return (
                StatusCode::UNAUTHORIZED,
                axum::Json(serde_json::json!({"error": "invalid signature"})),
            )
                .into_response();
        }
    }

    if let Some(command) = hub.config.webhook_command.clone() {
        info!(command = %command, "webhook verified, running update command");
        tokio::spawn(async move {
            let result = tokio::process::Command::new("sh")
                .args(["-c", &command])
                .stdin(std::process::Stdio::null())
                .output()
                .await;
            match result {
                Ok(output) if output.status.success() => {
                    info!("webhook command finished");
                }
                Ok(output) => {
                    warn!(code = ?output.status.code(), "webhook command failed");
                }
                Err(e) => warn!(err = %e, "webhook command did not start"),
            }
        });
    }

    axum::Json(serde_json::json!({"ok": true})).into_response()
}

/// Verify `X-Hub-Signature-256: sha256=<hex>` over the raw body.
fn signature_valid(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    let Some(sig) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(hex) = sig.strip_prefix("sha256=") else {
        return false;
    };
    let Some(expected) = decode_hex(hex) else {
        return false;
    };

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    // ring's verify is constant-time.
    hmac::verify(&key, body, &expected).is_ok()
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;
