// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::HeaderValue;
use ring::hmac;

use super::*;

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn sign(secret: &str, body: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, body);
    format!("sha256={}", hex_encode(tag.as_ref()))
}

fn headers_with_signature(sig: &str) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(sig)?);
    Ok(headers)
}

#[test]
fn valid_signature_passes() -> anyhow::Result<()> {
    let body = br#"{"ref":"refs/heads/main"}"#;
    let headers = headers_with_signature(&sign("s3cret", body))?;
    assert!(signature_valid("s3cret", &headers, body));
    Ok(())
}

#[test]
fn wrong_secret_fails() -> anyhow::Result<()> {
    let body = b"payload";
    let headers = headers_with_signature(&sign("other", body))?;
    assert!(!signature_valid("s3cret", &headers, body));
    Ok(())
}

#[test]
fn tampered_body_fails() -> anyhow::Result<()> {
    let headers = headers_with_signature(&sign("s3cret", b"original"))?;
    assert!(!signature_valid("s3cret", &headers, b"tampered"));
    Ok(())
}

#[test]
fn missing_or_malformed_header_fails() -> anyhow::Result<()> {
    let body = b"payload";
    assert!(!signature_valid("s3cret", &HeaderMap::new(), body));
    assert!(!signature_valid("s3cret", &headers_with_signature("md5=abc")?, body));
    assert!(!signature_valid("s3cret", &headers_with_signature("sha256=zz")?, body));
    Ok(())
}

#[test]
fn decode_hex_round_trips() {
    assert_eq!(decode_hex("00ff10"), Some(vec![0x00, 0xff, 0x10]));
    assert_eq!(decode_hex("0"), None);
    assert_eq!(decode_hex("zz"), None);
    assert_eq!(decode_hex(""), Some(Vec::new()));
}
