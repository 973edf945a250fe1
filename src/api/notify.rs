//! Public provider callback endpoint.
//!
//! The response body is the adapter's `return_body` verbatim — providers
//! match on exact bytes (Alipay expects the literal `success`, WeChat and
//! Stripe expect specific JSON).

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::api::AppState;
use crate::payments::types::NotifyRequest;

/// POST /public/notify/:provider/:config_id
pub async fn handle_notify(
    State(state): State<AppState>,
    Path((provider, config_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!(provider = %provider, config_id = %config_id, "received provider notification");

    let Ok(config_id) = config_id.parse::<i64>() else {
        return (StatusCode::BAD_REQUEST, "invalid config_id").into_response();
    };

    let config = match state.payment.get_config_by_id(config_id).await {
        Ok(config) => config,
        Err(e) => {
            warn!(config_id, error = %e, "notify config lookup failed");
            return (StatusCode::BAD_REQUEST, "config not found").into_response();
        }
    };

    let request = NotifyRequest {
        form_data: parse_form(&body, &headers),
        headers: lowercase_headers(&headers),
        raw_body: body.to_vec(),
        request_url: format!("/public/notify/{}/{}", provider, config_id),
        config,
    };

    match state.payment.handle_notify(&provider, request).await {
        Ok(response) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, response.content_type)],
            response.return_body,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

fn lowercase_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

/// Decode a form-encoded body into first-value pairs. Non-form payloads
/// (JSON callbacks) yield an empty map.
fn parse_form(body: &[u8], headers: &HeaderMap) -> HashMap<String, String> {
    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    if !is_form {
        return HashMap::new();
    }

    let text = String::from_utf8_lossy(body);
    let mut fields = HashMap::new();
    for pair in text.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        fields
            .entry(url_decode(key))
            .or_insert_with(|| url_decode(value));
    }
    fields
}

fn url_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                if i + 2 < bytes.len() {
                    let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                    if let Ok(byte) = u8::from_str_radix(hex, 16) {
                        out.push(byte);
                        i += 3;
                        continue;
                    }
                }
                out.push(b'%');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_decode_handles_percent_and_plus() {
        assert_eq!(url_decode("a+b"), "a b");
        assert_eq!(url_decode("9%2E90"), "9.90");
        assert_eq!(url_decode("TRADE_SUCCESS"), "TRADE_SUCCESS");
        assert_eq!(url_decode("trailing%2"), "trailing%2");
        assert_eq!(url_decode("%ZZ"), "%ZZ");
    }

    #[test]
    fn form_parsing_requires_form_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );
        let fields = parse_form(b"out_trade_no=M-100&trade_status=TRADE_SUCCESS", &headers);
        assert_eq!(fields.get("out_trade_no").map(String::as_str), Some("M-100"));
        assert_eq!(
            fields.get("trade_status").map(String::as_str),
            Some("TRADE_SUCCESS")
        );

        let mut json_headers = HeaderMap::new();
        json_headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert!(parse_form(b"{\"a\":1}", &json_headers).is_empty());
    }

    #[test]
    fn header_names_are_lowercased() {
        let mut headers = HeaderMap::new();
        headers.insert("Stripe-Signature", "t=1,v1=abc".parse().unwrap());
        let map = lowercase_headers(&headers);
        assert_eq!(map.get("stripe-signature").map(String::as_str), Some("t=1,v1=abc"));
    }
}
