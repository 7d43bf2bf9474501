//! Turns a raw HTTP request into the flat [`RequestMetadata`] value the
//! detectors and scoring engine consume.
//!
//! Normalization is total: malformed headers, undecodable bodies, and
//! missing fields all degrade to defaults. Nothing here can abort an
//! analysis.

use std::collections::BTreeMap;

use http::request::Parts;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of scanning the request for an API-key-shaped header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyStatus {
    Correct,
    Wrong,
    None,
}

impl ApiKeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeyStatus::Correct => "correct",
            ApiKeyStatus::Wrong => "wrong",
            ApiKeyStatus::None => "none",
        }
    }
}

/// Everything the detection engine needs to know about one request.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    pub ip: String,
    pub user_agent: String,
    pub method: String,
    pub path: String,
    /// Flattened query string, last value wins on duplicate keys.
    pub query: BTreeMap<String, String>,
    /// Parsed JSON or form body; `None` for anything undecodable.
    pub body: Option<Value>,
    /// All headers except the cookie family, values lossily stringified.
    pub headers: BTreeMap<String, String>,
    pub api_key_status: ApiKeyStatus,
    pub api_key_used: Option<String>,
}

pub fn normalize(parts: &Parts, body: &[u8], bait_key: &str) -> RequestMetadata {
    let query = parts
        .uri
        .query()
        .map(parse_query)
        .unwrap_or_default();

    let (api_key_status, api_key_used) = classify_api_key(parts, bait_key);

    RequestMetadata {
        ip: client_ip(parts),
        user_agent: header_string(parts, "user-agent").unwrap_or_else(|| "unknown".to_string()),
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        query,
        body: parse_body(parts, body),
        headers: sanitized_headers(parts),
        api_key_status,
        api_key_used,
    }
}

/// Client IP precedence: first token of X-Forwarded-For, then X-Real-IP,
/// then the Cloudflare connecting header, then `"unknown"`.
fn client_ip(parts: &Parts) -> String {
    if let Some(forwarded) = header_string(parts, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    header_string(parts, "x-real-ip")
        .or_else(|| header_string(parts, "cf-connecting-ip"))
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_string(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
}

fn parse_query(raw: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (k, v) in url::form_urlencoded::parse(raw.as_bytes()) {
        map.insert(k.into_owned(), v.into_owned());
    }
    map
}

fn parse_body(parts: &Parts, body: &[u8]) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    let content_type = header_string(parts, "content-type").unwrap_or_default();
    if content_type.contains("application/json") {
        serde_json::from_slice(body).ok()
    } else if content_type.contains("application/x-www-form-urlencoded") {
        let map: serde_json::Map<String, Value> = url::form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        Some(Value::Object(map))
    } else {
        None
    }
}

/// Every header except `cookie` / `set-cookie`, which must never reach the
/// persistent store.
fn sanitized_headers(parts: &Parts) -> BTreeMap<String, String> {
    parts
        .headers
        .iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            name != "cookie" && name != "set-cookie"
        })
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// First-header-wins API key classification.
///
/// A header qualifies when its value carries an `sk_`/`sk-` fragment
/// anywhere, or its name mentions api / authorization — both tests are
/// case-insensitive (header names arrive lowercased already; the value
/// is lowercased here). The first qualifying header decides the status:
/// a value containing the bait key is `correct`, anything else is
/// `wrong`.
fn classify_api_key(parts: &Parts, bait_key: &str) -> (ApiKeyStatus, Option<String>) {
    for (name, value) in parts.headers.iter() {
        let name = name.as_str();
        let value = String::from_utf8_lossy(value.as_bytes());
        let value_lower = value.to_lowercase();

        let qualifies = value_lower.contains("sk_")
            || value_lower.contains("sk-")
            || name.contains("api")
            || name.contains("authorization");
        if !qualifies {
            continue;
        }

        let status = if value.contains(bait_key) {
            ApiKeyStatus::Correct
        } else {
            ApiKeyStatus::Wrong
        };
        return (status, Some(value.into_owned()));
    }
    (ApiKeyStatus::None, None)
}
