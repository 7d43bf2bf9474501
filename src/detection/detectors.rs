//! Pure detectors over a single request. Each one is total: pathological
//! input degrades to "not detected", never to an error.

use std::collections::BTreeMap;

use serde_json::Value;

use super::patterns;

/// Serialize query params merged with the parsed body and test the SQL
/// injection set against the result. Body keys win on collision, matching
/// the merge order of the serialized haystack.
pub fn sql_injection(query: &BTreeMap<String, String>, body: Option<&Value>) -> bool {
    let mut merged = serde_json::Map::new();
    for (k, v) in query {
        merged.insert(k.clone(), Value::String(v.clone()));
    }
    if let Some(Value::Object(obj)) = body {
        for (k, v) in obj {
            merged.insert(k.clone(), v.clone());
        }
    } else if let Some(other) = body {
        merged.insert("body".to_string(), other.clone());
    }

    let haystack = Value::Object(merged).to_string();
    patterns::SQL_INJECTION.is_match(&haystack)
}

pub fn bot_user_agent(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    patterns::BOT_INDICATORS.iter().any(|needle| ua.contains(needle))
}

fn path_matches(path: &str, taxonomy: &[&str]) -> bool {
    let lower = path.to_lowercase();
    taxonomy.iter().any(|fragment| lower.contains(fragment))
}

pub fn is_docs_path(path: &str) -> bool {
    path_matches(path, patterns::DOCS_PATHS)
}

pub fn is_openapi_path(path: &str) -> bool {
    path_matches(path, patterns::OPENAPI_PATHS)
}

pub fn is_admin_path(path: &str) -> bool {
    path_matches(path, patterns::ADMIN_PATHS)
}

pub fn is_internal_path(path: &str) -> bool {
    path_matches(path, patterns::INTERNAL_PATHS)
}
