use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// DB row types
// ---------------------------------------------------------------------------

/// One behavioral session: all requests from the same `(ip, user_agent)`
/// separated by less than the sliding timeout.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub ip: String,
    pub user_agent: String,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub request_count: i32,
    pub endpoints_called: Vec<String>,
    pub methods_used: Vec<String>,
    pub looked_at_docs: bool,
    pub tried_openapi: bool,
    pub tried_admin: bool,
    pub tried_internal: bool,
    pub systematic_probing: bool,
    pub sql_injection_attempted: bool,
    pub used_honey_token: bool,
    pub interval_count: i32,
    pub interval_mean_ms: Option<f64>,
    pub interval_cv: Option<f64>,
    pub interval_m2: f64,
    pub agent_likeness_score: i32,
    pub classification: String,
    pub classification_reasons: Vec<String>,
}

impl SessionRow {
    /// A zeroed session, used both as the insert template and as the
    /// in-memory stand-in when the store is unreachable.
    pub fn fresh(ip: &str, user_agent: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
            start_time: now,
            last_activity: now,
            end_time: None,
            request_count: 0,
            endpoints_called: Vec::new(),
            methods_used: Vec::new(),
            looked_at_docs: false,
            tried_openapi: false,
            tried_admin: false,
            tried_internal: false,
            systematic_probing: false,
            sql_injection_attempted: false,
            used_honey_token: false,
            interval_count: 0,
            interval_mean_ms: None,
            interval_cv: None,
            interval_m2: 0.0,
            agent_likeness_score: 0,
            classification: "unknown".to_string(),
            classification_reasons: Vec::new(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct RequestRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub ip: String,
    pub user_agent: String,
    pub method: String,
    pub path: String,
    pub query_params: Value,
    pub body: Option<Value>,
    pub headers: Value,
    pub response_status: i16,
    pub response_time_ms: i32,
    pub api_key_status: String,
    pub api_key_used: Option<String>,
    pub sql_injection_detected: bool,
    pub bot_user_agent_detected: bool,
    pub technique_id: String,
    pub vulnerability_type: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HoneyTokenRow {
    pub id: Uuid,
    pub token_type: String,
    pub token_value: String,
    pub triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
    pub triggered_by_ip: Option<String>,
    pub triggered_by_session: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Operator API types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub app: String,
    pub uptime_seconds: u64,
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionSummary {
    pub id: String,
    pub ip: String,
    pub user_agent: String,
    pub start_time: String,
    pub last_activity: String,
    pub request_count: i32,
    pub agent_likeness_score: i32,
    pub classification: String,
    pub classification_reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RequestRecord {
    pub id: String,
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub response_status: i16,
    pub response_time_ms: i32,
    pub api_key_status: String,
    pub sql_injection_detected: bool,
    pub bot_user_agent_detected: bool,
    pub technique_id: String,
    pub vulnerability_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub endpoints_called: Vec<String>,
    pub methods_used: Vec<String>,
    pub looked_at_docs: bool,
    pub tried_openapi: bool,
    pub tried_admin: bool,
    pub tried_internal: bool,
    pub systematic_probing: bool,
    pub sql_injection_attempted: bool,
    pub used_honey_token: bool,
    pub requests: Vec<RequestRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenInfo {
    pub token_type: String,
    pub token_value: String,
    pub triggered: bool,
    pub triggered_at: Option<String>,
    pub triggered_by_ip: Option<String>,
    pub triggered_by_session: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrapStats {
    pub trap_requests: u64,
    pub analyses_completed: u64,
    pub analyses_dropped: u64,
    pub sessions_total: i64,
    pub humans: i64,
    pub scrapers: i64,
    pub ai_agents: i64,
    pub tokens_triggered: i64,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

pub fn row_to_summary(row: &SessionRow) -> SessionSummary {
    SessionSummary {
        id: row.id.to_string(),
        ip: row.ip.clone(),
        user_agent: row.user_agent.clone(),
        start_time: row.start_time.to_rfc3339(),
        last_activity: row.last_activity.to_rfc3339(),
        request_count: row.request_count,
        agent_likeness_score: row.agent_likeness_score,
        classification: row.classification.clone(),
        classification_reasons: row.classification_reasons.clone(),
    }
}

pub fn row_to_record(row: &RequestRow) -> RequestRecord {
    RequestRecord {
        id: row.id.to_string(),
        timestamp: row.created_at.to_rfc3339(),
        method: row.method.clone(),
        path: row.path.clone(),
        response_status: row.response_status,
        response_time_ms: row.response_time_ms,
        api_key_status: row.api_key_status.clone(),
        sql_injection_detected: row.sql_injection_detected,
        bot_user_agent_detected: row.bot_user_agent_detected,
        technique_id: row.technique_id.clone(),
        vulnerability_type: row.vulnerability_type.clone(),
    }
}

pub fn row_to_token_info(row: &HoneyTokenRow) -> TokenInfo {
    TokenInfo {
        token_type: row.token_type.clone(),
        token_value: row.token_value.clone(),
        triggered: row.triggered,
        triggered_at: row.triggered_at.map(|t| t.to_rfc3339()),
        triggered_by_ip: row.triggered_by_ip.clone(),
        triggered_by_session: row.triggered_by_session.map(|s| s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_zeroed() {
        let now = Utc::now();
        let s = SessionRow::fresh("1.2.3.4", "curl/8.0", now);
        assert_eq!(s.request_count, 0);
        assert_eq!(s.agent_likeness_score, 0);
        assert_eq!(s.classification, "unknown");
        assert!(s.endpoints_called.is_empty());
        assert!(s.classification_reasons.is_empty());
        assert!(!s.systematic_probing);
        assert_eq!(s.start_time, s.last_activity);
    }

    #[test]
    fn row_to_summary_maps_scoring_fields() {
        let now = Utc::now();
        let mut s = SessionRow::fresh("1.2.3.4", "curl/8.0", now);
        s.agent_likeness_score = 75;
        s.classification = "ai_agent".to_string();
        s.classification_reasons = vec!["docs_first".into(), "bot_user_agent".into()];
        let summary = row_to_summary(&s);
        assert_eq!(summary.agent_likeness_score, 75);
        assert_eq!(summary.classification, "ai_agent");
        assert_eq!(summary.classification_reasons.len(), 2);
        assert_eq!(summary.last_activity, now.to_rfc3339());
    }
}
