//! Additive agent-likeness scoring.
//!
//! Rules fire in a fixed order. Each rule awards its points exactly once
//! per session: a tag already present in the session's reason set makes
//! the rule a no-op forever after. The score never decreases and is
//! capped at 100; classification is a pure function of the score.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::SessionRow;

use super::normalize::RequestMetadata;

pub const SCORE_CAP: i32 = 100;

/// Detector verdicts for the current request, computed before scoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verdicts {
    pub sql_injection: bool,
    pub bot_user_agent: bool,
    pub honey_token: bool,
    pub docs_path: bool,
    pub openapi_path: bool,
    pub admin_path: bool,
    pub internal_path: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Unknown,
    Human,
    Scraper,
    AiAgent,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Unknown => "unknown",
            Classification::Human => "human",
            Classification::Scraper => "scraper",
            Classification::AiAgent => "ai_agent",
        }
    }
}

/// `score >= 70` agent, `40..70` scraper, below that human.
pub fn classify(score: i32) -> Classification {
    if score >= 70 {
        Classification::AiAgent
    } else if score >= 40 {
        Classification::Scraper
    } else {
        Classification::Human
    }
}

/// Result of one scoring pass: the new (clamped) score, the tags added by
/// this request, and the full reason set after the union.
#[derive(Debug)]
pub struct ScoreOutcome {
    pub score: i32,
    pub new_reasons: Vec<String>,
    pub all_reasons: Vec<String>,
}

pub fn score_request(session: &SessionRow, meta: &RequestMetadata, v: &Verdicts) -> ScoreOutcome {
    let existing: BTreeSet<&str> = session
        .classification_reasons
        .iter()
        .map(String::as_str)
        .collect();

    // Projected accumulators: what the session will hold once this request
    // is merged in. Rules 2, 6 and 8 are defined over these.
    let mut endpoints: BTreeSet<&str> =
        session.endpoints_called.iter().map(String::as_str).collect();
    endpoints.insert(meta.path.as_str());
    let mut methods: BTreeSet<&str> = session.methods_used.iter().map(String::as_str).collect();
    methods.insert(meta.method.as_str());
    let next_count = session.request_count + 1;

    let mut score = session.agent_likeness_score;
    let mut new_reasons: Vec<String> = Vec::new();

    let mut award = |tag: &str, points: i32, triggered: bool| {
        if triggered && !existing.contains(tag) && !new_reasons.iter().any(|r| r == tag) {
            score += points;
            new_reasons.push(tag.to_string());
        }
    };

    award(
        "docs_first",
        20,
        (v.docs_path || v.openapi_path) && session.request_count < 3,
    );
    award("systematic_probing", 25, endpoints.len() > 5);
    award("admin_probing", 15, v.admin_path || v.internal_path);
    award("sql_injection", 25, v.sql_injection);
    award("bot_user_agent", 15, v.bot_user_agent);
    award("multiple_methods", 15, methods.len() > 2);
    award("honey_token", 30, v.honey_token);
    award(
        "high_diversity",
        10,
        next_count > 3 && endpoints.len() as f64 / next_count as f64 > 0.7,
    );
    award(
        "regular_intervals",
        25,
        session.interval_cv.is_some_and(|cv| cv < 0.3) && session.request_count >= 5,
    );

    let score = score.min(SCORE_CAP);

    let mut all: BTreeSet<String> = session.classification_reasons.iter().cloned().collect();
    all.extend(new_reasons.iter().cloned());

    ScoreOutcome {
        score,
        new_reasons,
        all_reasons: all.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::normalize::ApiKeyStatus;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn meta(method: &str, path: &str, ua: &str) -> RequestMetadata {
        RequestMetadata {
            ip: "1.2.3.4".to_string(),
            user_agent: ua.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            query: BTreeMap::new(),
            body: None,
            headers: BTreeMap::new(),
            api_key_status: ApiKeyStatus::None,
            api_key_used: None,
        }
    }

    fn fresh() -> SessionRow {
        SessionRow::fresh("1.2.3.4", "curl/8.0", Utc::now())
    }

    // ── classification thresholds ───────────────────────────────────

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify(0), Classification::Human);
        assert_eq!(classify(39), Classification::Human);
        assert_eq!(classify(40), Classification::Scraper);
        assert_eq!(classify(69), Classification::Scraper);
        assert_eq!(classify(70), Classification::AiAgent);
        assert_eq!(classify(100), Classification::AiAgent);
    }

    // ── scenario: cold-start documentation probe via curl ───────────

    #[test]
    fn cold_docs_probe_scores_35_human() {
        let session = fresh();
        let m = meta("GET", "/api/docs", "curl/8.0");
        let v = Verdicts {
            bot_user_agent: true,
            docs_path: true,
            ..Default::default()
        };
        let outcome = score_request(&session, &m, &v);
        assert_eq!(outcome.score, 35);
        assert_eq!(
            outcome.new_reasons,
            vec!["docs_first".to_string(), "bot_user_agent".to_string()]
        );
        assert_eq!(classify(outcome.score), Classification::Human);
    }

    // ── scenario: systematic admin enumeration tips into ai_agent ───

    /// Fold one scored request back into the session the way the store
    /// merge does, so sequences can be simulated serially.
    fn merge(session: &mut SessionRow, m: &RequestMetadata, outcome: &ScoreOutcome) {
        session.agent_likeness_score = outcome.score;
        session.classification_reasons = outcome.all_reasons.clone();
        session.classification = classify(outcome.score).as_str().to_string();
        session.request_count += 1;
        if !session.endpoints_called.contains(&m.path) {
            session.endpoints_called.push(m.path.clone());
        }
        if !session.methods_used.contains(&m.method) {
            session.methods_used.push(m.method.clone());
        }
    }

    #[test]
    fn admin_enumeration_sequence_escalates_to_ai_agent() {
        let mut session = fresh();

        // Request 1: docs probe via curl.
        let m = meta("GET", "/api/docs", "curl/8.0");
        let v = Verdicts {
            bot_user_agent: true,
            docs_path: true,
            ..Default::default()
        };
        let outcome = score_request(&session, &m, &v);
        assert_eq!(outcome.score, 35);
        merge(&mut session, &m, &outcome);

        // Requests 2..=7: six distinct admin endpoints.
        let mut last = 35;
        for i in 1..=6 {
            let m = meta("GET", &format!("/api/admin/{i}"), "curl/8.0");
            let v = Verdicts {
                bot_user_agent: true,
                admin_path: true,
                ..Default::default()
            };
            let outcome = score_request(&session, &m, &v);
            assert!(outcome.score >= last, "score must be monotonic");
            last = outcome.score;
            merge(&mut session, &m, &outcome);

            match i {
                // admin_probing fires on the first admin hit.
                1 => assert_eq!(session.agent_likeness_score, 50),
                // all endpoints distinct, so high_diversity joins at
                // request 4 (count 4, ratio 1.0).
                3 => assert_eq!(session.agent_likeness_score, 60),
                // 6th distinct endpoint crosses the probing threshold.
                5 => assert_eq!(session.agent_likeness_score, 85),
                _ => {}
            }
        }

        assert_eq!(session.agent_likeness_score, 85);
        assert_eq!(session.classification, "ai_agent");
        assert_eq!(session.endpoints_called.len(), 7);
        assert!(session.classification_reasons.contains(&"systematic_probing".to_string()));
        assert!(session.classification_reasons.contains(&"admin_probing".to_string()));
        assert!(session.classification_reasons.contains(&"high_diversity".to_string()));
    }

    // ── reason idempotence & monotonicity ───────────────────────────

    #[test]
    fn tags_never_pay_twice() {
        let mut session = fresh();
        let m = meta("GET", "/api/docs", "curl/8.0");
        let v = Verdicts {
            bot_user_agent: true,
            docs_path: true,
            ..Default::default()
        };
        let first = score_request(&session, &m, &v);
        session.agent_likeness_score = first.score;
        session.classification_reasons = first.all_reasons.clone();
        session.request_count = 1;
        session.endpoints_called = vec!["/api/docs".to_string()];
        session.methods_used = vec!["GET".to_string()];

        let second = score_request(&session, &m, &v);
        assert_eq!(second.score, first.score);
        assert!(second.new_reasons.is_empty());
    }

    #[test]
    fn score_is_clamped_at_100() {
        let mut session = fresh();
        session.agent_likeness_score = 95;
        let m = meta("POST", "/api/admin/x", "python-requests/2.31");
        let v = Verdicts {
            sql_injection: true,
            bot_user_agent: true,
            honey_token: true,
            admin_path: true,
            ..Default::default()
        };
        let outcome = score_request(&session, &m, &v);
        assert_eq!(outcome.score, 100);
    }

    // ── individual rules ────────────────────────────────────────────

    #[test]
    fn docs_first_requires_early_request() {
        let mut session = fresh();
        session.request_count = 3;
        let m = meta("GET", "/api/docs", "x");
        let v = Verdicts { docs_path: true, ..Default::default() };
        let outcome = score_request(&session, &m, &v);
        assert!(!outcome.new_reasons.contains(&"docs_first".to_string()));
    }

    #[test]
    fn sql_injection_awards_25() {
        let session = fresh();
        let m = meta("GET", "/api/users", "Mozilla/5.0");
        let v = Verdicts { sql_injection: true, ..Default::default() };
        let outcome = score_request(&session, &m, &v);
        assert_eq!(outcome.score, 25);
        assert_eq!(outcome.new_reasons, vec!["sql_injection".to_string()]);
    }

    #[test]
    fn honey_token_awards_30_once() {
        let mut session = fresh();
        let m = meta("POST", "/api/x", "Mozilla/5.0");
        let v = Verdicts { honey_token: true, ..Default::default() };
        let first = score_request(&session, &m, &v);
        assert_eq!(first.score, 30);

        session.agent_likeness_score = first.score;
        session.classification_reasons = first.all_reasons.clone();
        let second = score_request(&session, &m, &v);
        assert_eq!(second.score, 30);
    }

    #[test]
    fn multiple_methods_counts_current_request() {
        let mut session = fresh();
        session.methods_used = vec!["GET".to_string(), "POST".to_string()];
        session.request_count = 2;
        let m = meta("DELETE", "/api/x", "x");
        let outcome = score_request(&session, &m, &Verdicts::default());
        assert!(outcome.new_reasons.contains(&"multiple_methods".to_string()));
        assert_eq!(outcome.score, 15);
    }

    #[test]
    fn high_diversity_needs_enough_requests_and_ratio() {
        let mut session = fresh();
        session.request_count = 3; // next_count = 4
        session.endpoints_called = vec![
            "/a".to_string(),
            "/b".to_string(),
            "/c".to_string(),
        ];
        let m = meta("GET", "/d", "x");
        let outcome = score_request(&session, &m, &Verdicts::default());
        // 4 unique endpoints over 4 requests: ratio 1.0 > 0.7
        assert!(outcome.new_reasons.contains(&"high_diversity".to_string()));

        let mut dense = fresh();
        dense.request_count = 9; // next_count = 10
        dense.endpoints_called = vec!["/a".to_string(), "/b".to_string()];
        let outcome = score_request(&dense, &m, &Verdicts::default());
        assert!(!outcome.new_reasons.contains(&"high_diversity".to_string()));
    }

    #[test]
    fn regular_intervals_gated_on_cv_and_count() {
        let mut session = fresh();
        session.request_count = 5;
        session.interval_cv = Some(0.1);
        let m = meta("GET", "/api/x", "x");
        let outcome = score_request(&session, &m, &Verdicts::default());
        assert!(outcome.new_reasons.contains(&"regular_intervals".to_string()));
        assert_eq!(outcome.score, 25);

        session.interval_cv = Some(0.5);
        let outcome = score_request(&session, &m, &Verdicts::default());
        assert!(!outcome.new_reasons.contains(&"regular_intervals".to_string()));

        session.interval_cv = Some(0.1);
        session.request_count = 4;
        let outcome = score_request(&session, &m, &Verdicts::default());
        assert!(!outcome.new_reasons.contains(&"regular_intervals".to_string()));
    }

    #[test]
    fn all_reasons_is_union_of_old_and_new() {
        let mut session = fresh();
        session.classification_reasons = vec!["docs_first".to_string()];
        session.agent_likeness_score = 20;
        let m = meta("GET", "/api/users", "curl/8.0");
        let v = Verdicts { bot_user_agent: true, ..Default::default() };
        let outcome = score_request(&session, &m, &v);
        assert!(outcome.all_reasons.contains(&"docs_first".to_string()));
        assert!(outcome.all_reasons.contains(&"bot_user_agent".to_string()));
        assert_eq!(outcome.score, 35);
    }
}
