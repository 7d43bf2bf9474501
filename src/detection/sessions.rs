//! Postgres-backed session store keyed by `(ip, user_agent)` with a
//! sliding activity timeout.
//!
//! All session-merging fields are commutative at the store: array union,
//! boolean OR, GREATEST on the score, atomic increment on the request
//! count. Concurrent analyses of the same key can interleave freely
//! without losing a reason tag, unlatching a flag, or lowering the score.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::SessionRow;

/// A session goes stale after 10 minutes without activity.
pub const SESSION_TIMEOUT_MINUTES: i64 = 10;

fn activity_floor(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::minutes(SESSION_TIMEOUT_MINUTES)
}

/// Return the live session for `(ip, user_agent)`, or start a fresh one.
///
/// The fallback upsert is a single atomic statement: a concurrent creator
/// hitting the same key converges on the same stored row, and an expired
/// row is recycled in place (new id, zeroed accumulators) without
/// violating the unique key.
pub async fn get_or_create(
    db: &PgPool,
    ip: &str,
    user_agent: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<SessionRow> {
    let floor = activity_floor(now);

    if let Some(live) = sqlx::query_as::<_, SessionRow>(
        "SELECT * FROM ht_sessions WHERE ip = $1 AND user_agent = $2 AND last_activity >= $3",
    )
    .bind(ip)
    .bind(user_agent)
    .bind(floor)
    .fetch_optional(db)
    .await?
    {
        return Ok(live);
    }

    let template = SessionRow::fresh(ip, user_agent, now);
    sqlx::query_as::<_, SessionRow>(
        "INSERT INTO ht_sessions (id, ip, user_agent, start_time, last_activity) \
         VALUES ($1, $2, $3, $4, $4) \
         ON CONFLICT (ip, user_agent) DO UPDATE SET \
           id                      = CASE WHEN ht_sessions.last_activity < $5 THEN EXCLUDED.id ELSE ht_sessions.id END, \
           start_time              = CASE WHEN ht_sessions.last_activity < $5 THEN EXCLUDED.start_time ELSE ht_sessions.start_time END, \
           end_time                = CASE WHEN ht_sessions.last_activity < $5 THEN NULL ELSE ht_sessions.end_time END, \
           request_count           = CASE WHEN ht_sessions.last_activity < $5 THEN 0 ELSE ht_sessions.request_count END, \
           endpoints_called        = CASE WHEN ht_sessions.last_activity < $5 THEN '{}' ELSE ht_sessions.endpoints_called END, \
           methods_used            = CASE WHEN ht_sessions.last_activity < $5 THEN '{}' ELSE ht_sessions.methods_used END, \
           looked_at_docs          = CASE WHEN ht_sessions.last_activity < $5 THEN FALSE ELSE ht_sessions.looked_at_docs END, \
           tried_openapi           = CASE WHEN ht_sessions.last_activity < $5 THEN FALSE ELSE ht_sessions.tried_openapi END, \
           tried_admin             = CASE WHEN ht_sessions.last_activity < $5 THEN FALSE ELSE ht_sessions.tried_admin END, \
           tried_internal          = CASE WHEN ht_sessions.last_activity < $5 THEN FALSE ELSE ht_sessions.tried_internal END, \
           systematic_probing      = CASE WHEN ht_sessions.last_activity < $5 THEN FALSE ELSE ht_sessions.systematic_probing END, \
           sql_injection_attempted = CASE WHEN ht_sessions.last_activity < $5 THEN FALSE ELSE ht_sessions.sql_injection_attempted END, \
           used_honey_token        = CASE WHEN ht_sessions.last_activity < $5 THEN FALSE ELSE ht_sessions.used_honey_token END, \
           interval_count          = CASE WHEN ht_sessions.last_activity < $5 THEN 0 ELSE ht_sessions.interval_count END, \
           interval_mean_ms        = CASE WHEN ht_sessions.last_activity < $5 THEN NULL ELSE ht_sessions.interval_mean_ms END, \
           interval_cv             = CASE WHEN ht_sessions.last_activity < $5 THEN NULL ELSE ht_sessions.interval_cv END, \
           interval_m2             = CASE WHEN ht_sessions.last_activity < $5 THEN 0 ELSE ht_sessions.interval_m2 END, \
           agent_likeness_score    = CASE WHEN ht_sessions.last_activity < $5 THEN 0 ELSE ht_sessions.agent_likeness_score END, \
           classification          = CASE WHEN ht_sessions.last_activity < $5 THEN 'unknown' ELSE ht_sessions.classification END, \
           classification_reasons  = CASE WHEN ht_sessions.last_activity < $5 THEN '{}' ELSE ht_sessions.classification_reasons END, \
           last_activity           = CASE WHEN ht_sessions.last_activity < $5 THEN EXCLUDED.last_activity ELSE ht_sessions.last_activity END \
         RETURNING *",
    )
    .bind(template.id)
    .bind(ip)
    .bind(user_agent)
    .bind(now)
    .bind(floor)
    .fetch_one(db)
    .await
}

/// The per-request session mutation computed by the analyzer.
#[derive(Debug, Clone)]
pub struct SessionDiff {
    pub path: String,
    pub method: String,
    pub looked_at_docs: bool,
    pub tried_openapi: bool,
    pub tried_admin: bool,
    pub tried_internal: bool,
    pub sql_injection_attempted: bool,
    pub used_honey_token: bool,
    pub agent_likeness_score: i32,
    pub classification: String,
    pub classification_reasons: Vec<String>,
    pub last_activity: DateTime<Utc>,
    pub intervals: IntervalStats,
}

/// Apply a diff with merge semantics that survive concurrent writers:
/// set-union on arrays, OR on flags, GREATEST on the score, atomic
/// increment on the count. `systematic_probing` is recomputed from the
/// post-union endpoint set inside the same statement, so the flag and the
/// set can never disagree.
pub async fn apply_diff(db: &PgPool, id: Uuid, diff: &SessionDiff) -> sqlx::Result<()> {
    let affected = sqlx::query(
        "UPDATE ht_sessions SET \
           request_count           = request_count + 1, \
           endpoints_called        = (SELECT COALESCE(array_agg(DISTINCT e), '{}') FROM unnest(endpoints_called || $2) AS e), \
           methods_used            = (SELECT COALESCE(array_agg(DISTINCT m), '{}') FROM unnest(methods_used || $3) AS m), \
           classification_reasons  = (SELECT COALESCE(array_agg(DISTINCT r), '{}') FROM unnest(classification_reasons || $4) AS r), \
           looked_at_docs          = looked_at_docs OR $5, \
           tried_openapi           = tried_openapi OR $6, \
           tried_admin             = tried_admin OR $7, \
           tried_internal          = tried_internal OR $8, \
           sql_injection_attempted = sql_injection_attempted OR $9, \
           used_honey_token        = used_honey_token OR $10, \
           systematic_probing      = cardinality((SELECT COALESCE(array_agg(DISTINCT e), '{}') FROM unnest(endpoints_called || $2) AS e)) > 5, \
           agent_likeness_score    = GREATEST(agent_likeness_score, $11), \
           classification          = $12, \
           last_activity           = $13, \
           interval_count          = $14, \
           interval_mean_ms        = $15, \
           interval_cv             = $16, \
           interval_m2             = $17 \
         WHERE id = $1",
    )
    .bind(id)
    .bind(vec![diff.path.clone()])
    .bind(vec![diff.method.clone()])
    .bind(&diff.classification_reasons)
    .bind(diff.looked_at_docs)
    .bind(diff.tried_openapi)
    .bind(diff.tried_admin)
    .bind(diff.tried_internal)
    .bind(diff.sql_injection_attempted)
    .bind(diff.used_honey_token)
    .bind(diff.agent_likeness_score)
    .bind(&diff.classification)
    .bind(diff.last_activity)
    .bind(diff.intervals.count)
    .bind(diff.intervals.mean_ms)
    .bind(diff.intervals.cv)
    .bind(diff.intervals.m2)
    .execute(db)
    .await?
    .rows_affected();

    if affected == 0 {
        tracing::warn!(session = %id, "session diff matched no row (recycled under load?)");
    }
    Ok(())
}

// ── Inter-arrival interval statistics ───────────────────────────────

/// Welford accumulators over inter-arrival intervals. The running mean
/// exists from the first sample; the coefficient of variation from 5.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalStats {
    pub count: i32,
    pub mean_ms: Option<f64>,
    pub cv: Option<f64>,
    pub m2: f64,
}

impl IntervalStats {
    pub fn from_session(s: &SessionRow) -> Self {
        Self {
            count: s.interval_count,
            mean_ms: s.interval_mean_ms,
            cv: s.interval_cv,
            m2: s.interval_m2,
        }
    }
}

/// Fold one new inter-arrival interval (milliseconds) into the stats.
/// The running mean is kept from the first sample (the recurrence needs
/// it); the coefficient of variation only appears at 5 samples.
pub fn merge_interval(prior: &IntervalStats, interval_ms: f64) -> IntervalStats {
    let count = prior.count + 1;
    let prior_mean = prior.mean_ms.unwrap_or(0.0);

    let delta = interval_ms - prior_mean;
    let mean = prior_mean + delta / count as f64;
    let m2 = prior.m2 + delta * (interval_ms - mean);

    let cv = if count >= 5 && mean > 0.0 {
        Some((m2 / count as f64).sqrt() / mean)
    } else {
        None
    };

    IntervalStats {
        count,
        mean_ms: Some(mean),
        cv,
        m2,
    }
}

/// Compute the interval stats for a session after observing a request at
/// `now`. The first request of a session contributes no interval.
pub fn intervals_after(session: &SessionRow, now: DateTime<Utc>) -> IntervalStats {
    let prior = IntervalStats::from_session(session);
    if session.request_count == 0 {
        return prior;
    }
    let interval_ms = (now - session.last_activity).num_milliseconds().max(0) as f64;
    merge_interval(&prior, interval_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn zero() -> IntervalStats {
        IntervalStats { count: 0, mean_ms: None, cv: None, m2: 0.0 }
    }

    #[test]
    fn first_interval_sets_mean() {
        let s = merge_interval(&zero(), 1000.0);
        assert_eq!(s.count, 1);
        assert_eq!(s.mean_ms, Some(1000.0));
        assert!(s.cv.is_none());
    }

    #[test]
    fn perfectly_regular_intervals_have_cv_zero() {
        let mut s = zero();
        for _ in 0..5 {
            s = merge_interval(&s, 2000.0);
        }
        assert_eq!(s.count, 5);
        assert_eq!(s.mean_ms, Some(2000.0));
        assert_eq!(s.cv, Some(0.0));
    }

    #[test]
    fn cv_hidden_until_five_samples() {
        let mut s = zero();
        for _ in 0..4 {
            s = merge_interval(&s, 2000.0);
        }
        assert!(s.cv.is_none());
        s = merge_interval(&s, 2000.0);
        assert!(s.cv.is_some());
    }

    #[test]
    fn irregular_intervals_have_high_cv() {
        let mut s = zero();
        for interval in [100.0, 9000.0, 250.0, 12000.0, 50.0] {
            s = merge_interval(&s, interval);
        }
        assert!(s.cv.unwrap() > 0.3, "cv was {:?}", s.cv);
    }

    #[test]
    fn machine_regular_intervals_stay_below_threshold() {
        let mut s = zero();
        for interval in [1000.0, 1050.0, 980.0, 1020.0, 995.0, 1010.0] {
            s = merge_interval(&s, interval);
        }
        assert!(s.cv.unwrap() < 0.3, "cv was {:?}", s.cv);
    }

    #[test]
    fn first_request_contributes_no_interval() {
        let now = Utc::now();
        let session = crate::models::SessionRow::fresh("1.2.3.4", "ua", now);
        let s = intervals_after(&session, now + chrono::Duration::seconds(3));
        assert_eq!(s.count, 0);
    }

    #[test]
    fn second_request_contributes_one_interval() {
        let now = Utc::now();
        let mut session = crate::models::SessionRow::fresh("1.2.3.4", "ua", now);
        session.request_count = 1;
        let s = intervals_after(&session, now + chrono::Duration::seconds(3));
        assert_eq!(s.count, 1);
        assert_eq!(s.mean_ms, Some(3000.0));
    }

    #[test]
    fn activity_floor_is_ten_minutes() {
        let now = Utc::now();
        assert_eq!(now - activity_floor(now), chrono::Duration::minutes(10));
    }
}
