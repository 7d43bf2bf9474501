// HiveTrap — application state

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use sqlx::PgPool;
use tokio::sync::Semaphore;

use crate::detection::tokens::TokenRegistry;

/// Default bait key: the "leaked" credential the landing page dangles.
/// Override with HIVETRAP_BAIT_KEY.
pub const DEFAULT_BAIT_KEY: &str = "sk_live_51HoneypotBaitKey000000";

/// Upper bound on concurrently running analyses.
pub const ANALYSIS_GATE: usize = 256;

/// Process-lifetime trap counters, exported via /_hive/stats and
/// /_hive/metrics.
#[derive(Default)]
pub struct TrapCounters {
    pub trap_requests: AtomicU64,
    pub analyses_completed: AtomicU64,
    pub analyses_dropped: AtomicU64,
}

/// Central application state. Clone-friendly — PgPool and Arc are both Clone.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub tokens: TokenRegistry,
    pub bait_key: String,
    pub start_time: Instant,
    pub stats: Arc<TrapCounters>,
    /// Bounds the in-flight analysis set; see `detection::dispatch`.
    pub analysis_permits: Arc<Semaphore>,
    /// `true` once startup finished loading the token catalogue.
    pub ready: Arc<AtomicBool>,
    /// Optional auth secret from AUTH_SECRET env. None = dev mode (no auth).
    pub auth_secret: Option<String>,
}

impl AppState {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
        tracing::info!("trap marked as READY");
    }
}

impl AppState {
    pub async fn new(db: PgPool) -> Self {
        let bait_key = std::env::var("HIVETRAP_BAIT_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BAIT_KEY.to_string());

        let tokens = TokenRegistry::load(&db).await;
        tokens.ensure_bait_key(&db, &bait_key).await;

        let auth_secret = std::env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());
        if auth_secret.is_some() {
            tracing::info!("AUTH_SECRET configured — operator endpoints require auth");
        } else {
            tracing::info!("AUTH_SECRET not set — operator endpoints open (dev mode)");
        }

        Self {
            db,
            tokens,
            bait_key,
            start_time: Instant::now(),
            stats: Arc::new(TrapCounters::default()),
            analysis_permits: Arc::new(Semaphore::new(ANALYSIS_GATE)),
            ready: Arc::new(AtomicBool::new(false)),
            auth_secret,
        }
    }
}
