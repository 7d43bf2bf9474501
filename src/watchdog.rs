// HiveTrap — background watchdog
//
// Periodically checks trap health:
// - store connectivity ping (while the store is down, analyses degrade
//   to temporary in-memory sessions and nothing persists)
// - honey token registry refresh (picks up tokens seeded out-of-band,
//   reports how much of the catalogue has been taken)

use std::time::Duration;

use crate::state::AppState;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);
const STORE_PING_TIMEOUT: Duration = Duration::from_secs(5);
/// Refresh the token catalogue every Nth tick.
const TOKEN_REFRESH_TICKS: u64 = 5;

pub fn spawn(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("watchdog: started (interval={}s)", CHECK_INTERVAL.as_secs());
        let mut tick: u64 = 0;

        loop {
            tokio::time::sleep(CHECK_INTERVAL).await;
            tick += 1;

            if !store_reachable(&state).await {
                tracing::warn!(
                    "watchdog: store unreachable — analyses fall back to temporary \
                     sessions and records are lost until it returns"
                );
                continue;
            }

            if tick % TOKEN_REFRESH_TICKS == 0 {
                state.tokens.refresh(&state.db).await;
                let snapshot = state.tokens.snapshot().await;
                let triggered = snapshot.iter().filter(|t| t.triggered).count();
                tracing::info!(
                    "watchdog: token registry refreshed — {} tokens, {} triggered",
                    snapshot.len(),
                    triggered,
                );
            } else {
                tracing::debug!("watchdog: store ok");
            }
        }
    })
}

/// Plain liveness ping against the store, bounded so a hung pool cannot
/// stall the watchdog loop.
async fn store_reachable(state: &AppState) -> bool {
    let result = tokio::time::timeout(
        STORE_PING_TIMEOUT,
        sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&state.db),
    )
    .await;

    match result {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::error!("watchdog: store ping failed: {}", e);
            false
        }
        Err(_) => {
            tracing::error!(
                "watchdog: store ping timed out after {}s",
                STORE_PING_TIMEOUT.as_secs()
            );
            false
        }
    }
}
