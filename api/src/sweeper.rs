use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time;

use crate::state::AppState;

/// Periodically evict expired rate windows and cached policy documents so
/// idle keys do not accumulate.
pub fn spawn_sweeper(state: AppState) -> JoinHandle<()> {
    let period = state.config.sweep_interval;
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sweep_once(&state, Utc::now());
        }
    })
}

fn sweep_once(state: &AppState, now: DateTime<Utc>) {
    let windows = state.limiter.sweep_expired(now);
    let documents = state.policy.sweep(now);
    if windows > 0 || documents > 0 {
        tracing::debug!(
            windows,
            documents,
            tracked_windows = state.limiter.tracked_windows(),
            "swept expired entries"
        );
    }
}
