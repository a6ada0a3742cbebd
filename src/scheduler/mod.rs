//! Periodic detection trigger.
//!
//! The engine holds no timers of its own. This loop is the scheduler side of
//! the trigger interface: on every tick it fans detection out across keywords
//! on tokio's blocking pool and waits for the round to finish before the next
//! tick, so rounds never overlap.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::engine::{SpikeEngine, TriggerReport};

/// Run one detection round with one blocking task per keyword.
pub async fn run_detection_round(engine: Arc<SpikeEngine>) -> TriggerReport {
    let start = Instant::now();
    let mut tasks = JoinSet::new();
    for keyword in engine.keywords() {
        let engine = Arc::clone(&engine);
        tasks.spawn_blocking(move || {
            let result = engine.detect_keyword(&keyword);
            (keyword, result)
        });
    }

    let mut report = TriggerReport::default();
    while let Some(joined) = tasks.join_next().await {
        report.keywords_scanned += 1;
        match joined {
            Ok((_, Ok(events))) => report.spikes_registered += events.len(),
            Ok((keyword, Err(e))) => {
                warn!(%keyword, error = %e, "detection failed");
                report.failures += 1;
            }
            Err(e) => {
                error!("detection task panicked: {}", e);
                report.failures += 1;
            }
        }
    }
    report.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    report
}

/// Main scheduler loop. Never returns; abort the task to stop it.
pub async fn run_detection_loop(engine: Arc<SpikeEngine>, cadence: Duration) {
    info!(cadence_secs = cadence.as_secs(), "detection scheduler started");

    let mut interval = tokio::time::interval(cadence);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so a round sees some data.
    interval.tick().await;

    loop {
        interval.tick().await;
        let report = run_detection_round(Arc::clone(&engine)).await;
        info!(
            keywords = report.keywords_scanned,
            spikes = report.spikes_registered,
            failures = report.failures,
            elapsed_ms = report.elapsed_ms,
            "scheduled detection round complete"
        );
    }
}
