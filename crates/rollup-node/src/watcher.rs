//! Background task that switches the engine to evacuation mode once the
//! oldest pending request has waited out the expiration window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rollup_engine::{ActorError, EngineHandle};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::http::Clock;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub interval: Duration,
}

/// Counters shared with the task.
#[derive(Debug, Default)]
pub struct WatcherMetrics {
    cycles: AtomicU64,
    failures: AtomicU64,
    activations: AtomicU64,
}

impl WatcherMetrics {
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }
}

/// Keeps the watcher running. Drop or call [`WatcherHandle::stop`] to end it.
pub struct WatcherHandle {
    cancel: watch::Sender<bool>,
    metrics: Arc<WatcherMetrics>,
}

impl WatcherHandle {
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    pub fn metrics(&self) -> &WatcherMetrics {
        &self.metrics
    }
}

pub fn spawn_watcher(config: WatcherConfig, engine: EngineHandle, clock: Clock) -> WatcherHandle {
    let (cancel, cancel_rx) = watch::channel(false);
    let metrics = Arc::new(WatcherMetrics::default());
    tokio::spawn(run_watcher(config, engine, clock, cancel_rx, Arc::clone(&metrics)));
    WatcherHandle { cancel, metrics }
}

/// One check. Returns true if evacuation was activated.
pub async fn check_once(engine: &EngineHandle, now: u64) -> Result<bool, ActorError> {
    let due = engine
        .query(move |engine| engine.can_activate_evacuation(now))
        .await?;
    if !due {
        debug!(now, "no expired requests");
        return Ok(false);
    }
    engine.activate_evacuation(now).await?;
    Ok(true)
}

async fn run_watcher(
    config: WatcherConfig,
    engine: EngineHandle,
    clock: Clock,
    mut cancel_rx: watch::Receiver<bool>,
    metrics: Arc<WatcherMetrics>,
) {
    info!(interval_secs = config.interval.as_secs(), "starting evacuation watcher");
    let mut interval = tokio::time::interval(config.interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                metrics.cycles.fetch_add(1, Ordering::Relaxed);
                match check_once(&engine, clock()).await {
                    Ok(true) => {
                        metrics.activations.fetch_add(1, Ordering::Relaxed);
                        info!("evacuation activated by watcher");
                    }
                    Ok(false) => {}
                    Err(e) => {
                        metrics.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, code = e.code(), "watcher cycle failed");
                    }
                }
            }
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    info!("evacuation watcher shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rollup_core::{Address, StaticVerifier};
    use rollup_engine::{spawn, EngineConfig, NoopPersister, RollupEngine, TokenInfo};

    use super::*;

    fn handle() -> EngineHandle {
        let engine = RollupEngine::new(
            EngineConfig {
                expiration_window_secs: 100,
                ..EngineConfig::default()
            },
            [TokenInfo {
                token_id: 1,
                l1_address: Address([0xEE; 20]),
                decimals: 8,
            }],
            Arc::new(StaticVerifier::accept_all()),
            Arc::new(StaticVerifier::accept_all()),
        );
        spawn(engine, Arc::new(NoopPersister))
    }

    #[tokio::test]
    async fn activates_only_after_the_window() {
        let engine = handle();
        assert!(!check_once(&engine, 1_000).await.expect("check"));

        engine
            .mutate("register", |e| e.register(Address([1; 20]), 1, 10, 1_000))
            .await
            .expect("register");
        assert!(!check_once(&engine, 1_099).await.expect("check"));
        assert!(check_once(&engine, 1_100).await.expect("check"));
        assert!(engine.query(|e| e.is_evacu_mode()).await.expect("query"));

        // Already active: nothing more to do.
        assert!(!check_once(&engine, 2_000).await.expect("check"));
    }

    fn far_future() -> u64 {
        u64::MAX / 2
    }

    #[tokio::test]
    async fn background_task_activates_and_stops() {
        let engine = handle();
        engine
            .mutate("register", |e| e.register(Address([1; 20]), 1, 10, 5))
            .await
            .expect("register");

        let watcher = spawn_watcher(
            WatcherConfig {
                interval: Duration::from_millis(10),
            },
            engine.clone(),
            far_future,
        );
        for _ in 0..100 {
            if watcher.metrics().activations() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(watcher.metrics().activations(), 1);
        assert!(engine.query(|e| e.is_evacu_mode()).await.expect("query"));
        watcher.stop();
    }
}
