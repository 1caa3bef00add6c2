//! Periodic driver for [`SyncEngine`].
//!
//! The engine itself is synchronous. `PeriodicSync` runs its rounds on the
//! tokio blocking pool, waking on a timer, on [`PeriodicSync::trigger`], or
//! on shutdown.

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to a running periodic driver.
pub struct PeriodicSync {
    engine: Arc<SyncEngine>,
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    rounds: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl PeriodicSync {
    /// Starts the driver on the current tokio runtime.
    ///
    /// The first round runs after one `sync_interval` unless
    /// [`trigger`](Self::trigger) is called sooner.
    pub fn spawn(engine: Arc<SyncEngine>) -> Self {
        let trigger = Arc::new(Notify::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let rounds = Arc::new(AtomicU64::new(0));

        let handle = tokio::spawn(drive(
            Arc::clone(&engine),
            Arc::clone(&trigger),
            shutdown_rx,
            Arc::clone(&rounds),
        ));

        Self {
            engine,
            trigger,
            shutdown,
            rounds,
            handle,
        }
    }

    /// Requests a round now.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Number of completed rounds.
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::SeqCst)
    }

    /// Cancels running passes and waits for the driver to stop.
    ///
    /// # Errors
    ///
    /// [`SyncError::Driver`] if the driver task panicked.
    pub async fn shutdown(self) -> SyncResult<()> {
        self.engine.cancel_all();
        let _ = self.shutdown.send(true);
        self.handle
            .await
            .map_err(|e| SyncError::Driver(e.to_string()))?;
        info!("periodic sync stopped");
        Ok(())
    }
}

async fn drive(
    engine: Arc<SyncEngine>,
    trigger: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
    rounds: Arc<AtomicU64>,
) {
    let interval = engine.config().sync_interval;
    let retry = engine.config().retry.clone();
    let mut failures: u32 = 0;
    let mut delay = interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = trigger.notified() => debug!("sync round triggered"),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        if *shutdown.borrow() {
            break;
        }

        let round_engine = Arc::clone(&engine);
        let results = match tokio::task::spawn_blocking(move || round_engine.run_all()).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "sync round panicked");
                Vec::new()
            }
        };
        let round = rounds.fetch_add(1, Ordering::SeqCst) + 1;

        let clean = !results.is_empty() && results.iter().all(|(_, r)| r.is_success());
        if clean || results.is_empty() {
            failures = 0;
            delay = interval;
        } else {
            failures = failures.saturating_add(1);
            delay = retry.delay_for_attempt(failures).min(interval);
            warn!(round, failures, delay_ms = delay.as_millis() as u64, "sync round incomplete");
        }
        debug!(round, passes = results.len(), "sync round done");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::coordinator::{PassReport, PassResult, SyncStats};
    use crate::engine::SyncPass;
    use roost_core::EntityType;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingPass {
        entity_type: EntityType,
        runs: Arc<AtomicUsize>,
        succeed: bool,
    }

    impl SyncPass for CountingPass {
        fn entity_type(&self) -> &EntityType {
            &self.entity_type
        }

        fn run_pass(&self) -> PassResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                PassResult::Success(PassReport::default())
            } else {
                PassResult::Failure(SyncError::Driver("offline".into()))
            }
        }

        fn cancel(&self) {}

        fn stats(&self) -> SyncStats {
            SyncStats::default()
        }
    }

    fn engine_with(interval: Duration, succeed: bool) -> (Arc<SyncEngine>, Arc<AtomicUsize>) {
        let engine = Arc::new(SyncEngine::new(
            SyncConfig::new().with_sync_interval(interval),
        ));
        let runs = Arc::new(AtomicUsize::new(0));
        engine
            .register(Arc::new(CountingPass {
                entity_type: EntityType::new("flock"),
                runs: Arc::clone(&runs),
                succeed,
            }))
            .unwrap();
        (engine, runs)
    }

    async fn wait_for_rounds(driver: &PeriodicSync, rounds: u64) {
        for _ in 0..200 {
            if driver.rounds() >= rounds {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("driver completed {} rounds, wanted {rounds}", driver.rounds());
    }

    #[tokio::test]
    async fn trigger_runs_a_round_immediately() {
        let (engine, runs) = engine_with(Duration::from_secs(3600), true);
        let driver = PeriodicSync::spawn(engine);

        driver.trigger();
        wait_for_rounds(&driver, 1).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        driver.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn interval_drives_repeated_rounds() {
        let (engine, runs) = engine_with(Duration::from_millis(20), true);
        let driver = PeriodicSync::spawn(engine);

        wait_for_rounds(&driver, 3).await;
        assert!(runs.load(Ordering::SeqCst) >= 3);

        driver.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn failing_rounds_keep_retrying_within_interval() {
        let (engine, runs) = engine_with(Duration::from_millis(30), false);
        let driver = PeriodicSync::spawn(engine);

        wait_for_rounds(&driver, 2).await;
        assert!(runs.load(Ordering::SeqCst) >= 2);

        driver.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_the_driver() {
        let (engine, runs) = engine_with(Duration::from_secs(3600), true);
        let driver = PeriodicSync::spawn(engine);
        driver.shutdown().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
