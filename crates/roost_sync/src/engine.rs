//! The entry point schedulers call.

use crate::config::SyncConfig;
use crate::coordinator::{PassResult, SyncCoordinator, SyncStats};
use crate::error::{SyncError, SyncResult};
use crate::gateway::RemoteGateway;
use parking_lot::{Mutex, RwLock};
use roost_core::{Entity, EntityType, RecordStore};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// A sync pass for one entity type, with its payload type erased.
pub trait SyncPass: Send + Sync {
    /// The entity type the pass syncs.
    fn entity_type(&self) -> &EntityType;

    /// Runs one pass.
    fn run_pass(&self) -> PassResult;

    /// Asks a running pass to stop.
    fn cancel(&self);

    /// Cumulative statistics.
    fn stats(&self) -> SyncStats;
}

impl<T, S, G> SyncPass for SyncCoordinator<T, S, G>
where
    T: Entity,
    S: RecordStore<T>,
    G: RemoteGateway<T>,
{
    fn entity_type(&self) -> &EntityType {
        SyncCoordinator::entity_type(self)
    }

    fn run_pass(&self) -> PassResult {
        SyncCoordinator::run_pass(self)
    }

    fn cancel(&self) {
        SyncCoordinator::cancel(self)
    }

    fn stats(&self) -> SyncStats {
        SyncCoordinator::stats(self)
    }
}

/// Registry of per-entity-type passes.
///
/// Passes for different entity types are independent and
/// [`SyncEngine::run_all`] runs them on a bounded pool of threads.
pub struct SyncEngine {
    config: SyncConfig,
    passes: RwLock<BTreeMap<EntityType, Arc<dyn SyncPass>>>,
}

impl SyncEngine {
    /// Creates an empty engine.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            passes: RwLock::new(BTreeMap::new()),
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Registers a pass.
    ///
    /// # Errors
    ///
    /// [`SyncError::DuplicateEntityType`] if the entity type already has one.
    pub fn register(&self, pass: Arc<dyn SyncPass>) -> SyncResult<()> {
        let entity_type = pass.entity_type().clone();
        let mut passes = self.passes.write();
        if passes.contains_key(&entity_type) {
            return Err(SyncError::DuplicateEntityType { entity_type });
        }
        debug!(%entity_type, "sync pass registered");
        passes.insert(entity_type, pass);
        Ok(())
    }

    /// Builds and registers a coordinator for `store` and `gateway`.
    pub fn register_table<T, S, G>(&self, store: Arc<S>, gateway: Arc<G>) -> SyncResult<()>
    where
        T: Entity,
        S: RecordStore<T> + 'static,
        G: RemoteGateway<T> + 'static,
    {
        let coordinator: SyncCoordinator<T, S, G> =
            SyncCoordinator::new(store, gateway, &self.config);
        self.register(Arc::new(coordinator))
    }

    /// Registered entity types, sorted.
    pub fn entity_types(&self) -> Vec<EntityType> {
        self.passes.read().keys().cloned().collect()
    }

    /// Runs one pass for `entity_type`.
    pub fn run_sync_pass(&self, entity_type: &EntityType) -> PassResult {
        let pass = self.passes.read().get(entity_type).cloned();
        match pass {
            Some(pass) => pass.run_pass(),
            None => PassResult::Failure(SyncError::UnknownEntityType {
                entity_type: entity_type.clone(),
            }),
        }
    }

    /// Runs a pass for every registered entity type.
    ///
    /// At most `max_concurrent_passes` run at once. Results come back in
    /// entity type order.
    pub fn run_all(&self) -> Vec<(EntityType, PassResult)> {
        let passes: Vec<Arc<dyn SyncPass>> = self.passes.read().values().cloned().collect();
        if passes.is_empty() {
            return Vec::new();
        }
        let workers = self.config.max_concurrent_passes.clamp(1, passes.len());
        let next = AtomicUsize::new(0);
        let results = Mutex::new(Vec::with_capacity(passes.len()));

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(pass) = passes.get(index) else {
                        break;
                    };
                    let result = pass.run_pass();
                    results
                        .lock()
                        .push((index, pass.entity_type().clone(), result));
                });
            }
        });

        let mut results = results.into_inner();
        results.sort_by_key(|(index, _, _)| *index);
        let succeeded = results.iter().filter(|(_, _, r)| r.is_success()).count();
        info!(
            passes = results.len(),
            succeeded,
            workers,
            "sync round finished"
        );
        results
            .into_iter()
            .map(|(_, entity_type, result)| (entity_type, result))
            .collect()
    }

    /// Cancels every running pass.
    pub fn cancel_all(&self) {
        for pass in self.passes.read().values() {
            pass.cancel();
        }
    }

    /// Statistics of every registered pass.
    pub fn stats(&self) -> Vec<(EntityType, SyncStats)> {
        self.passes
            .read()
            .iter()
            .map(|(entity_type, pass)| (entity_type.clone(), pass.stats()))
            .collect()
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::PassReport;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    /// Counts concurrent runs.
    struct ProbePass {
        entity_type: EntityType,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        cancelled: AtomicBool,
    }

    impl ProbePass {
        fn new(name: &str, running: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Arc<Self> {
            Arc::new(Self {
                entity_type: EntityType::new(name),
                running: Arc::clone(running),
                peak: Arc::clone(peak),
                cancelled: AtomicBool::new(false),
            })
        }
    }

    impl SyncPass for ProbePass {
        fn entity_type(&self) -> &EntityType {
            &self.entity_type
        }

        fn run_pass(&self) -> PassResult {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.running.fetch_sub(1, Ordering::SeqCst);
            PassResult::Success(PassReport::default())
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }

        fn stats(&self) -> SyncStats {
            SyncStats::default()
        }
    }

    #[test]
    fn run_all_respects_concurrency_bound() {
        let engine = SyncEngine::new(SyncConfig::new().with_max_concurrent_passes(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for name in ["a", "b", "c", "d", "e"] {
            engine.register(ProbePass::new(name, &running, &peak)).unwrap();
        }

        let results = engine.run_all();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|(_, r)| r.is_success()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        let names: Vec<_> = results.iter().map(|(t, _)| t.as_str().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn unknown_entity_type_fails() {
        let engine = SyncEngine::default();
        let result = engine.run_sync_pass(&EntityType::new("ghost"));
        assert!(matches!(
            result.failure(),
            Some(SyncError::UnknownEntityType { .. })
        ));
        assert!(engine.run_all().is_empty());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let engine = SyncEngine::default();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        engine.register(ProbePass::new("a", &running, &peak)).unwrap();
        assert!(matches!(
            engine.register(ProbePass::new("a", &running, &peak)),
            Err(SyncError::DuplicateEntityType { .. })
        ));
        assert_eq!(engine.entity_types(), vec![EntityType::new("a")]);
    }

    #[test]
    fn cancel_all_reaches_every_pass() {
        let engine = SyncEngine::default();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let a = ProbePass::new("a", &running, &peak);
        let b = ProbePass::new("b", &running, &peak);
        engine.register(a.clone()).unwrap();
        engine.register(b.clone()).unwrap();

        engine.cancel_all();
        assert!(a.cancelled.load(Ordering::SeqCst));
        assert!(b.cancelled.load(Ordering::SeqCst));
    }
}
