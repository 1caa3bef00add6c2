//! Repeated passes against a server with transient failures.

use proptest::prelude::*;
use roost_core::{RecordStore, SyncState, Table};
use roost_domain::Flock;
use roost_sync::{GatewayError, SyncConfig, SyncCoordinator};
use roost_testkit::{flock_strategy, init_test_logging, InMemoryRemote, TestStore};
use std::sync::Arc;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn passes_reach_ok_within_attempt_cap(
        flocks in prop::collection::vec(flock_strategy(), 1..8),
        failures in prop::collection::vec(0u32..5, 8),
    ) {
        init_test_logging();
        let config = SyncConfig::default();
        let cap = config.retry.max_attempts;
        prop_assume!(failures.iter().all(|&k| k < cap));

        let store = TestStore::memory();
        let table = store.table::<Flock>().unwrap();
        let remote = Arc::new(InMemoryRemote::new());
        let coordinator: SyncCoordinator<Flock, Table<Flock>, InMemoryRemote<Flock>> =
            SyncCoordinator::new(Arc::clone(&table), Arc::clone(&remote), &config);

        for flock in &flocks {
            table.create(flock.clone()).unwrap();
        }
        let injected: u32 = failures.iter().take(flocks.len()).sum();
        remote.fail_next_pushes(injected as usize, GatewayError::Timeout);

        for _ in 0..cap {
            coordinator.run_pass();
        }

        prop_assert!(table.get_unsynced().unwrap().is_empty());
        prop_assert!(table.needing_attention().unwrap().is_empty());
        prop_assert_eq!(table.get_by_state(SyncState::Ok).unwrap().len(), flocks.len());
        prop_assert_eq!(remote.len(), flocks.len());
        prop_assert_eq!(remote.push_count(), flocks.len() + injected as usize);
    }
}
