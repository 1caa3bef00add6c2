//! End-to-end sync scenarios against scripted and reference servers.

use roost_core::{
    FailureKind, RecordId, RecordStore, RemoteRecord, ServerAck, SyncState, SyncableRecord, Table,
    Timestamp,
};
use roost_domain::{Flock, FlockType};
use roost_sync::{
    resolve, GatewayError, MockGateway, PassError, ResolvedAction, SyncConfig, SyncCoordinator,
};
use roost_testkit::{init_test_logging, InMemoryRemote, TestStore};
use std::sync::Arc;

type Scripted = SyncCoordinator<Flock, Table<Flock>, MockGateway<Flock>>;
type Served = SyncCoordinator<Flock, Table<Flock>, InMemoryRemote<Flock>>;

fn flock(name: &str) -> Flock {
    Flock::new("farmer-1", name, FlockType::Layer)
}

fn ts(millis: u64) -> Timestamp {
    Timestamp::from_millis(millis)
}

fn id(value: &str) -> RecordId {
    RecordId::new(value)
}

fn scripted(store: &TestStore) -> (Arc<Table<Flock>>, Arc<MockGateway<Flock>>, Scripted) {
    init_test_logging();
    let table = store.table::<Flock>().unwrap();
    let gateway = Arc::new(MockGateway::new());
    let coordinator = SyncCoordinator::new(
        Arc::clone(&table),
        Arc::clone(&gateway),
        &SyncConfig::default(),
    );
    (table, gateway, coordinator)
}

/// One device syncing against a shared server.
struct Device {
    _store: TestStore,
    table: Arc<Table<Flock>>,
    sync: Served,
}

impl Device {
    fn new(remote: &Arc<InMemoryRemote<Flock>>) -> Self {
        init_test_logging();
        let store = TestStore::memory();
        let table = store.table::<Flock>().unwrap();
        let sync = SyncCoordinator::new(Arc::clone(&table), Arc::clone(remote), &SyncConfig::default());
        Self {
            _store: store,
            table,
            sync,
        }
    }

    fn names(&self) -> Vec<(String, String)> {
        let mut names: Vec<_> = self
            .table
            .get_all()
            .unwrap()
            .into_iter()
            .map(|r| (r.id().to_string(), r.payload().name.clone()))
            .collect();
        names.sort();
        names
    }
}

#[test]
fn scenario_a_offline_create_adopts_server_id() {
    let store = TestStore::memory();
    let (table, gateway, coordinator) = scripted(&store);
    let r1 = table.create_with_id(id("r1"), flock("Layers")).unwrap();
    assert_eq!(r1.sync_state(), SyncState::PendingCreate);
    gateway.push_response(Ok(ServerAck::new("S1", ts(100))));

    assert!(coordinator.run_pass().is_success());

    assert!(table.get(&id("r1")).unwrap().is_none());
    let synced = table.get(&id("S1")).unwrap().unwrap();
    assert_eq!(synced.sync_state(), SyncState::Ok);
    assert!(!synced.needs_sync());
    assert_eq!(synced.sync_attempts(), 0);
    assert_eq!(synced.server_last_updated(), Some(ts(100)));
    assert_eq!(synced.payload(), &flock("Layers"));
}

#[test]
fn scenario_b_newer_remote_overwrites_synced_record() {
    let store = TestStore::memory();
    let (table, gateway, coordinator) = scripted(&store);
    table
        .upsert(SyncableRecord::synced(id("r2"), flock("old"), ts(100)))
        .unwrap();
    gateway.pull_response(Ok(vec![RemoteRecord::live("r2", flock("new"), ts(200))]));

    let result = coordinator.run_pass();
    assert!(result.is_success());
    assert_eq!(result.report().unwrap().applied, 1);
    assert_eq!(gateway.watermarks(), vec![Some(ts(100))]);

    let r2 = table.get(&id("r2")).unwrap().unwrap();
    assert_eq!(r2.payload(), &flock("new"));
    assert_eq!(r2.server_last_updated(), Some(ts(200)));
    assert_eq!(r2.sync_state(), SyncState::Ok);
}

#[test]
fn scenario_c_pending_edit_wins_over_pull() {
    let store = TestStore::memory();
    let (table, gateway, coordinator) = scripted(&store);
    table
        .upsert(SyncableRecord::synced(id("r3"), flock("server"), ts(100)))
        .unwrap();
    let edited = table.edit(&id("r3"), flock("local edit")).unwrap();
    assert_eq!(edited.sync_state(), SyncState::PendingUpdate);

    let remote = RemoteRecord::live("r3", flock("remote edit"), ts(200));
    assert!(matches!(
        resolve(Some(&edited), Some(&remote)),
        ResolvedAction::KeepLocal { diverged: true }
    ));

    // The push is interrupted, so the pull meets the pending edit.
    gateway.push_response(Err(GatewayError::transport_retryable("connection reset")));
    gateway.pull_response(Ok(vec![remote]));
    let result = coordinator.run_pass();
    assert_eq!(result.report().unwrap().conflicts_deferred, 1);

    let r3 = table.get(&id("r3")).unwrap().unwrap();
    assert_eq!(r3.payload(), &flock("local edit"));
    assert!(r3.needs_sync());
    assert_eq!(r3.server_last_updated(), Some(ts(100)));
}

#[test]
fn scenario_d_attempt_cap_stops_automatic_retries() {
    let remote = Arc::new(InMemoryRemote::new());
    let device = Device::new(&remote);
    device.table.create_with_id(id("r4"), flock("Broilers")).unwrap();
    remote.fail_next_pushes(5, GatewayError::transport_retryable("connection reset"));

    for attempt in 1..=5u32 {
        let result = device.sync.run_pass();
        assert!(matches!(result.errors(), [PassError::Push { .. }]));
        let r4 = device.table.get(&id("r4")).unwrap().unwrap();
        assert_eq!(r4.sync_attempts(), attempt);
        assert_eq!(r4.sync_state(), SyncState::Error);
    }

    let r4 = device.table.get(&id("r4")).unwrap().unwrap();
    assert_eq!(r4.failure_kind(), Some(FailureKind::Exhausted));
    assert!(r4.needs_attention());

    let sixth = device.sync.run_pass();
    assert!(sixth.is_success());
    assert_eq!(sixth.report().unwrap().skipped, 1);
    assert_eq!(remote.push_count(), 5);
    assert_eq!(device.table.needing_attention().unwrap().len(), 1);

    // An operator reset makes the record eligible again.
    device.table.retry_now(&id("r4")).unwrap();
    assert!(device.sync.run_pass().is_success());
    assert_eq!(remote.push_count(), 6);
    let synced = device.table.get(&id("srv-1")).unwrap().unwrap();
    assert_eq!(synced.sync_state(), SyncState::Ok);
    assert_eq!(synced.sync_attempts(), 0);
}

#[test]
fn scenario_e_remote_deletion_removes_synced_record() {
    let store = TestStore::memory();
    let (table, gateway, coordinator) = scripted(&store);
    table
        .upsert(SyncableRecord::synced(id("r5"), flock("gone"), ts(100)))
        .unwrap();
    gateway.pull_response(Ok(vec![RemoteRecord::deleted("r5", ts(150))]));

    let result = coordinator.run_pass();
    assert!(result.is_success());
    assert_eq!(result.report().unwrap().removed, 1);
    assert!(table.get(&id("r5")).unwrap().is_none());
}

#[test]
fn server_omitting_a_record_leaves_it_alone() {
    let store = TestStore::memory();
    let (table, gateway, coordinator) = scripted(&store);
    table
        .upsert(SyncableRecord::synced(id("kept"), flock("kept"), ts(100)))
        .unwrap();
    gateway.pull_response(Ok(vec![RemoteRecord::live("other", flock("other"), ts(120))]));

    assert!(coordinator.run_pass().is_success());
    assert_eq!(table.len(), 2);
    assert_eq!(
        table.get(&id("kept")).unwrap().unwrap().sync_state(),
        SyncState::Ok
    );
}

#[test]
fn lost_acknowledgement_does_not_duplicate_records() {
    let remote = Arc::new(InMemoryRemote::new());
    let device = Device::new(&remote);
    device.table.create_with_id(id("c1"), flock("North")).unwrap();
    remote.lose_next_acks(1);

    let first = device.sync.run_pass();
    assert!(matches!(
        first.errors(),
        [PassError::Push {
            kind: FailureKind::Retryable,
            ..
        }]
    ));
    assert!(device.sync.run_pass().is_success());

    assert_eq!(remote.len(), 1);
    assert_eq!(device.names(), vec![("srv-1".to_string(), "North".to_string())]);
}

#[test]
fn edit_of_pulled_copy_survives_replayed_create() {
    let remote = Arc::new(InMemoryRemote::new());
    let device = Device::new(&remote);
    device.table.create_with_id(id("c1"), flock("North")).unwrap();
    remote.lose_next_acks(1);

    assert!(!device.sync.run_pass().is_success());
    assert_eq!(
        device.names(),
        vec![
            ("c1".to_string(), "North".to_string()),
            ("srv-1".to_string(), "North".to_string()),
        ]
    );

    device.table.edit(&id("srv-1"), flock("North (edited)")).unwrap();
    for _ in 0..3 {
        assert!(device.sync.run_pass().is_success());
    }

    assert_eq!(
        device.names(),
        vec![("srv-1".to_string(), "North (edited)".to_string())]
    );
    assert!(device.table.get_unsynced().unwrap().is_empty());
    assert_eq!(remote.get(&id("srv-1")), Some(flock("North (edited)")));
    assert_eq!(remote.len(), 1);
}

#[test]
fn two_devices_converge_through_the_server() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = Device::new(&remote);
    let b = Device::new(&remote);

    // A creates offline, then both sync.
    a.table.create(flock("Layers")).unwrap();
    assert!(a.sync.run_pass().is_success());
    let pulled = b.sync.run_pass();
    assert_eq!(pulled.report().unwrap().applied, 1);
    assert_eq!(a.names(), b.names());

    // B edits; A picks the edit up.
    let shared = id("srv-1");
    b.table.edit(&shared, flock("Layers (moved)")).unwrap();
    assert!(b.sync.run_pass().is_success());
    assert!(a.sync.run_pass().is_success());
    assert_eq!(a.names(), vec![("srv-1".to_string(), "Layers (moved)".to_string())]);
    assert_eq!(a.names(), b.names());

    // A deletes; the tombstone reaches B.
    a.table.remove(&shared).unwrap();
    assert!(a.sync.run_pass().is_success());
    let removed = b.sync.run_pass();
    assert_eq!(removed.report().unwrap().removed, 1);
    assert!(a.table.is_empty());
    assert!(b.table.is_empty());
    assert!(remote.is_empty());
}

#[test]
fn concurrent_edits_settle_on_last_writer() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = Device::new(&remote);
    let b = Device::new(&remote);
    let shared = id("flock-1");
    remote.server_put(shared.clone(), flock("original"));
    assert!(a.sync.run_pass().is_success());
    assert!(b.sync.run_pass().is_success());

    a.table.edit(&shared, flock("from A")).unwrap();
    b.table.edit(&shared, flock("from B")).unwrap();
    assert!(a.sync.run_pass().is_success());

    // B's push is interrupted; its pending edit holds off A's change.
    remote.fail_next_pushes(1, GatewayError::Timeout);
    let held = b.sync.run_pass();
    assert_eq!(held.report().unwrap().conflicts_deferred, 1);
    assert_eq!(b.names(), vec![("flock-1".to_string(), "from B".to_string())]);

    assert!(b.sync.run_pass().is_success());
    assert!(a.sync.run_pass().is_success());
    assert_eq!(a.names(), vec![("flock-1".to_string(), "from B".to_string())]);
    assert_eq!(a.names(), b.names());
    assert_eq!(remote.get(&shared), Some(flock("from B")));
}

#[test]
fn invalid_payload_never_reaches_the_server() {
    let remote = Arc::new(InMemoryRemote::new());
    let device = Device::new(&remote);
    let bad = device.table.create(Flock::new("", "nameless owner", FlockType::Broiler)).unwrap();

    let result = device.sync.run_pass();
    assert!(matches!(
        result.errors(),
        [PassError::Push {
            kind: FailureKind::Terminal,
            ..
        }]
    ));
    assert_eq!(remote.push_count(), 0);

    // Fixing the payload puts it back in the queue.
    device
        .table
        .edit(bad.id(), flock("named"))
        .unwrap();
    assert!(device.sync.run_pass().is_success());
    assert_eq!(remote.len(), 1);
}

#[test]
fn offline_pass_keeps_everything_pending() {
    let remote = Arc::new(InMemoryRemote::new());
    let device = Device::new(&remote);
    device.table.create(flock("one")).unwrap();
    device.table.create(flock("two")).unwrap();
    remote.set_online(false);

    let result = device.sync.run_pass();
    let report = result.report().unwrap();
    assert_eq!(report.failed, 2);
    assert!(matches!(result.errors().last(), Some(PassError::Pull(GatewayError::Offline))));
    assert_eq!(device.table.get_unsynced().unwrap().len(), 2);

    remote.set_online(true);
    assert!(device.sync.run_pass().is_success());
    assert!(device.table.get_unsynced().unwrap().is_empty());
    assert_eq!(remote.len(), 2);
}
