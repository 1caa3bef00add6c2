//! A reference remote store.
//!
//! [`InMemoryRemote`] behaves like a well-mannered sync server: it assigns
//! server ids and monotonically increasing timestamps, keeps tombstones so
//! deletions reach other devices, and answers a repeated create from the
//! same client id with the original acknowledgement, leaving the stored
//! record alone. Failures can be injected per push.

use parking_lot::Mutex;
use roost_core::{
    Entity, EntityType, PendingOp, RecordId, RemoteRecord, ServerAck, SyncableRecord, Timestamp,
};
use roost_sync::{GatewayError, GatewayResult, RemoteGateway};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

/// First timestamp the server hands out.
pub const SERVER_EPOCH: Timestamp = Timestamp::from_millis(10_000);

struct Stored<T> {
    payload: Option<T>,
    updated: Timestamp,
}

struct RemoteState<T> {
    records: BTreeMap<RecordId, Stored<T>>,
    created: HashMap<RecordId, ServerAck>,
    clock: u64,
    next_id: u64,
    online: bool,
    failures: VecDeque<GatewayError>,
    lost_acks: usize,
    pushes: usize,
    pulls: usize,
    pulls_seen: Vec<Option<Timestamp>>,
}

impl<T> RemoteState<T> {
    fn tick(&mut self) -> Timestamp {
        self.clock += 1;
        Timestamp::from_millis(self.clock)
    }
}

/// An in-process server for one entity type.
pub struct InMemoryRemote<T> {
    state: Mutex<RemoteState<T>>,
}

impl<T: Entity> InMemoryRemote<T> {
    /// Creates an empty, online server.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState {
                records: BTreeMap::new(),
                created: HashMap::new(),
                clock: SERVER_EPOCH.as_millis(),
                next_id: 0,
                online: true,
                failures: VecDeque::new(),
                lost_acks: 0,
                pushes: 0,
                pulls: 0,
                pulls_seen: Vec::new(),
            }),
        }
    }

    /// Sets connectivity; offline calls fail with [`GatewayError::Offline`].
    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
    }

    /// Makes the next `count` pushes fail with `error` without touching
    /// server state.
    pub fn fail_next_pushes(&self, count: usize, error: GatewayError) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.failures.push_back(error.clone());
        }
    }

    /// Makes the next `count` pushes succeed on the server but lose their
    /// acknowledgement, so the client sees a retryable timeout.
    pub fn lose_next_acks(&self, count: usize) {
        self.state.lock().lost_acks += count;
    }

    /// Writes a record as another device would. Returns its timestamp.
    pub fn server_put(&self, id: impl Into<RecordId>, payload: T) -> Timestamp {
        let mut state = self.state.lock();
        let updated = state.tick();
        state.records.insert(
            id.into(),
            Stored {
                payload: Some(payload),
                updated,
            },
        );
        updated
    }

    /// Deletes a record as another device would, leaving a tombstone.
    ///
    /// Returns `None` if there was no live record.
    pub fn server_delete(&self, id: &RecordId) -> Option<Timestamp> {
        let mut state = self.state.lock();
        if !matches!(state.records.get(id), Some(Stored { payload: Some(_), .. })) {
            return None;
        }
        let updated = state.tick();
        state.records.insert(
            id.clone(),
            Stored {
                payload: None,
                updated,
            },
        );
        Some(updated)
    }

    /// The live payload stored under `id`.
    pub fn get(&self, id: &RecordId) -> Option<T> {
        self.state
            .lock()
            .records
            .get(id)
            .and_then(|stored| stored.payload.clone())
    }

    /// Live records, sorted by id.
    pub fn live(&self) -> Vec<(RecordId, T)> {
        self.state
            .lock()
            .records
            .iter()
            .filter_map(|(id, stored)| stored.payload.clone().map(|p| (id.clone(), p)))
            .collect()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.live().len()
    }

    /// Returns true if no live record exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push calls received, failed ones included.
    pub fn push_count(&self) -> usize {
        self.state.lock().pushes
    }

    /// Pull calls received.
    pub fn pull_count(&self) -> usize {
        self.state.lock().pulls
    }

    /// Watermarks passed to `pull_since`, in call order.
    pub fn watermarks(&self) -> Vec<Option<Timestamp>> {
        self.state.lock().pulls_seen.clone()
    }

    fn apply_push(
        state: &mut RemoteState<T>,
        record: &SyncableRecord<T>,
    ) -> GatewayResult<ServerAck> {
        let op = record
            .pending_op()
            .ok_or_else(|| GatewayError::rejected(format!("{} has no pending change", record.id())))?;

        match op {
            PendingOp::Create => {
                if let Some(first) = state.created.get(record.id()) {
                    return Ok(first.clone());
                }
                state.next_id += 1;
                let server_id = RecordId::new(format!("srv-{}", state.next_id));
                let updated = state.tick();
                state.records.insert(
                    server_id.clone(),
                    Stored {
                        payload: Some(record.payload().clone()),
                        updated,
                    },
                );
                let ack = ServerAck::new(server_id, updated);
                state.created.insert(record.id().clone(), ack.clone());
                Ok(ack)
            }
            PendingOp::Update => {
                if !matches!(
                    state.records.get(record.id()),
                    Some(Stored { payload: Some(_), .. })
                ) {
                    return Err(GatewayError::NotFound {
                        id: record.id().to_string(),
                    });
                }
                let updated = state.tick();
                state.records.insert(
                    record.id().clone(),
                    Stored {
                        payload: Some(record.payload().clone()),
                        updated,
                    },
                );
                Ok(ServerAck::new(record.id().clone(), updated))
            }
            PendingOp::Delete => {
                if !matches!(
                    state.records.get(record.id()),
                    Some(Stored { payload: Some(_), .. })
                ) {
                    return Err(GatewayError::NotFound {
                        id: record.id().to_string(),
                    });
                }
                let updated = state.tick();
                state.records.insert(
                    record.id().clone(),
                    Stored {
                        payload: None,
                        updated,
                    },
                );
                Ok(ServerAck::new(record.id().clone(), updated))
            }
        }
    }
}

impl<T: Entity> Default for InMemoryRemote<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> RemoteGateway<T> for InMemoryRemote<T> {
    fn push(
        &self,
        entity_type: &EntityType,
        record: &SyncableRecord<T>,
    ) -> GatewayResult<ServerAck> {
        let mut state = self.state.lock();
        state.pushes += 1;
        if !state.online {
            return Err(GatewayError::Offline);
        }
        if let Some(error) = state.failures.pop_front() {
            debug!(%entity_type, record_id = %record.id(), %error, "injected push failure");
            return Err(error);
        }

        let ack = Self::apply_push(&mut state, record)?;
        if state.lost_acks > 0 {
            state.lost_acks -= 1;
            debug!(%entity_type, record_id = %record.id(), "acknowledgement lost");
            return Err(GatewayError::Timeout);
        }
        Ok(ack)
    }

    fn pull_since(
        &self,
        _entity_type: &EntityType,
        watermark: Option<Timestamp>,
    ) -> GatewayResult<Vec<RemoteRecord<T>>> {
        let mut state = self.state.lock();
        state.pulls += 1;
        state.pulls_seen.push(watermark);
        if !state.online {
            return Err(GatewayError::Offline);
        }

        let mut changed: Vec<RemoteRecord<T>> = state
            .records
            .iter()
            .filter(|(_, stored)| watermark.map_or(true, |w| stored.updated > w))
            .map(|(id, stored)| match &stored.payload {
                Some(payload) => RemoteRecord::live(id.clone(), payload.clone(), stored.updated),
                None => RemoteRecord::deleted(id.clone(), stored.updated),
            })
            .collect();
        changed.sort_by_key(|record| record.server_last_updated);
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roost_domain::Post;

    fn post_type() -> EntityType {
        EntityType::new("post")
    }

    fn local(id: &str, body: &str) -> SyncableRecord<Post> {
        SyncableRecord::new_local(RecordId::new(id), Post::new("u1", body), Timestamp::from_millis(1))
    }

    #[test]
    fn create_assigns_server_id_and_is_idempotent() {
        let remote = InMemoryRemote::new();
        let record = local("c1", "hello");

        let first = remote.push(&post_type(), &record).unwrap();
        assert_eq!(first.server_id, RecordId::new("srv-1"));

        // A replay carrying a stale payload gets the first ack back.
        let stale = local("c1", "stale");
        let second = remote.push(&post_type(), &stale).unwrap();
        assert_eq!(second, first);
        assert_eq!(remote.len(), 1);
        assert_eq!(remote.get(&first.server_id), Some(Post::new("u1", "hello")));
        assert_eq!(remote.pull_since(&post_type(), Some(first.server_last_updated)), Ok(Vec::new()));
    }

    #[test]
    fn pull_is_strictly_after_watermark_and_carries_tombstones() {
        let remote = InMemoryRemote::<Post>::new();
        let t1 = remote.server_put("a", Post::new("u1", "one"));
        let _t2 = remote.server_put("b", Post::new("u1", "two"));
        let t3 = remote.server_delete(&RecordId::new("a")).unwrap();

        let all = remote.pull_since(&post_type(), None).unwrap();
        assert_eq!(all.len(), 2);

        let after = remote.pull_since(&post_type(), Some(t1)).unwrap();
        assert_eq!(after.len(), 2);
        let newest = after.last().unwrap();
        assert!(newest.is_deleted());
        assert_eq!(newest.server_last_updated, t3);

        assert!(remote.pull_since(&post_type(), Some(t3)).unwrap().is_empty());
        assert_eq!(remote.watermarks(), vec![None, Some(t1), Some(t3)]);
    }

    #[test]
    fn update_of_unknown_record_is_not_found() {
        let remote = InMemoryRemote::new();
        let mut record = SyncableRecord::synced(
            RecordId::new("ghost"),
            Post::new("u1", "boo"),
            Timestamp::from_millis(5),
        );
        record.edit(Post::new("u1", "edited"), Timestamp::from_millis(6)).unwrap();

        assert!(matches!(
            remote.push(&post_type(), &record),
            Err(GatewayError::NotFound { .. })
        ));
    }

    #[test]
    fn injected_failures_and_lost_acks() {
        let remote = InMemoryRemote::new();
        remote.fail_next_pushes(1, GatewayError::transport_retryable("reset"));
        remote.lose_next_acks(1);
        let record = local("c1", "hello");

        assert!(remote.push(&post_type(), &record).is_err());
        assert!(remote.is_empty());
        assert_eq!(remote.push(&post_type(), &record), Err(GatewayError::Timeout));
        assert_eq!(remote.len(), 1);
        let ack = remote.push(&post_type(), &record).unwrap();
        assert_eq!(ack.server_id, RecordId::new("srv-1"));
        assert_eq!(remote.push_count(), 3);

        remote.set_online(false);
        assert_eq!(remote.pull_since(&post_type(), None), Err(GatewayError::Offline));
    }
}
