//! The remote boundary.

use crate::error::{GatewayError, GatewayResult};
use parking_lot::Mutex;
use roost_core::{Entity, EntityType, RemoteRecord, ServerAck, SyncableRecord, Timestamp};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// The push/pull contract of the remote store.
///
/// Implementations wrap an HTTP or RPC client. Calls are blocking; the
/// coordinator never holds a store lock while one is in flight.
pub trait RemoteGateway<T: Entity>: Send + Sync {
    /// Sends one record's pending change.
    ///
    /// `record.pending_op()` tells whether this is a create, an update or a
    /// delete. The call must be idempotent for the same record id: pushing a
    /// create twice yields the same server id.
    fn push(&self, entity_type: &EntityType, record: &SyncableRecord<T>)
        -> GatewayResult<ServerAck>;

    /// Fetches records changed on the server after `watermark` (all records
    /// when `None`).
    fn pull_since(
        &self,
        entity_type: &EntityType,
        watermark: Option<Timestamp>,
    ) -> GatewayResult<Vec<RemoteRecord<T>>>;
}

/// A scripted gateway for testing.
///
/// Push responses are consumed in order; with none left, pushes fail with a
/// non-retryable transport error. Pulls with no scripted response return
/// nothing.
pub struct MockGateway<T> {
    online: AtomicBool,
    push_responses: Mutex<VecDeque<GatewayResult<ServerAck>>>,
    pull_responses: Mutex<VecDeque<GatewayResult<Vec<RemoteRecord<T>>>>>,
    pushed: Mutex<Vec<SyncableRecord<T>>>,
    watermarks: Mutex<Vec<Option<Timestamp>>>,
}

impl<T: Entity> MockGateway<T> {
    /// Creates an online mock with nothing scripted.
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            push_responses: Mutex::new(VecDeque::new()),
            pull_responses: Mutex::new(VecDeque::new()),
            pushed: Mutex::new(Vec::new()),
            watermarks: Mutex::new(Vec::new()),
        }
    }

    /// Queues the response to the next push.
    pub fn push_response(&self, response: GatewayResult<ServerAck>) {
        self.push_responses.lock().push_back(response);
    }

    /// Queues the response to the next pull.
    pub fn pull_response(&self, response: GatewayResult<Vec<RemoteRecord<T>>>) {
        self.pull_responses.lock().push_back(response);
    }

    /// Sets connectivity; offline calls fail with [`GatewayError::Offline`].
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Records received by `push`, in call order.
    pub fn pushed(&self) -> Vec<SyncableRecord<T>> {
        self.pushed.lock().clone()
    }

    /// Number of push calls so far.
    pub fn push_count(&self) -> usize {
        self.pushed.lock().len()
    }

    /// Watermarks passed to `pull_since`, in call order.
    pub fn watermarks(&self) -> Vec<Option<Timestamp>> {
        self.watermarks.lock().clone()
    }

    fn check_online(&self) -> GatewayResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::Offline)
        }
    }
}

impl<T: Entity> Default for MockGateway<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> RemoteGateway<T> for MockGateway<T> {
    fn push(
        &self,
        _entity_type: &EntityType,
        record: &SyncableRecord<T>,
    ) -> GatewayResult<ServerAck> {
        self.pushed.lock().push(record.clone());
        self.check_online()?;
        self.push_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::transport_fatal("no scripted push response")))
    }

    fn pull_since(
        &self,
        _entity_type: &EntityType,
        watermark: Option<Timestamp>,
    ) -> GatewayResult<Vec<RemoteRecord<T>>> {
        self.watermarks.lock().push(watermark);
        self.check_online()?;
        self.pull_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
