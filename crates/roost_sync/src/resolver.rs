//! Whole-record conflict resolution.
//!
//! | local              | remote               | action                         |
//! |--------------------|----------------------|--------------------------------|
//! | needs sync         | anything             | keep local                     |
//! | synced             | live                 | overwrite with remote          |
//! | synced             | deleted              | delete local                   |
//! | synced             | absent               | no change                      |
//! | absent             | live                 | insert remote as synced        |
//! | absent             | deleted or absent    | no change                      |
//!
//! A synced local copy that is newer than the remote version (by server
//! timestamp) is never replaced by it.

use roost_core::{RemoteRecord, SyncableRecord, UpdateAction};

/// What to do with one record after comparing local and remote versions.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedAction<T> {
    /// Local changes are pending; the local record wins for now.
    KeepLocal {
        /// True if the remote version differs from the kept local one.
        diverged: bool,
    },
    /// Nothing to do.
    NoChange,
    /// Replace the local record with this synced version.
    Overwrite(SyncableRecord<T>),
    /// Store this record, previously unknown locally.
    Insert(SyncableRecord<T>),
    /// Drop the local record.
    Delete,
}

impl<T> ResolvedAction<T> {
    /// Converts the decision into a store write.
    pub fn into_update(self) -> UpdateAction<T> {
        match self {
            Self::KeepLocal { .. } | Self::NoChange => UpdateAction::Keep,
            Self::Overwrite(record) | Self::Insert(record) => UpdateAction::Put(record),
            Self::Delete => UpdateAction::Remove,
        }
    }

    /// Returns true if the decision writes to the store.
    pub fn changes_store(&self) -> bool {
        matches!(self, Self::Overwrite(_) | Self::Insert(_) | Self::Delete)
    }
}

/// Reconciles a local record with the server's version of it.
///
/// Pure: neither input is modified and nothing is written.
pub fn resolve<T: Clone + PartialEq>(
    local: Option<&SyncableRecord<T>>,
    remote: Option<&RemoteRecord<T>>,
) -> ResolvedAction<T> {
    match (local, remote) {
        (Some(local), remote) if local.needs_sync() => ResolvedAction::KeepLocal {
            diverged: remote.is_some_and(|remote| remote.payload.as_ref() != Some(local.payload())),
        },
        (_, None) => ResolvedAction::NoChange,
        (Some(local), Some(remote)) => {
            if local
                .server_last_updated()
                .is_some_and(|seen| seen > remote.server_last_updated)
            {
                return ResolvedAction::NoChange;
            }
            match &remote.payload {
                None => ResolvedAction::Delete,
                Some(payload)
                    if local.server_last_updated() == Some(remote.server_last_updated)
                        && payload == local.payload() =>
                {
                    ResolvedAction::NoChange
                }
                Some(payload) => {
                    let mut merged = local.clone();
                    merged.apply_remote(payload.clone(), remote.server_last_updated);
                    ResolvedAction::Overwrite(merged)
                }
            }
        }
        (None, Some(remote)) => match &remote.payload {
            None => ResolvedAction::NoChange,
            Some(payload) => ResolvedAction::Insert(SyncableRecord::synced(
                remote.id.clone(),
                payload.clone(),
                remote.server_last_updated,
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use roost_core::{RecordId, SyncState, Timestamp};

    fn ts(millis: u64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    fn synced(payload: &str, at: u64) -> SyncableRecord<String> {
        SyncableRecord::synced(RecordId::new("S1"), payload.to_string(), ts(at))
    }

    fn live(payload: &str, at: u64) -> RemoteRecord<String> {
        RemoteRecord::live("S1", payload.to_string(), ts(at))
    }

    #[test]
    fn synced_local_is_overwritten_by_newer_remote() {
        let local = synced("old", 100);
        let ResolvedAction::Overwrite(merged) = resolve(Some(&local), Some(&live("new", 200)))
        else {
            panic!("expected overwrite");
        };
        assert_eq!(merged.payload(), "new");
        assert_eq!(merged.sync_state(), SyncState::Ok);
        assert_eq!(merged.server_last_updated(), Some(ts(200)));
    }

    #[test]
    fn pending_local_is_kept() {
        let mut local = synced("a", 100);
        local.edit("local edit".to_string(), ts(150)).unwrap();
        assert_eq!(
            resolve(Some(&local), Some(&live("server", 200))),
            ResolvedAction::KeepLocal { diverged: true }
        );
        assert_eq!(
            resolve(Some(&local), None),
            ResolvedAction::KeepLocal { diverged: false }
        );
    }

    #[test]
    fn remote_deletion_removes_synced_local() {
        let local = synced("a", 100);
        let action = resolve(Some(&local), Some(&RemoteRecord::deleted("S1", ts(300))));
        assert_eq!(action, ResolvedAction::Delete);
        assert_eq!(action.into_update(), UpdateAction::Remove);
    }

    #[test]
    fn absent_remote_is_not_a_delete_signal() {
        assert_eq!(resolve(Some(&synced("a", 1)), None), ResolvedAction::NoChange);
        assert_eq!(resolve::<String>(None, None), ResolvedAction::NoChange);
    }

    #[test]
    fn unknown_remote_record_is_inserted() {
        let ResolvedAction::Insert(record) = resolve(None, Some(&live("fresh", 10))) else {
            panic!("expected insert");
        };
        assert_eq!(record.id(), &RecordId::new("S1"));
        assert_eq!(record.sync_state(), SyncState::Ok);
        assert_eq!(
            resolve::<String>(None, Some(&RemoteRecord::deleted("S1", ts(10)))),
            ResolvedAction::NoChange
        );
    }

    #[test]
    fn older_remote_never_replaces_newer_synced_local() {
        let local = synced("newer", 500);
        assert_eq!(
            resolve(Some(&local), Some(&live("older", 400))),
            ResolvedAction::NoChange
        );
        assert_eq!(
            resolve(Some(&local), Some(&RemoteRecord::deleted("S1", ts(400)))),
            ResolvedAction::NoChange
        );
    }

    #[test]
    fn identical_remote_is_a_no_op() {
        let local = synced("same", 100);
        let action = resolve(Some(&local), Some(&live("same", 100)));
        assert_eq!(action, ResolvedAction::NoChange);
        assert!(!action.changes_store());
    }

    fn pending_record() -> impl Strategy<Value = SyncableRecord<String>> {
        (any::<String>(), 0u8..4, 0u32..6).prop_map(|(payload, shape, failures)| {
            let mut record = SyncableRecord::synced(RecordId::new("S1"), "base".into(), ts(10));
            match shape {
                0 => record = SyncableRecord::new_local(RecordId::new("c1"), payload, ts(11)),
                1 => record.edit(payload, ts(11)).unwrap(),
                2 => {
                    record.edit(payload, ts(11)).unwrap();
                    record.mark_deleted(ts(12));
                }
                _ => {
                    record.edit(payload, ts(11)).unwrap();
                    record.record_failure("x", true, 5, ts(12)).unwrap();
                }
            }
            for _ in 0..failures {
                let _ = record.record_failure("x", true, 5, ts(13));
            }
            record
        })
    }

    fn remote_record() -> impl Strategy<Value = Option<RemoteRecord<String>>> {
        prop::option::of((any::<Option<String>>(), any::<u64>()).prop_map(|(payload, at)| {
            RemoteRecord {
                id: RecordId::new("S1"),
                payload,
                server_last_updated: ts(at),
            }
        }))
    }

    proptest! {
        #[test]
        fn local_pending_changes_always_win(local in pending_record(), remote in remote_record()) {
            prop_assert!(local.needs_sync());
            let action = resolve(Some(&local), remote.as_ref());
            let is_keep_local = matches!(action, ResolvedAction::KeepLocal { .. });
            prop_assert!(is_keep_local);
            prop_assert_eq!(action.into_update(), UpdateAction::Keep);
        }
    }
}
