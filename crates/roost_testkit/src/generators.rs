//! Property-based test generators using proptest.
//!
//! Records are produced by driving the public lifecycle transitions, so
//! every generated record is one a real table could hold.

use proptest::prelude::*;
use roost_core::{
    DeleteDisposition, PendingOp, RecordId, ServerAck, SyncState, SyncableRecord, Timestamp,
};
use roost_domain::{
    Comment, Flock, FlockType, ListingCategory, Post, ProductListing, UserProfile,
};

fn word() -> impl Strategy<Value = String> + Clone {
    prop::string::string_regex("[a-z][a-z0-9]{0,11}").expect("invalid regex").boxed()
}

fn sentence() -> impl Strategy<Value = String> + Clone {
    prop::collection::vec(word(), 1..8).prop_map(|words| words.join(" "))
}

/// Strategy for record ids.
pub fn record_id_strategy() -> impl Strategy<Value = RecordId> + Clone {
    word().prop_map(RecordId::new)
}

/// Strategy for flocks that pass validation.
pub fn flock_strategy() -> impl Strategy<Value = Flock> + Clone {
    (
        word(),
        sentence(),
        prop_oneof![
            Just(FlockType::Layer),
            Just(FlockType::Broiler),
            Just(FlockType::Breeder),
            Just(FlockType::Fighter),
        ],
        prop::option::of(word()),
        0u32..5_000,
    )
        .prop_map(|(owner, name, flock_type, breed, birds)| {
            let mut flock = Flock::new(owner, name, flock_type);
            flock.breed = breed;
            flock.bird_count = birds;
            flock
        })
}

/// Strategy for flocks, some of which fail validation.
pub fn any_flock_strategy() -> impl Strategy<Value = Flock> + Clone {
    (flock_strategy(), any::<bool>()).prop_map(|(mut flock, blank_name)| {
        if blank_name {
            flock.name = " ".into();
        }
        flock
    })
}

/// Strategy for active listings that pass validation.
pub fn listing_strategy() -> impl Strategy<Value = ProductListing> + Clone {
    (
        word(),
        sentence(),
        1u64..1_000_000,
        1u32..500,
        prop_oneof![
            Just(ListingCategory::LiveBirds),
            Just(ListingCategory::Eggs),
            Just(ListingCategory::Chicks),
        ],
    )
        .prop_map(|(seller, title, price, quantity, category)| {
            let mut listing = ProductListing::new(seller, title, price, quantity);
            listing.category = category;
            listing
        })
}

/// Strategy for posts that pass validation.
pub fn post_strategy() -> impl Strategy<Value = Post> + Clone {
    (word(), sentence(), prop::collection::vec(word(), 0..4)).prop_map(|(author, body, tags)| {
        let mut post = Post::new(author, body);
        post.tags = tags;
        post
    })
}

/// Strategy for comments that pass validation.
pub fn comment_strategy() -> impl Strategy<Value = Comment> + Clone {
    (word(), word(), sentence()).prop_map(|(post, author, body)| Comment::new(post, author, body))
}

/// Strategy for profiles that pass validation.
pub fn profile_strategy() -> impl Strategy<Value = UserProfile> + Clone {
    (word(), sentence(), prop::option::of(sentence())).prop_map(|(user, name, bio)| {
        let mut profile = UserProfile::new(user, name);
        profile.bio = bio;
        profile
    })
}

/// One lifecycle step applied by [`record_strategy`].
#[derive(Debug, Clone)]
pub enum RecordStep<T> {
    /// Local edit.
    Edit(T),
    /// Local delete.
    Delete,
    /// Failed push.
    Fail {
        /// Whether the failure was retryable.
        retryable: bool,
    },
    /// Confirmed push.
    Confirm,
    /// Operator retry.
    RetryNow,
}

fn step_strategy<T, S>(payload: S) -> impl Strategy<Value = RecordStep<T>>
where
    T: Clone + std::fmt::Debug,
    S: Strategy<Value = T>,
{
    prop_oneof![
        payload.prop_map(RecordStep::Edit),
        Just(RecordStep::Delete),
        any::<bool>().prop_map(|retryable| RecordStep::Fail { retryable }),
        Just(RecordStep::Confirm),
        Just(RecordStep::RetryNow),
    ]
}

/// Applies `steps` to `record`, skipping the ones the record refuses.
pub fn apply_steps<T>(record: &mut SyncableRecord<T>, steps: Vec<RecordStep<T>>, max_attempts: u32) {
    let mut now = record.last_client_update();
    let mut server_clock = record
        .server_last_updated()
        .map_or(0, Timestamp::as_millis);

    for step in steps {
        now = Timestamp::from_millis(now.as_millis() + 1);
        match step {
            RecordStep::Edit(payload) => {
                let _ = record.edit(payload, now);
            }
            RecordStep::Delete => {
                // A record the server never saw would be dropped by its table.
                let _: DeleteDisposition = record.mark_deleted(now);
            }
            RecordStep::Fail { retryable } => {
                let _ = record.record_failure("generated failure", retryable, max_attempts, now);
            }
            RecordStep::Confirm => {
                if matches!(
                    record.pending_op(),
                    Some(PendingOp::Create | PendingOp::Update)
                ) {
                    server_clock += 1;
                    let ack = ServerAck::new(
                        record.id().clone(),
                        Timestamp::from_millis(server_clock),
                    );
                    let _ = record.record_success(&ack, now);
                }
            }
            RecordStep::RetryNow => {
                let _ = record.retry_now();
            }
        }
    }
}

/// Strategy for records in any reachable sync state.
///
/// Half start as never-pushed local creates, half as synced server copies.
pub fn record_strategy<T, S>(payload: S) -> impl Strategy<Value = SyncableRecord<T>>
where
    T: Clone + std::fmt::Debug,
    S: Strategy<Value = T> + Clone,
{
    (
        record_id_strategy(),
        payload.clone(),
        any::<bool>(),
        prop::collection::vec(step_strategy(payload), 0..12),
    )
        .prop_map(|(id, payload, local, steps)| {
            let mut record = if local {
                SyncableRecord::new_local(id, payload, Timestamp::from_millis(1_000))
            } else {
                SyncableRecord::synced(id, payload, Timestamp::from_millis(500))
            };
            apply_steps(&mut record, steps, 5);
            record
        })
}

/// Strategy for records in a specific sync state.
pub fn record_in_state<T, S>(payload: S, state: SyncState) -> impl Strategy<Value = SyncableRecord<T>>
where
    T: Clone + std::fmt::Debug,
    S: Strategy<Value = T> + Clone,
{
    record_strategy(payload).prop_filter("record in requested state", move |record| {
        record.sync_state() == state
    })
}
