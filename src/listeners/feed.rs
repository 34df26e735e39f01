//! Point subscriptions feeding a listener's cache.

use crate::error::Result;
use crate::remote::{ChangeCallback, ChangeEvent, QueryDescriptor, RemoteStore};
use crate::teardown::Teardown;
use crate::types::{CollectionId, UpdateMode};
use std::sync::Arc;

use super::store::ListenerStore;

/// Identifies where a feed's snapshots land.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FeedKey {
    pub collection: CollectionId,
    /// Generation of the listener the feed was opened for.
    pub generation: u64,
    pub id: u64,
    pub mode: UpdateMode,
}

/// An opened point subscription.
pub(crate) struct Feed {
    pub key: FeedKey,
    pub query: QueryDescriptor,
    pub teardown: Teardown,
}

/// Subscribe to `query` on behalf of listener `generation`.
///
/// The callback holds only a weak reference to the store, so an abandoned
/// store is not kept alive by the remote side.
pub(crate) fn open_feed(
    store: &Arc<ListenerStore>,
    remote: &dyn RemoteStore,
    collection: &CollectionId,
    generation: u64,
    query: QueryDescriptor,
    mode: UpdateMode,
) -> Result<Feed> {
    let key = FeedKey {
        collection: collection.clone(),
        generation,
        id: store.next_feed_id(),
        mode,
    };

    let weak = Arc::downgrade(store);
    let target = key.clone();
    let on_change: ChangeCallback = Arc::new(move |event| {
        let Some(store) = weak.upgrade() else {
            return;
        };
        match event {
            ChangeEvent::Snapshot(documents) => {
                store.apply_feed_snapshot(&target, documents);
            }
            ChangeEvent::Error(message) => store.report_transport_error(&target, message),
        }
    });

    let teardown = remote.subscribe(collection, &query, on_change)?;
    tracing::debug!(collection = %collection, feed = key.id, ?query, "feed opened");
    Ok(Feed {
        key,
        query,
        teardown,
    })
}

/// Release feeds opened by an operation that is being abandoned, and
/// evict whatever they delivered that no other feed still covers.
pub(crate) fn release(store: &ListenerStore, feeds: &[Feed]) {
    for feed in feeds {
        feed.teardown.call();
        store.retract_feed(&feed.key);
    }
}
