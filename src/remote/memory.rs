//! In-memory remote document store.

use crate::error::{Result, SyncError};
use crate::teardown::Teardown;
use crate::types::{CollectionId, DocumentId, Documents};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::types::{ChangeCallback, ChangeEvent, QueryDescriptor, RemoteStore};

/// Unique identifier for a remote subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct RemoteSubscriptionId(u64);

/// Internal subscription state.
struct RemoteSubscription {
    collection: CollectionId,
    query: QueryDescriptor,
    on_change: ChangeCallback,
}

impl RemoteSubscription {
    /// Everything in `documents` this subscription's query matches.
    fn select(&self, documents: Option<&Documents>) -> Documents {
        documents
            .map(|docs| {
                docs.iter()
                    .filter(|(id, doc)| self.query.matches(id, doc))
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct Inner {
    /// Stored documents by collection.
    collections: RwLock<HashMap<CollectionId, Documents>>,
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<RemoteSubscriptionId, RemoteSubscription>>,
    /// Events waiting for `deliver_pending`.
    pending: Mutex<VecDeque<(RemoteSubscriptionId, ChangeEvent)>>,
    /// Successful calls left before `subscribe` fails, and the message.
    fail_subscribe: Mutex<Option<(usize, String)>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    subscribe_calls: AtomicU64,
}

impl Inner {
    fn unsubscribe(&self, id: RemoteSubscriptionId) {
        self.subscriptions.write().remove(&id);
        self.pending.lock().retain(|(target, _)| *target != id);
    }

    /// Queue a fresh snapshot for every subscription on `collection`
    /// whose scope includes `id`.
    fn notify(&self, collection: &CollectionId, id: &str, before: Option<&serde_json::Value>) {
        let collections = self.collections.read();
        let docs = collections.get(collection);
        let after = docs.and_then(|d| d.get(id));

        let mut events = Vec::new();
        {
            let subs = self.subscriptions.read();
            for (sub_id, sub) in subs.iter() {
                if &sub.collection != collection {
                    continue;
                }
                let was_in = before.is_some_and(|doc| sub.query.matches(id, doc));
                let is_in = after.is_some_and(|doc| sub.query.matches(id, doc));
                if was_in || is_in {
                    events.push((*sub_id, ChangeEvent::Snapshot(sub.select(docs))));
                }
            }
        }

        self.pending.lock().extend(events);
    }
}

/// Document store held in process memory.
///
/// Cloning yields another handle to the same store.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<Inner>,
}

impl MemoryRemoteStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document and queue snapshots for affected queries.
    pub fn put_document(
        &self,
        collection: impl Into<CollectionId>,
        id: impl Into<DocumentId>,
        document: serde_json::Value,
    ) {
        let collection = collection.into();
        let id = id.into();
        let before = self
            .inner
            .collections
            .write()
            .entry(collection.clone())
            .or_default()
            .insert(id.clone(), document);
        self.inner.notify(&collection, &id, before.as_ref());
    }

    /// Delete a document and queue snapshots for affected queries.
    pub fn delete_document(&self, collection: impl Into<CollectionId>, id: &str) {
        let collection = collection.into();
        let before = self
            .inner
            .collections
            .write()
            .get_mut(&collection)
            .and_then(|docs| docs.remove(id));
        if before.is_some() {
            self.inner.notify(&collection, id, before.as_ref());
        }
    }

    /// Queue an error event for every subscription on `collection`.
    pub fn fail_subscriptions(&self, collection: impl Into<CollectionId>, message: &str) {
        let collection = collection.into();
        let events: Vec<_> = self
            .inner
            .subscriptions
            .read()
            .iter()
            .filter(|(_, sub)| sub.collection == collection)
            .map(|(id, _)| (*id, ChangeEvent::Error(message.to_string())))
            .collect();
        self.inner.pending.lock().extend(events);
    }

    /// Make the next `subscribe` call fail synchronously.
    pub fn fail_next_subscribe(&self, message: &str) {
        self.fail_subscribe_after(0, message);
    }

    /// Let `successes` more `subscribe` calls through, then fail one.
    pub fn fail_subscribe_after(&self, successes: usize, message: &str) {
        *self.inner.fail_subscribe.lock() = Some((successes, message.to_string()));
    }

    /// Run queued callbacks in order. Returns how many were delivered.
    ///
    /// Events queued by the callbacks themselves are delivered in the same pass.
    pub fn deliver_pending(&self) -> usize {
        let mut delivered = 0;
        loop {
            let Some((id, event)) = self.inner.pending.lock().pop_front() else {
                break;
            };
            let callback = self
                .inner
                .subscriptions
                .read()
                .get(&id)
                .map(|sub| Arc::clone(&sub.on_change));
            if let Some(callback) = callback {
                callback(event);
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of live subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.inner.subscriptions.read().len()
    }

    /// Queries currently subscribed on `collection`, in subscription order.
    pub fn active_queries(&self, collection: &CollectionId) -> Vec<QueryDescriptor> {
        let subs = self.inner.subscriptions.read();
        let mut queries: Vec<_> = subs
            .iter()
            .filter(|(_, sub)| &sub.collection == collection)
            .map(|(id, sub)| (id.0, sub.query.clone()))
            .collect();
        queries.sort_by_key(|(id, _)| *id);
        queries.into_iter().map(|(_, query)| query).collect()
    }

    /// Total successful `subscribe` calls over the store's lifetime.
    pub fn subscribe_calls(&self) -> u64 {
        self.inner.subscribe_calls.load(Ordering::SeqCst)
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn subscribe(
        &self,
        collection: &CollectionId,
        query: &QueryDescriptor,
        on_change: ChangeCallback,
    ) -> Result<Teardown> {
        query.validate()?;
        {
            let mut armed = self.inner.fail_subscribe.lock();
            let fail_now = match armed.as_mut() {
                Some((0, _)) => true,
                Some((remaining, _)) => {
                    *remaining -= 1;
                    false
                }
                None => false,
            };
            if fail_now {
                if let Some((_, message)) = armed.take() {
                    return Err(SyncError::Configuration(message));
                }
            }
        }

        let id = RemoteSubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let subscription = RemoteSubscription {
            collection: collection.clone(),
            query: query.clone(),
            on_change,
        };
        let initial = subscription.select(self.inner.collections.read().get(collection));

        self.inner.subscriptions.write().insert(id, subscription);
        self.inner
            .pending
            .lock()
            .push_back((id, ChangeEvent::Snapshot(initial)));
        self.inner.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        Ok(Teardown::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.unsubscribe(id);
            }
        }))
    }

    fn get_once(&self, collection: &CollectionId, query: &QueryDescriptor) -> Result<Documents> {
        query.validate()?;
        let collections = self.inner.collections.read();
        let docs = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(id, doc)| query.matches(id, doc))
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(docs)
    }
}
