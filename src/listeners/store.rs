//! Authoritative record of active listeners and their cached documents.

use crate::error::{Result, SyncError};
use crate::teardown::Teardown;
use crate::types::{CollectionId, Constraint, ConsumerId, DocumentId, Documents, UpdateMode};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::feed::FeedKey;
use super::sink::StateSink;

/// One active subscription to a collection, shared by its consumers.
///
/// Listeners are values: components read a snapshot with
/// [`ListenerStore::get`] and write back a whole replacement.
#[derive(Clone, Debug)]
pub struct Listener {
    pub consumers: BTreeSet<ConsumerId>,
    pub constraint: Constraint,
    /// Releases every point subscription folded into this listener.
    pub teardown: Teardown,
    /// Identity of this listener instance. Stays fixed for its lifetime.
    pub generation: u64,
    /// Bumped by the store on every write.
    pub revision: u64,
}

impl Listener {
    pub fn new(consumer: ConsumerId, constraint: Constraint, generation: u64) -> Self {
        Self {
            consumers: BTreeSet::from([consumer]),
            constraint,
            teardown: Teardown::noop(),
            generation,
            revision: 0,
        }
    }

    pub fn with_consumer(&self, consumer: ConsumerId) -> Self {
        let mut next = self.clone();
        next.consumers.insert(consumer);
        next
    }

    pub fn without_consumer(&self, consumer: &ConsumerId) -> Self {
        let mut next = self.clone();
        next.consumers.remove(consumer);
        next
    }

    pub fn with_coverage(&self, constraint: Constraint, teardown: Teardown) -> Self {
        Self {
            constraint,
            teardown,
            ..self.clone()
        }
    }
}

#[derive(Default)]
struct Entries {
    listeners: HashMap<CollectionId, Listener>,
    documents: HashMap<CollectionId, Documents>,
    /// Which merge feeds currently deliver each cached document.
    claims: HashMap<CollectionId, HashMap<DocumentId, BTreeSet<u64>>>,
}

impl Entries {
    fn check_invariants(&self) {
        debug_assert!(
            self.documents
                .keys()
                .chain(self.claims.keys())
                .all(|collection| self.listeners.contains_key(collection)),
            "cached documents without a listener"
        );
    }

    fn accepts(&self, collection: &CollectionId, generation: Option<u64>) -> bool {
        match (self.listeners.get(collection), generation) {
            (Some(listener), Some(generation)) => listener.generation == generation,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// What [`ListenerStore::update`] did.
#[derive(Debug)]
pub(crate) enum Update {
    Written(Listener),
    /// The edit looked at the latest listener and left it alone.
    Declined,
    /// No listener of that generation.
    Missing,
}

/// Listener registry plus the local document cache.
///
/// Never calls a listener's teardown: deciding when to release is the
/// coordinator's job, the store only forgets.
pub struct ListenerStore {
    entries: RwLock<Entries>,
    sink: Arc<dyn StateSink>,
    next_generation: AtomicU64,
    next_feed: AtomicU64,
}

impl ListenerStore {
    pub fn new(sink: Arc<dyn StateSink>) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            sink,
            next_generation: AtomicU64::new(1),
            next_feed: AtomicU64::new(1),
        }
    }

    // --- Listeners ---

    /// Snapshot of the listener for `collection`.
    pub fn get(&self, collection: &CollectionId) -> Option<Listener> {
        self.entries.read().listeners.get(collection).cloned()
    }

    pub fn contains(&self, collection: &CollectionId) -> bool {
        self.entries.read().listeners.contains_key(collection)
    }

    /// Snapshots of every listener, ordered by collection.
    pub fn listeners(&self) -> Vec<(CollectionId, Listener)> {
        let entries = self.entries.read();
        let mut listeners: Vec<_> = entries
            .listeners
            .iter()
            .map(|(collection, listener)| (collection.clone(), listener.clone()))
            .collect();
        listeners.sort_by(|a, b| a.0.cmp(&b.0));
        listeners
    }

    pub fn len(&self) -> usize {
        self.entries.read().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().listeners.is_empty()
    }

    /// Add a listener for a collection that has none.
    pub fn insert(&self, collection: &CollectionId, mut listener: Listener) -> Result<Listener> {
        let mut entries = self.entries.write();
        if entries.listeners.contains_key(collection) {
            return Err(SyncError::InvariantViolation(format!(
                "listener for {collection} already exists"
            )));
        }
        listener.revision = 0;
        entries.listeners.insert(collection.clone(), listener.clone());
        entries.check_invariants();
        Ok(listener)
    }

    /// Store `listener` unconditionally, replacing any existing entry.
    pub fn upsert(&self, collection: &CollectionId, mut listener: Listener) -> Listener {
        let mut entries = self.entries.write();
        listener.revision = entries
            .listeners
            .get(collection)
            .map_or(0, |current| current.revision + 1);
        entries.listeners.insert(collection.clone(), listener.clone());
        entries.check_invariants();
        listener
    }

    /// Replace the listener only if it is still at `expected_revision`.
    pub fn swap(
        &self,
        collection: &CollectionId,
        expected_revision: u64,
        mut next: Listener,
    ) -> Result<Listener> {
        let mut entries = self.entries.write();
        let current = entries.listeners.get(collection).ok_or_else(|| {
            SyncError::InvariantViolation(format!("no listener for {collection} to update"))
        })?;
        if current.revision != expected_revision || current.generation != next.generation {
            return Err(SyncError::InvariantViolation(format!(
                "stale write to {collection}: expected revision {expected_revision}, found {}",
                current.revision
            )));
        }
        next.revision = expected_revision + 1;
        entries.listeners.insert(collection.clone(), next.clone());
        entries.check_invariants();
        Ok(next)
    }

    /// Rewrite the listener of `generation` from its latest state.
    ///
    /// `edit` runs under the write lock, so it sees every write that
    /// happened since the caller's snapshot, including re-entrant ones.
    /// It must not call out. Returning `None` leaves the listener as is.
    pub(crate) fn update<F>(&self, collection: &CollectionId, generation: u64, edit: F) -> Update
    where
        F: FnOnce(&Listener) -> Option<Listener>,
    {
        let mut entries = self.entries.write();
        let Some(current) = entries
            .listeners
            .get(collection)
            .filter(|listener| listener.generation == generation)
        else {
            return Update::Missing;
        };
        let Some(mut next) = edit(current) else {
            return Update::Declined;
        };
        next.generation = generation;
        next.revision = current.revision + 1;
        entries.listeners.insert(collection.clone(), next.clone());
        entries.check_invariants();
        Update::Written(next)
    }

    /// Forget the listener and its cached documents.
    ///
    /// The caller must already have run the listener's teardown.
    pub fn remove(&self, collection: &CollectionId) -> Option<Listener> {
        self.remove_if(collection, |_| true)
    }

    /// Forget the listener only if `predicate` holds for its latest state.
    ///
    /// Returns the removed listener; running its teardown is up to the caller.
    pub(crate) fn remove_if<P>(&self, collection: &CollectionId, predicate: P) -> Option<Listener>
    where
        P: FnOnce(&Listener) -> bool,
    {
        let removed = {
            let mut entries = self.entries.write();
            if !entries.listeners.get(collection).is_some_and(predicate) {
                return None;
            }
            let removed = entries.listeners.remove(collection);
            entries.documents.remove(collection);
            entries.claims.remove(collection);
            entries.check_invariants();
            removed
        };
        if removed.is_some() {
            self.sink.on_collection_removed(collection);
        }
        removed
    }

    // --- Documents ---

    /// Copy of the cached documents for `collection`.
    pub fn documents(&self, collection: &CollectionId) -> Option<Documents> {
        self.entries.read().documents.get(collection).cloned()
    }

    pub fn document(&self, collection: &CollectionId, id: &str) -> Option<serde_json::Value> {
        self.entries
            .read()
            .documents
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Write documents into the cache of an active listener.
    ///
    /// Returns false (and writes nothing) if `collection` has no listener.
    pub fn merge_documents(
        &self,
        collection: &CollectionId,
        documents: Documents,
        mode: UpdateMode,
    ) -> bool {
        {
            let mut entries = self.entries.write();
            if !entries.accepts(collection, None) {
                tracing::debug!(collection = %collection, "no listener, dropping documents");
                return false;
            }
            match mode {
                UpdateMode::Overwrite => {
                    entries.documents.insert(collection.clone(), documents.clone());
                    entries.claims.remove(collection);
                }
                UpdateMode::Merge => {
                    entries
                        .documents
                        .entry(collection.clone())
                        .or_default()
                        .extend(documents.clone());
                }
            }
            entries.check_invariants();
        }
        self.sink.on_collection_update(collection, &documents, mode);
        true
    }

    // --- Feed plumbing ---

    pub(crate) fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn next_feed_id(&self) -> u64 {
        self.next_feed.fetch_add(1, Ordering::SeqCst)
    }

    /// Apply one feed's snapshot of its whole scope.
    ///
    /// Merge feeds claim the documents they deliver; a document that drops
    /// out of a feed's snapshot is evicted once no feed claims it.
    pub(crate) fn apply_feed_snapshot(&self, feed: &FeedKey, documents: Documents) -> bool {
        let evicted = {
            let mut guard = self.entries.write();
            if !guard.accepts(&feed.collection, Some(feed.generation)) {
                tracing::debug!(
                    collection = %feed.collection,
                    feed = feed.id,
                    "stale snapshot dropped"
                );
                return false;
            }
            let entries = &mut *guard;
            let evicted = match feed.mode {
                UpdateMode::Overwrite => {
                    entries
                        .documents
                        .insert(feed.collection.clone(), documents.clone());
                    entries.claims.remove(&feed.collection);
                    Vec::new()
                }
                UpdateMode::Merge => {
                    let claims = entries.claims.entry(feed.collection.clone()).or_default();
                    let mut evicted = Vec::new();
                    claims.retain(|id, holders| {
                        if documents.contains_key(id) {
                            return true;
                        }
                        holders.remove(&feed.id);
                        if holders.is_empty() {
                            evicted.push(id.clone());
                            false
                        } else {
                            true
                        }
                    });
                    for id in documents.keys() {
                        claims.entry(id.clone()).or_default().insert(feed.id);
                    }

                    let cache = entries.documents.entry(feed.collection.clone()).or_default();
                    for id in &evicted {
                        cache.remove(id);
                    }
                    cache.extend(documents.clone());
                    evicted
                }
            };
            entries.check_invariants();
            evicted
        };

        if !documents.is_empty() || feed.mode == UpdateMode::Overwrite {
            self.sink
                .on_collection_update(&feed.collection, &documents, feed.mode);
        }
        if !evicted.is_empty() {
            self.sink.on_documents_evicted(&feed.collection, &evicted);
        }
        true
    }

    /// Drop every claim held by an abandoned merge feed.
    ///
    /// Documents no other feed claims are evicted, so a rolled-back
    /// subscription leaves nothing behind in the cache.
    pub(crate) fn retract_feed(&self, feed: &FeedKey) {
        if feed.mode == UpdateMode::Overwrite {
            return;
        }
        let evicted = {
            let mut guard = self.entries.write();
            if !guard.accepts(&feed.collection, Some(feed.generation)) {
                return;
            }
            let entries = &mut *guard;
            let Some(claims) = entries.claims.get_mut(&feed.collection) else {
                return;
            };
            let mut evicted = Vec::new();
            claims.retain(|id, holders| {
                if holders.remove(&feed.id) && holders.is_empty() {
                    evicted.push(id.clone());
                    return false;
                }
                true
            });
            if let Some(cache) = entries.documents.get_mut(&feed.collection) {
                for id in &evicted {
                    cache.remove(id);
                }
            }
            entries.check_invariants();
            evicted
        };

        if !evicted.is_empty() {
            tracing::debug!(
                collection = %feed.collection,
                feed = feed.id,
                evicted = evicted.len(),
                "retracted feed documents"
            );
            self.sink.on_documents_evicted(&feed.collection, &evicted);
        }
    }

    /// Surface an error from a feed's remote error channel.
    ///
    /// The listener is left untouched.
    pub(crate) fn report_transport_error(&self, feed: &FeedKey, message: String) {
        if !self
            .entries
            .read()
            .accepts(&feed.collection, Some(feed.generation))
        {
            return;
        }
        let error = SyncError::Transport {
            collection: feed.collection.to_string(),
            message,
        };
        tracing::warn!(collection = %feed.collection, %error, "subscription error");
        self.sink.on_transport_error(&error);
    }
}
