//! Reference-counted entry point for consumers.

use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::extension::ConstraintExtender;
use crate::listeners::feed::{self, Feed};
use crate::listeners::{ChannelSink, Listener, ListenerStore, StateReceiver, StateSink, Update};
use crate::pagination::PaginationDriver;
use crate::remote::{QueryDescriptor, RemoteStore};
use crate::teardown::{self, Teardown};
use crate::types::{CollectionId, Constraint, ConsumerId, Documents, UpdateMode};
use std::sync::Arc;

/// What `add_listener` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    /// First consumer: a listener was created and its subscriptions opened.
    Created,
    /// Consumer joined an existing listener.
    Joined,
    /// Consumer was already registered; nothing changed.
    AlreadyRegistered,
}

/// What `remove_listener` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Consumer left; other consumers keep the listener alive.
    Released,
    /// Last consumer left; subscriptions released and cache dropped.
    TornDown,
    /// No listener, or the consumer was not part of it.
    NotRegistered,
}

/// Shares one listener per collection among any number of consumers.
///
/// The listener is created for the first consumer and torn down when the
/// last one leaves. Adding a consumer never changes an existing listener's
/// constraint; coverage only grows through [`ConstraintExtender`].
pub struct SubscriptionCoordinator {
    config: CoordinatorConfig,
    store: Arc<ListenerStore>,
    remote: Arc<dyn RemoteStore>,
    extender: ConstraintExtender,
}

impl SubscriptionCoordinator {
    /// Create a coordinator writing cache changes into `sink`.
    pub fn new(
        config: CoordinatorConfig,
        remote: Arc<dyn RemoteStore>,
        sink: Arc<dyn StateSink>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(ListenerStore::new(sink));
        let extender = ConstraintExtender::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            config.strict_invariants,
        );
        Ok(Self {
            config,
            store,
            remote,
            extender,
        })
    }

    /// Create a coordinator whose cache changes arrive on a channel.
    pub fn with_channel_sink(
        config: CoordinatorConfig,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<(Self, StateReceiver)> {
        let (sink, receiver) = ChannelSink::bounded(config.sink_buffer.max(1));
        let coordinator = Self::new(config, remote, Arc::new(sink))?;
        Ok((coordinator, receiver))
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ListenerStore> {
        &self.store
    }

    pub fn extender(&self) -> &ConstraintExtender {
        &self.extender
    }

    /// A driver extending this coordinator's listeners as the viewed date moves.
    pub fn pagination_driver(&self) -> PaginationDriver {
        PaginationDriver::new(
            Arc::clone(&self.store),
            self.extender.clone(),
            self.config.window,
        )
    }

    /// Register `consumer` on `collection`.
    ///
    /// `initial` only matters when this creates the listener. If opening a
    /// subscription fails, the error is returned and no listener remains.
    pub fn add_listener(
        &self,
        collection: &str,
        consumer: ConsumerId,
        initial: Constraint,
    ) -> Result<AddOutcome> {
        let collection = self.config.collection(collection)?;

        while let Some(current) = self.store.get(&collection) {
            if current.consumers.contains(&consumer) {
                tracing::debug!(collection = %collection, consumer = %consumer, "already registered");
                return Ok(AddOutcome::AlreadyRegistered);
            }
            let joined = self.store.update(&collection, current.generation, |fresh| {
                Some(fresh.with_consumer(consumer.clone()))
            });
            if let Update::Written(next) = joined {
                tracing::debug!(
                    collection = %collection,
                    consumer = %consumer,
                    consumers = next.consumers.len(),
                    "consumer joined"
                );
                return Ok(AddOutcome::Joined);
            }
        }

        initial.validate()?;
        self.create(&collection, consumer, initial)?;
        Ok(AddOutcome::Created)
    }

    /// Unregister `consumer` from `collection`, tearing the listener down
    /// if it was the last one.
    pub fn remove_listener(
        &self,
        collection: &str,
        consumer: &ConsumerId,
    ) -> Result<RemoveOutcome> {
        let collection = self.config.collection(collection)?;
        self.release(&collection, consumer)
    }

    /// Unregister `consumer` from every collection it uses.
    pub fn remove_consumer(
        &self,
        consumer: &ConsumerId,
    ) -> Result<Vec<(CollectionId, RemoveOutcome)>> {
        let mut outcomes = Vec::new();
        for (collection, listener) in self.store.listeners() {
            if listener.consumers.contains(consumer) {
                let outcome = self.release(&collection, consumer)?;
                outcomes.push((collection, outcome));
            }
        }
        Ok(outcomes)
    }

    /// Tear down every listener regardless of consumers.
    ///
    /// Returns how many listeners were released.
    pub fn shutdown(&self) -> usize {
        let listeners = self.store.listeners();
        for (collection, listener) in &listeners {
            listener.teardown.call();
            self.store.remove(collection);
        }
        tracing::info!(listeners = listeners.len(), "coordinator shut down");
        listeners.len()
    }

    /// One-shot read that bypasses the cache.
    pub fn read_once(&self, collection: &str, query: &QueryDescriptor) -> Result<Documents> {
        let collection = self.config.collection(collection)?;
        query.validate()?;
        self.remote.get_once(&collection, query)
    }

    /// Snapshot of the listener for `collection`.
    pub fn listener(&self, collection: &str) -> Option<Listener> {
        self.store.get(&CollectionId::new(collection))
    }

    /// Cached documents for `collection`.
    pub fn documents(&self, collection: &str) -> Option<Documents> {
        self.store.documents(&CollectionId::new(collection))
    }

    fn create(
        &self,
        collection: &CollectionId,
        consumer: ConsumerId,
        initial: Constraint,
    ) -> Result<()> {
        let generation = self.store.next_generation();
        // Inserted before the feeds open so snapshots delivered from inside
        // `subscribe` have a listener to land on. Re-entrant calls may join,
        // extend or release it while the feeds open.
        self.store.insert(
            collection,
            Listener::new(consumer.clone(), initial.clone(), generation),
        )?;

        let mut feeds: Vec<Feed> = Vec::new();
        for (query, mode) in initial_queries(&initial) {
            match feed::open_feed(
                &self.store,
                self.remote.as_ref(),
                collection,
                generation,
                query,
                mode,
            ) {
                Ok(feed) => feeds.push(feed),
                Err(e) => {
                    feed::release(&self.store, &feeds);
                    self.discard(collection, generation);
                    tracing::warn!(collection = %collection, error = %e, "subscribe failed");
                    return Err(e);
                }
            }
        }

        // Coverage is already `initial` or wider; only the teardown is new.
        let additional: Vec<Teardown> = feeds.iter().map(|feed| feed.teardown.clone()).collect();
        let committed = self.store.update(collection, generation, |fresh| {
            let teardown = teardown::compose(fresh.teardown.clone(), additional);
            Some(fresh.with_coverage(fresh.constraint.clone(), teardown))
        });
        if !matches!(committed, Update::Written(_)) {
            feed::release(&self.store, &feeds);
            tracing::debug!(collection = %collection, "listener released while opening");
            return Ok(());
        }

        if self.config.bootstrap_with_get_once {
            self.bootstrap(&feeds);
        }

        tracing::info!(
            collection = %collection,
            consumer = %consumer,
            feeds = feeds.len(),
            "listener created"
        );
        Ok(())
    }

    /// The listener leaves the store before its teardown runs, so it is
    /// gone even if a teardown part panics.
    fn release(&self, collection: &CollectionId, consumer: &ConsumerId) -> Result<RemoveOutcome> {
        loop {
            let Some(current) = self.store.get(collection) else {
                tracing::debug!(collection = %collection, consumer = %consumer, "no listener");
                return Ok(RemoveOutcome::NotRegistered);
            };
            if !current.consumers.contains(consumer) {
                tracing::debug!(collection = %collection, consumer = %consumer, "consumer not registered");
                return Ok(RemoveOutcome::NotRegistered);
            }

            if current.consumers.len() > 1 {
                let left = self.store.update(collection, current.generation, |fresh| {
                    (fresh.consumers.len() > 1).then(|| fresh.without_consumer(consumer))
                });
                if matches!(left, Update::Written(_)) {
                    return Ok(RemoveOutcome::Released);
                }
                continue;
            }

            let last = |fresh: &Listener| {
                fresh.generation == current.generation
                    && fresh.consumers.len() == 1
                    && fresh.consumers.contains(consumer)
            };
            let Some(removed) = self.store.remove_if(collection, last) else {
                continue;
            };
            tracing::info!(collection = %collection, consumer = %consumer, "listener torn down");
            removed.teardown.call();
            return Ok(RemoveOutcome::TornDown);
        }
    }

    /// Drop a listener whose creation failed, with anything re-entrant
    /// calls folded into it meanwhile.
    fn discard(&self, collection: &CollectionId, generation: u64) {
        let removed = self
            .store
            .remove_if(collection, |listener| listener.generation == generation);
        if let Some(listener) = removed {
            listener.teardown.call();
        }
    }

    /// Prime a fresh listener's cache with one-shot reads of its feeds.
    fn bootstrap(&self, feeds: &[Feed]) {
        for feed in feeds {
            match self.remote.get_once(&feed.key.collection, &feed.query) {
                Ok(documents) => {
                    self.store.apply_feed_snapshot(&feed.key, documents);
                }
                Err(error) => {
                    tracing::warn!(
                        collection = %feed.key.collection,
                        %error,
                        "bootstrap read failed, waiting for push snapshot"
                    );
                }
            }
        }
    }
}

/// Point subscriptions that satisfy a freshly created listener.
fn initial_queries(constraint: &Constraint) -> Vec<(QueryDescriptor, UpdateMode)> {
    match constraint {
        Constraint::None => vec![(QueryDescriptor::Collection, UpdateMode::Overwrite)],
        Constraint::Range {
            field,
            lower,
            upper,
        } => vec![(
            QueryDescriptor::inclusive_range(field.as_str(), lower.as_str(), upper.as_str()),
            UpdateMode::Merge,
        )],
        Constraint::Documents { ids } => ids
            .iter()
            .map(|id| (QueryDescriptor::document(id.as_str()), UpdateMode::Merge))
            .collect(),
    }
}
