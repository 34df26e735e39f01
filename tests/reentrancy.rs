//! Snapshots delivered from inside `subscribe`, and sinks that call back
//! into the coordinator while handling them.

use parking_lot::Mutex;
use rink_sync::{
    ChangeCallback, CollectionId, Constraint, CoordinatorConfig, Documents, ExtendOutcome,
    MemoryRemoteStore, QueryDescriptor, RemoteStore, RemoveOutcome, StateEvent, StateSink,
    SubscriptionCoordinator, Teardown, UpdateMode,
};
use serde_json::json;
use std::sync::{Arc, Weak};

/// Remote store that runs the initial snapshot callback before `subscribe` returns.
struct SynchronousRemote {
    inner: MemoryRemoteStore,
}

impl RemoteStore for SynchronousRemote {
    fn subscribe(
        &self,
        collection: &CollectionId,
        query: &QueryDescriptor,
        on_change: ChangeCallback,
    ) -> rink_sync::Result<Teardown> {
        let teardown = self.inner.subscribe(collection, query, on_change)?;
        self.inner.deliver_pending();
        Ok(teardown)
    }

    fn get_once(
        &self,
        collection: &CollectionId,
        query: &QueryDescriptor,
    ) -> rink_sync::Result<Documents> {
        self.inner.get_once(collection, query)
    }
}

type Action = Box<dyn FnOnce(&SubscriptionCoordinator) + Send>;

/// Sink that runs one action against the coordinator the first time a
/// given document is written to a given collection.
struct CallbackSink {
    collection: &'static str,
    document: &'static str,
    coordinator: Mutex<Weak<SubscriptionCoordinator>>,
    action: Mutex<Option<Action>>,
    events: Mutex<Vec<StateEvent>>,
}

impl CallbackSink {
    fn new(collection: &'static str, document: &'static str, action: Action) -> Arc<Self> {
        Arc::new(Self {
            collection,
            document,
            coordinator: Mutex::new(Weak::new()),
            action: Mutex::new(Some(action)),
            events: Mutex::new(Vec::new()),
        })
    }

    fn evicted(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                StateEvent::DocumentsEvicted { ids, .. } => Some(ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl StateSink for CallbackSink {
    fn on_collection_update(
        &self,
        collection: &CollectionId,
        documents: &Documents,
        mode: UpdateMode,
    ) {
        self.events.lock().push(StateEvent::CollectionUpdated {
            collection: collection.clone(),
            documents: documents.clone(),
            mode,
        });
        if collection.as_str() != self.collection || !documents.contains_key(self.document) {
            return;
        }
        let Some(action) = self.action.lock().take() else {
            return;
        };
        let coordinator = self.coordinator.lock().upgrade();
        if let Some(coordinator) = coordinator {
            action(&coordinator);
        }
    }

    fn on_documents_evicted(&self, collection: &CollectionId, ids: &[String]) {
        self.events.lock().push(StateEvent::DocumentsEvicted {
            collection: collection.clone(),
            ids: ids.to_vec(),
        });
    }
}

fn coordinator_with(
    remote: &MemoryRemoteStore,
    sink: &Arc<CallbackSink>,
) -> Arc<SubscriptionCoordinator> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let coordinator = Arc::new(
        SubscriptionCoordinator::new(
            CoordinatorConfig::default(),
            Arc::new(SynchronousRemote {
                inner: remote.clone(),
            }),
            Arc::clone(sink) as Arc<dyn StateSink>,
        )
        .unwrap(),
    );
    *sink.coordinator.lock() = Arc::downgrade(&coordinator);
    coordinator
}

fn months(ids: &[&str]) -> Constraint {
    Constraint::documents(ids.iter().copied()).unwrap()
}

// --- Listener Creation ---

#[test]
fn test_consumer_joining_during_creation_keeps_live_listener() {
    let remote = MemoryRemoteStore::new();
    remote.put_document("calendar", "2022-01", json!({"open_slots": 12}));
    let sink = CallbackSink::new(
        "calendar",
        "2022-01",
        Box::new(|coordinator: &SubscriptionCoordinator| {
            let joined = coordinator
                .add_listener("calendar", "day-view".into(), months(&["2022-01"]))
                .unwrap();
            assert_eq!(joined, rink_sync::AddOutcome::Joined);
        }),
    );
    let coordinator = coordinator_with(&remote, &sink);

    coordinator
        .add_listener("calendar", "week-view".into(), months(&["2022-01", "2022-02"]))
        .unwrap();

    let listener = coordinator.listener("calendar").unwrap();
    assert_eq!(listener.consumers.len(), 2);
    assert_eq!(listener.constraint, months(&["2022-01", "2022-02"]));
    assert!(!listener.teardown.is_spent());
    assert_eq!(remote.active_subscriptions(), 2);
    assert_eq!(coordinator.documents("calendar").unwrap()["2022-01"]["open_slots"], 12);

    assert_eq!(
        coordinator.remove_listener("calendar", &"week-view".into()).unwrap(),
        RemoveOutcome::Released
    );
    assert_eq!(
        coordinator.remove_listener("calendar", &"day-view".into()).unwrap(),
        RemoveOutcome::TornDown
    );
    assert_eq!(remote.active_subscriptions(), 0);
}

#[test]
fn test_release_during_creation_leaves_nothing_open() {
    let remote = MemoryRemoteStore::new();
    remote.put_document("calendar", "2022-01", json!({"open_slots": 12}));
    let sink = CallbackSink::new(
        "calendar",
        "2022-01",
        Box::new(|coordinator: &SubscriptionCoordinator| {
            let removed = coordinator
                .remove_listener("calendar", &"week-view".into())
                .unwrap();
            assert_eq!(removed, RemoveOutcome::TornDown);
        }),
    );
    let coordinator = coordinator_with(&remote, &sink);

    coordinator
        .add_listener("calendar", "week-view".into(), months(&["2022-01", "2022-02"]))
        .unwrap();

    assert!(coordinator.listener("calendar").is_none());
    assert!(coordinator.documents("calendar").is_none());
    assert_eq!(remote.active_subscriptions(), 0);
}

#[test]
fn test_failed_creation_after_reentrant_join_removes_listener() {
    let remote = MemoryRemoteStore::new();
    remote.put_document("calendar", "2022-01", json!({"open_slots": 12}));
    let sink = CallbackSink::new(
        "calendar",
        "2022-01",
        Box::new(|coordinator: &SubscriptionCoordinator| {
            coordinator
                .add_listener("calendar", "day-view".into(), months(&["2022-01"]))
                .unwrap();
        }),
    );
    let coordinator = coordinator_with(&remote, &sink);
    remote.fail_subscribe_after(1, "permission denied");

    let result =
        coordinator.add_listener("calendar", "week-view".into(), months(&["2022-01", "2022-02"]));

    assert!(result.is_err());
    assert!(coordinator.listener("calendar").is_none());
    assert!(coordinator.documents("calendar").is_none());
    assert_eq!(remote.active_subscriptions(), 0);
}

// --- Extension ---

#[test]
fn test_consumer_joining_during_extension_keeps_new_coverage() {
    let remote = MemoryRemoteStore::new();
    remote.put_document("bookings", "b-mar", json!({"date": "2022-03-10"}));
    let sink = CallbackSink::new(
        "bookings",
        "b-mar",
        Box::new(|coordinator: &SubscriptionCoordinator| {
            coordinator
                .add_listener(
                    "bookings",
                    "day-view".into(),
                    Constraint::range("date", "2022-02-01", "2022-02-28").unwrap(),
                )
                .unwrap();
        }),
    );
    let coordinator = coordinator_with(&remote, &sink);
    coordinator
        .add_listener(
            "bookings",
            "week-view".into(),
            Constraint::range("date", "2021-12-01", "2022-02-28").unwrap(),
        )
        .unwrap();

    let report = coordinator
        .pagination_driver()
        .on_date_str("2022-02-01")
        .unwrap();

    assert!(report.failed.is_empty());
    assert_eq!(report.extended, vec![(CollectionId::from("bookings"), 1)]);
    let listener = coordinator.listener("bookings").unwrap();
    assert_eq!(
        listener.constraint,
        Constraint::range("date", "2021-12-01", "2022-03-31").unwrap()
    );
    assert_eq!(listener.consumers.len(), 2);
    assert!(coordinator.documents("bookings").unwrap().contains_key("b-mar"));
    assert_eq!(remote.active_subscriptions(), 2);
}

#[test]
fn test_extension_during_extension_plans_again() {
    let remote = MemoryRemoteStore::new();
    remote.put_document("calendar", "2022-01", json!({"open_slots": 12}));
    remote.put_document("calendar", "2022-02", json!({"open_slots": 8}));
    let sink = CallbackSink::new(
        "calendar",
        "2022-02",
        Box::new(|coordinator: &SubscriptionCoordinator| {
            let outcome = coordinator
                .extender()
                .extend_documents(&"calendar".into(), ["2022-02", "2022-03"])
                .unwrap();
            assert_eq!(outcome, ExtendOutcome::Extended { opened: 2 });
        }),
    );
    let coordinator = coordinator_with(&remote, &sink);
    coordinator
        .add_listener("calendar", "week-view".into(), months(&["2022-01"]))
        .unwrap();

    let outcome = coordinator
        .extender()
        .extend_documents(&"calendar".into(), ["2022-02"])
        .unwrap();

    // The nested call already covered the request.
    assert_eq!(outcome, ExtendOutcome::Unchanged);
    assert_eq!(
        coordinator.listener("calendar").unwrap().constraint,
        months(&["2022-01", "2022-02", "2022-03"])
    );
    assert_eq!(remote.active_subscriptions(), 3);
    assert!(coordinator.documents("calendar").unwrap().contains_key("2022-02"));
    assert!(sink.evicted().is_empty());
}

#[test]
fn test_rolled_back_extension_evicts_delivered_documents() {
    let remote = MemoryRemoteStore::new();
    remote.put_document("bookings", "b-dec", json!({"date": "2021-12-18"}));
    remote.put_document("bookings", "b-jan", json!({"date": "2022-01-08"}));
    let sink = CallbackSink::new("bookings", "none", Box::new(|_: &SubscriptionCoordinator| {}));
    let coordinator = coordinator_with(&remote, &sink);
    coordinator
        .add_listener(
            "bookings",
            "week-view".into(),
            Constraint::range("date", "2022-01-01", "2022-01-31").unwrap(),
        )
        .unwrap();

    // The lower side opens and delivers b-dec, then the upper side fails.
    remote.fail_subscribe_after(1, "quota exceeded");
    let result = coordinator
        .extender()
        .extend_range(&"bookings".into(), "2021-12-01", "2022-02-28");

    assert!(result.is_err());
    let cached = coordinator.documents("bookings").unwrap();
    assert_eq!(cached.keys().collect::<Vec<_>>(), vec!["b-jan"]);
    assert_eq!(sink.evicted(), vec!["b-dec".to_string()]);
    assert_eq!(remote.active_subscriptions(), 1);
}
