//! Incremental widening of a listener's coverage.
//!
//! Both algorithms compute the delta between the requested coverage and
//! what the listener already covers, open point subscriptions only for that
//! delta, and fold their teardowns into the listener's existing one. A
//! request that is already covered touches nothing: no subscription, no
//! store write.
//!
//! Opening a subscription may deliver snapshots synchronously, and a sink
//! may call back into the coordinator from there. The write-back therefore
//! edits the listener's latest state: a consumer joining meanwhile is kept,
//! while coverage grown meanwhile invalidates the delta and the request is
//! planned again.

use crate::error::{Result, SyncError};
use crate::listeners::feed::{self, Feed};
use crate::listeners::{Listener, ListenerStore, Update};
use crate::remote::{QueryDescriptor, RemoteStore};
use crate::teardown::{self, Teardown};
use crate::types::{CollectionId, Constraint, ConstraintKind, DocumentId, UpdateMode};
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

/// Attempts before giving up on a listener whose coverage keeps moving.
const MAX_ATTEMPTS: usize = 8;

/// Result of an extension request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtendOutcome {
    /// No listener exists for the collection.
    Missing,
    /// Already covered; nothing was opened or written.
    Unchanged,
    /// Coverage grew by `opened` new point subscriptions.
    Extended { opened: usize },
}

/// Coverage change computed against one listener snapshot.
enum Plan {
    Covered,
    Grow {
        constraint: Constraint,
        queries: Vec<QueryDescriptor>,
    },
}

/// Range and document-set extension over a shared [`ListenerStore`].
#[derive(Clone)]
pub struct ConstraintExtender {
    store: Arc<ListenerStore>,
    remote: Arc<dyn RemoteStore>,
    strict_invariants: bool,
}

impl ConstraintExtender {
    pub fn new(
        store: Arc<ListenerStore>,
        remote: Arc<dyn RemoteStore>,
        strict_invariants: bool,
    ) -> Self {
        Self {
            store,
            remote,
            strict_invariants,
        }
    }

    /// Widen a range listener to cover `[new_lower, new_upper]`.
    ///
    /// The lower and upper sides are checked independently, so one call may
    /// open zero, one or two subscriptions.
    pub fn extend_range(
        &self,
        collection: &CollectionId,
        new_lower: &str,
        new_upper: &str,
    ) -> Result<ExtendOutcome> {
        self.extend(collection, ConstraintKind::Range, |constraint| {
            plan_range(constraint, new_lower, new_upper)
        })
    }

    /// Add per-document subscriptions for every id in `target` not yet covered.
    pub fn extend_documents<I, S>(
        &self,
        collection: &CollectionId,
        target: I,
    ) -> Result<ExtendOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<DocumentId>,
    {
        let target: BTreeSet<DocumentId> = target.into_iter().map(Into::into).collect();
        if target.iter().any(|id| id.is_empty()) {
            return Err(SyncError::Configuration(format!(
                "empty document id in extension of {collection}"
            )));
        }
        self.extend(collection, ConstraintKind::Documents, |constraint| {
            Ok(plan_documents(constraint, &target))
        })
    }

    fn extend<P>(
        &self,
        collection: &CollectionId,
        expected: ConstraintKind,
        plan: P,
    ) -> Result<ExtendOutcome>
    where
        P: Fn(&Constraint) -> Result<Option<Plan>>,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            let Some(current) = self.store.get(collection) else {
                return Ok(ExtendOutcome::Missing);
            };
            let (constraint, queries) = match plan(&current.constraint)? {
                None => return self.mismatch(collection, expected, &current),
                Some(Plan::Covered) => {
                    tracing::debug!(collection = %collection, %expected, "already covered");
                    return Ok(ExtendOutcome::Unchanged);
                }
                Some(Plan::Grow {
                    constraint,
                    queries,
                }) => (constraint, queries),
            };

            let feeds = self.open_all(collection, &current, queries)?;
            let opened = feeds.len();
            let additional: Vec<Teardown> =
                feeds.iter().map(|feed| feed.teardown.clone()).collect();

            let committed = self.store.update(collection, current.generation, |fresh| {
                // The delta only holds against the coverage it was planned on.
                (fresh.constraint == current.constraint).then(|| {
                    let teardown = teardown::compose(fresh.teardown.clone(), additional);
                    fresh.with_coverage(constraint, teardown)
                })
            });

            match committed {
                Update::Written(_) => {
                    tracing::info!(collection = %collection, opened, "listener extended");
                    return Ok(ExtendOutcome::Extended { opened });
                }
                Update::Missing => {
                    feed::release(&self.store, &feeds);
                    tracing::debug!(collection = %collection, "listener released during extension");
                    return Ok(ExtendOutcome::Missing);
                }
                Update::Declined => {
                    feed::release(&self.store, &feeds);
                    tracing::debug!(collection = %collection, attempt, "coverage moved, planning again");
                }
            }
        }

        Err(SyncError::InvariantViolation(format!(
            "coverage of {collection} kept changing during extension"
        )))
    }

    /// Open every query, or none: a failure releases the ones already open.
    fn open_all(
        &self,
        collection: &CollectionId,
        current: &Listener,
        queries: Vec<QueryDescriptor>,
    ) -> Result<Vec<Feed>> {
        let mut feeds = Vec::with_capacity(queries.len());
        for query in queries {
            let opened = feed::open_feed(
                &self.store,
                self.remote.as_ref(),
                collection,
                current.generation,
                query,
                UpdateMode::Merge,
            );
            match opened {
                Ok(feed) => feeds.push(feed),
                Err(e) => {
                    feed::release(&self.store, &feeds);
                    return Err(e);
                }
            }
        }
        Ok(feeds)
    }

    fn mismatch(
        &self,
        collection: &CollectionId,
        expected: ConstraintKind,
        current: &Listener,
    ) -> Result<ExtendOutcome> {
        let found = current.constraint.kind();
        let message =
            format!("cannot apply {expected} extension to {collection} ({found} constraint)");
        if self.strict_invariants {
            return Err(SyncError::InvariantViolation(message));
        }
        tracing::error!(collection = %collection, %expected, %found, "{message}");
        Ok(ExtendOutcome::Unchanged)
    }
}

/// Lower side `[new_lower, lower)`, upper side `(upper, new_upper]`.
///
/// `None` if the listener is not a range listener.
fn plan_range(constraint: &Constraint, new_lower: &str, new_upper: &str) -> Result<Option<Plan>> {
    let Constraint::Range {
        field,
        lower,
        upper,
    } = constraint
    else {
        return Ok(None);
    };
    // Rejects an empty field or an inverted target.
    Constraint::range(field.as_str(), new_lower, new_upper)?;

    let mut queries = Vec::new();
    let mut next_lower = lower.clone();
    let mut next_upper = upper.clone();

    if new_lower < lower.as_str() {
        queries.push(QueryDescriptor::FieldRange {
            field: field.clone(),
            lower: Bound::Included(new_lower.to_string()),
            upper: Bound::Excluded(lower.clone()),
        });
        next_lower = new_lower.to_string();
    }
    if new_upper > upper.as_str() {
        queries.push(QueryDescriptor::FieldRange {
            field: field.clone(),
            lower: Bound::Excluded(upper.clone()),
            upper: Bound::Included(new_upper.to_string()),
        });
        next_upper = new_upper.to_string();
    }

    if queries.is_empty() {
        return Ok(Some(Plan::Covered));
    }
    Ok(Some(Plan::Grow {
        constraint: Constraint::Range {
            field: field.clone(),
            lower: next_lower,
            upper: next_upper,
        },
        queries,
    }))
}

/// One document query per id in `target` the listener does not cover yet.
fn plan_documents(constraint: &Constraint, target: &BTreeSet<DocumentId>) -> Option<Plan> {
    let Constraint::Documents { ids } = constraint else {
        return None;
    };
    let new_ids: Vec<&DocumentId> = target.difference(ids).collect();
    if new_ids.is_empty() {
        return Some(Plan::Covered);
    }
    Some(Plan::Grow {
        queries: new_ids
            .iter()
            .map(|id| QueryDescriptor::document(id.as_str()))
            .collect(),
        constraint: Constraint::Documents {
            ids: ids.iter().chain(new_ids).cloned().collect(),
        },
    })
}
