//! Query descriptors and the remote store trait.

use crate::error::{Result, SyncError};
use crate::teardown::Teardown;
use crate::types::{CollectionId, DocumentId, Documents};
use std::ops::Bound;
use std::sync::Arc;

/// What a single point subscription covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryDescriptor {
    /// Every document in the collection.
    Collection,

    /// Documents whose `field` lies within the bounds.
    FieldRange {
        field: String,
        lower: Bound<String>,
        upper: Bound<String>,
    },

    /// One document by id.
    Document { id: DocumentId },
}

impl QueryDescriptor {
    /// Closed range `[lower, upper]` on `field`.
    pub fn inclusive_range(
        field: impl Into<String>,
        lower: impl Into<String>,
        upper: impl Into<String>,
    ) -> Self {
        QueryDescriptor::FieldRange {
            field: field.into(),
            lower: Bound::Included(lower.into()),
            upper: Bound::Included(upper.into()),
        }
    }

    pub fn document(id: impl Into<DocumentId>) -> Self {
        QueryDescriptor::Document { id: id.into() }
    }

    /// Reject descriptors the store could not execute.
    pub fn validate(&self) -> Result<()> {
        match self {
            QueryDescriptor::Collection => Ok(()),
            QueryDescriptor::Document { id } => {
                if id.is_empty() {
                    return Err(SyncError::Configuration(
                        "document query needs an id".to_string(),
                    ));
                }
                Ok(())
            }
            QueryDescriptor::FieldRange {
                field,
                lower,
                upper,
            } => {
                if field.is_empty() {
                    return Err(SyncError::Configuration(
                        "range query needs a field name".to_string(),
                    ));
                }
                let (lo, hi) = match (lower, upper) {
                    (
                        Bound::Included(lo) | Bound::Excluded(lo),
                        Bound::Included(hi) | Bound::Excluded(hi),
                    ) => (lo, hi),
                    _ => return Ok(()),
                };
                let empty = match (lower, upper) {
                    (Bound::Included(_), Bound::Included(_)) => lo > hi,
                    _ => lo >= hi,
                };
                if empty {
                    return Err(SyncError::Configuration(format!(
                        "empty range on {field}: {lower:?}..{upper:?}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Whether a document falls inside this query.
    pub fn matches(&self, id: &str, document: &serde_json::Value) -> bool {
        match self {
            QueryDescriptor::Collection => true,
            QueryDescriptor::Document { id: wanted } => wanted == id,
            QueryDescriptor::FieldRange {
                field,
                lower,
                upper,
            } => {
                let Some(value) = document.get(field).and_then(|v| v.as_str()) else {
                    return false;
                };
                let above = match lower {
                    Bound::Included(lo) => value >= lo.as_str(),
                    Bound::Excluded(lo) => value > lo.as_str(),
                    Bound::Unbounded => true,
                };
                let below = match upper {
                    Bound::Included(hi) => value <= hi.as_str(),
                    Bound::Excluded(hi) => value < hi.as_str(),
                    Bound::Unbounded => true,
                };
                above && below
            }
        }
    }
}

/// Pushed by the remote store to a subscription callback.
#[derive(Clone, Debug)]
pub enum ChangeEvent {
    /// Current payloads for the whole query scope.
    Snapshot(Documents),
    /// The store's asynchronous error channel fired.
    Error(String),
}

/// Callback invoked on every change to a subscribed scope.
pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Minimal capability surface of the remote document store.
pub trait RemoteStore: Send + Sync {
    /// Open a push subscription. Fails synchronously on a bad query.
    fn subscribe(
        &self,
        collection: &CollectionId,
        query: &QueryDescriptor,
        on_change: ChangeCallback,
    ) -> Result<Teardown>;

    /// One-shot read of everything the query matches.
    fn get_once(&self, collection: &CollectionId, query: &QueryDescriptor) -> Result<Documents>;
}
