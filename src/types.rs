//! Core types shared by the coordinator components.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Name of a subscribable collection in the remote store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionId(String);

impl CollectionId {
    pub fn new(name: impl Into<String>) -> Self {
        CollectionId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Collection({})", self.0)
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionId {
    fn from(name: &str) -> Self {
        CollectionId::new(name)
    }
}

/// Opaque identifier of a UI unit consuming a collection.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn new(id: impl Into<String>) -> Self {
        ConsumerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Consumer({})", self.0)
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerId {
    fn from(id: &str) -> Self {
        ConsumerId::new(id)
    }
}

/// Document identifier within a collection.
pub type DocumentId = String;

/// Document payloads keyed by id.
pub type Documents = BTreeMap<DocumentId, serde_json::Value>;

/// How a batch of documents is written into a collection's cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Replace the whole cached map for the collection.
    Overwrite,
    /// Add or replace only the supplied ids.
    Merge,
}

/// Coverage of a listener.
///
/// A constraint only ever grows while its listener is alive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    /// Whole-collection subscription. Cannot be extended.
    None,

    /// Inclusive bounds on one sortable field (ISO dates in practice).
    Range {
        field: String,
        lower: String,
        upper: String,
    },

    /// Explicitly enumerated documents.
    Documents { ids: BTreeSet<DocumentId> },
}

impl Constraint {
    /// Build a validated range constraint.
    pub fn range(
        field: impl Into<String>,
        lower: impl Into<String>,
        upper: impl Into<String>,
    ) -> Result<Self> {
        let constraint = Constraint::Range {
            field: field.into(),
            lower: lower.into(),
            upper: upper.into(),
        };
        constraint.validate()?;
        Ok(constraint)
    }

    /// Build a validated document-set constraint.
    pub fn documents<I, S>(ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<DocumentId>,
    {
        let constraint = Constraint::Documents {
            ids: ids.into_iter().map(Into::into).collect(),
        };
        constraint.validate()?;
        Ok(constraint)
    }

    pub fn kind(&self) -> ConstraintKind {
        match self {
            Constraint::None => ConstraintKind::None,
            Constraint::Range { .. } => ConstraintKind::Range,
            Constraint::Documents { .. } => ConstraintKind::Documents,
        }
    }

    /// Reject constraints no query could be built from.
    pub fn validate(&self) -> Result<()> {
        match self {
            Constraint::None => Ok(()),
            Constraint::Range { field, lower, upper } => {
                if field.is_empty() {
                    return Err(SyncError::Configuration(
                        "range constraint needs a field name".to_string(),
                    ));
                }
                if lower > upper {
                    return Err(SyncError::Configuration(format!(
                        "inverted range on {field}: {lower} > {upper}"
                    )));
                }
                Ok(())
            }
            Constraint::Documents { ids } => {
                if ids.iter().any(|id| id.is_empty()) {
                    return Err(SyncError::Configuration(
                        "document ids must not be empty".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Shape of a constraint, without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    None,
    Range,
    Documents,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstraintKind::None => "none",
            ConstraintKind::Range => "range",
            ConstraintKind::Documents => "documents",
        };
        f.write_str(name)
    }
}
