//! # Rink Sync
//!
//! A live, in-memory mirror of remote document-store collections, shared
//! by many UI consumers and widened incrementally as the UI pages through
//! days, weeks and months.
//!
//! ## Core Concepts
//!
//! - **Listeners**: one per collection, reference-counted by consumer id
//! - **Constraints**: whole collection, a field range, or a document-id set
//! - **Extension**: coverage only grows, by subscribing to the delta
//! - **Teardown**: one composed callback releases every point subscription
//!
//! ## Example
//!
//! ```
//! use rink_sync::{Constraint, CoordinatorConfig, MemoryRemoteStore, SubscriptionCoordinator};
//! use std::sync::Arc;
//!
//! # fn main() -> rink_sync::Result<()> {
//! let remote = MemoryRemoteStore::new();
//! let (coordinator, _updates) =
//!     SubscriptionCoordinator::with_channel_sink(CoordinatorConfig::default(), Arc::new(remote))?;
//!
//! // First consumer opens the subscription
//! coordinator.add_listener(
//!     "bookings",
//!     "week-view".into(),
//!     Constraint::range("date", "2021-12-01", "2022-02-28")?,
//! )?;
//!
//! // Paging forward widens it
//! let driver = coordinator.pagination_driver();
//! driver.on_date_str("2022-02-01")?;
//!
//! // Last consumer tears it down
//! coordinator.remove_listener("bookings", &"week-view".into())?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod extension;
pub mod listeners;
pub mod pagination;
pub mod remote;
pub mod teardown;
pub mod types;

// Re-exports
pub use config::{CoordinatorConfig, WindowConfig};
pub use coordinator::{AddOutcome, RemoveOutcome, SubscriptionCoordinator};
pub use error::{Result, SyncError};
pub use extension::{ConstraintExtender, ExtendOutcome};
pub use listeners::{
    ChannelSink, Listener, ListenerStore, NullSink, StateEvent, StateReceiver, StateSink,
};
pub use pagination::{PaginationDriver, PaginationReport, PaginationWindow};
pub use remote::{ChangeCallback, ChangeEvent, MemoryRemoteStore, QueryDescriptor, RemoteStore};
pub use teardown::{compose, Teardown};
pub use types::*;
