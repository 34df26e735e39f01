//! Seam to the remote document store.
//!
//! The coordinator needs only two capabilities from the store:
//! - `subscribe`: push snapshots for a query until the returned teardown runs
//! - `get_once`: a one-shot read
//!
//! [`MemoryRemoteStore`] is an in-process implementation used by tests and
//! benches. Delivery is queued and pumped explicitly, the way a UI event
//! loop would hand snapshot callbacks over.

mod memory;
mod types;

pub use memory::MemoryRemoteStore;
pub use types::{ChangeCallback, ChangeEvent, QueryDescriptor, RemoteStore};
