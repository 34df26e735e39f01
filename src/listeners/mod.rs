//! Listener registry and local document cache.
//!
//! The [`ListenerStore`] holds, per subscribed collection:
//! - the consumers sharing the listener
//! - its constraint (whole collection, field range, or document set)
//! - the composed teardown of every point subscription opened for it
//! - the cached documents those subscriptions delivered
//!
//! Every cache change is forwarded to a [`StateSink`], the write path into
//! the UI's own state container.

pub(crate) mod feed;
mod sink;
mod store;

pub use sink::{ChannelSink, NullSink, StateEvent, StateReceiver, StateSink};
pub use store::{Listener, ListenerStore};
pub(crate) use store::Update;
