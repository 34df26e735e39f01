//! Write path into the external UI state container.

use crate::error::SyncError;
use crate::types::{CollectionId, DocumentId, Documents, UpdateMode};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Receives every cache change the listener store makes.
///
/// Called after the store's own lock is released, so implementations may
/// read back from the store.
pub trait StateSink: Send + Sync {
    /// Documents were written for a collection.
    fn on_collection_update(
        &self,
        collection: &CollectionId,
        documents: &Documents,
        mode: UpdateMode,
    );

    /// Documents no longer covered by any subscription were dropped.
    fn on_documents_evicted(&self, _collection: &CollectionId, _ids: &[DocumentId]) {}

    /// A listener was torn down and its cache entry deleted.
    fn on_collection_removed(&self, _collection: &CollectionId) {}

    /// The remote store reported an error for an active listener.
    fn on_transport_error(&self, error: &SyncError) {
        tracing::warn!(%error, "unhandled transport error");
    }
}

/// Sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl StateSink for NullSink {
    fn on_collection_update(&self, _: &CollectionId, _: &Documents, _: UpdateMode) {}
}

/// Events forwarded by [`ChannelSink`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    CollectionUpdated {
        collection: CollectionId,
        documents: Documents,
        mode: UpdateMode,
    },
    DocumentsEvicted {
        collection: CollectionId,
        ids: Vec<DocumentId>,
    },
    CollectionRemoved {
        collection: CollectionId,
    },
    TransportError {
        collection: String,
        message: String,
    },
}

/// Sink forwarding events over a bounded channel.
///
/// When the buffer is full the event is dropped with a warning; the cache
/// in the listener store stays authoritative.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    sender: Sender<StateEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiving end.
    pub fn bounded(buffer_size: usize) -> (Self, StateReceiver) {
        let (sender, receiver) = bounded(buffer_size);
        (Self { sender }, StateReceiver { receiver })
    }

    fn send(&self, event: StateEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(?event, "state channel full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("state channel closed");
            }
        }
    }
}

impl StateSink for ChannelSink {
    fn on_collection_update(
        &self,
        collection: &CollectionId,
        documents: &Documents,
        mode: UpdateMode,
    ) {
        self.send(StateEvent::CollectionUpdated {
            collection: collection.clone(),
            documents: documents.clone(),
            mode,
        });
    }

    fn on_documents_evicted(&self, collection: &CollectionId, ids: &[DocumentId]) {
        self.send(StateEvent::DocumentsEvicted {
            collection: collection.clone(),
            ids: ids.to_vec(),
        });
    }

    fn on_collection_removed(&self, collection: &CollectionId) {
        self.send(StateEvent::CollectionRemoved {
            collection: collection.clone(),
        });
    }

    fn on_transport_error(&self, error: &SyncError) {
        if let SyncError::Transport {
            collection,
            message,
        } = error
        {
            self.send(StateEvent::TransportError {
                collection: collection.clone(),
                message: message.clone(),
            });
        }
    }
}

/// Receiving end of a [`ChannelSink`].
pub struct StateReceiver {
    receiver: Receiver<StateEvent>,
}

impl StateReceiver {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StateEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StateEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<StateEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered.
    pub fn drain(&self) -> Vec<StateEvent> {
        self.receiver.try_iter().collect()
    }
}
