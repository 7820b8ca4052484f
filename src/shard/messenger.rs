use std::fmt;

use futures::channel::mpsc::UnboundedSender as Sender;
use tokio::sync::oneshot;

use super::message::ShardControllerMessage;
use crate::model::{CurrentShardState, EntityId, ShardStats};
use crate::passivation::PassivateIntent;

/// A handle to a [`ShardController`].
///
/// This is used to cleanly communicate with a shard's controller task
/// without owning it: the host routes traffic through it, and entity
/// workers use the copy in their [`EntityContext`] to request their own
/// passivation.
///
/// [`ShardController`]: super::ShardController
/// [`EntityContext`]: super::EntityContext
pub struct ShardMessenger<M> {
    tx: Sender<ShardControllerMessage<M>>,
}

impl<M> ShardMessenger<M> {
    pub(crate) fn new(tx: Sender<ShardControllerMessage<M>>) -> Self {
        Self {
            tx,
        }
    }

    /// Routes an application message to `entity_id`, activating the entity
    /// if it is not currently running.
    ///
    /// Messages sent through one messenger are delivered to the entity in
    /// send order, even across a passivation cycle.
    pub fn deliver(&self, entity_id: EntityId, message: M) {
        self.send(ShardControllerMessage::Deliver {
            entity_id,
            message,
        });
    }

    /// Requests passivation of `entity_id`, treated identically to an
    /// eviction decision. `stop_message`, if present, replaces the bare
    /// stop signal as the worker's terminal message.
    pub fn passivate(&self, entity_id: EntityId, stop_message: Option<M>) {
        self.send(ShardControllerMessage::Passivate {
            entity_id,
            stop_message,
        });
    }

    /// Retrieves the shard's active entity ids.
    ///
    /// Returns [`None`] if the controller has already stopped.
    pub async fn shard_state(&self) -> Option<CurrentShardState> {
        let (tx, rx) = oneshot::channel();
        self.send(ShardControllerMessage::GetState {
            tx,
        });

        rx.await.ok()
    }

    /// Retrieves the shard's entity occupancy statistics.
    ///
    /// Returns [`None`] if the controller has already stopped.
    pub async fn shard_stats(&self) -> Option<ShardStats> {
        let (tx, rx) = oneshot::channel();
        self.send(ShardControllerMessage::GetStats {
            tx,
        });

        rx.await.ok()
    }

    pub(crate) fn apply(&self, intents: Vec<PassivateIntent>) {
        if !intents.is_empty() {
            self.send(ShardControllerMessage::Apply(intents));
        }
    }

    pub(crate) fn shutdown(&self) {
        self.send(ShardControllerMessage::Shutdown);
    }

    // A send failure means the controller has stopped; its state is gone
    // either way, so the message is dropped.
    fn send(&self, msg: ShardControllerMessage<M>) {
        drop(self.tx.unbounded_send(msg));
    }
}

impl<M> Clone for ShardMessenger<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> fmt::Debug for ShardMessenger<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardMessenger").finish_non_exhaustive()
    }
}
