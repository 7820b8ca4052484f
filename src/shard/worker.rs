use async_trait::async_trait;
use futures::channel::mpsc::UnboundedReceiver as Receiver;
use futures::StreamExt;

use super::message::WorkerMessage;
use super::messenger::ShardMessenger;
use crate::model::{EntityId, ShardId};

/// An entity hosted on a shard, implemented by the application.
///
/// One instance exists per active (shard, entity id) pair; its mailbox is
/// drained by a dedicated worker task, so `handle` always runs with
/// exclusive access to the instance's state. After a passivation cycle the
/// next message for the same id reaches a *fresh* instance.
///
/// # Examples
///
/// ```rust
/// use shardhost::shard::{Entity, EntityContext};
///
/// struct Counter {
///     count: u64,
/// }
///
/// #[shardhost::async_trait]
/// impl Entity for Counter {
///     type Message = u64;
///
///     async fn handle(&mut self, _ctx: &EntityContext<u64>, message: u64) {
///         self.count += message;
///     }
/// }
/// ```
#[async_trait]
pub trait Entity: Send + 'static {
    /// The application message type delivered to this entity.
    type Message: Send + 'static;

    /// Called for every message delivered to this entity instance, in the
    /// order the shard controller observed them.
    async fn handle(&mut self, ctx: &EntityContext<Self::Message>, message: Self::Message);

    /// Called once after the terminal stop signal, immediately before the
    /// worker terminates. Last chance to release resources.
    async fn stopped(&mut self) {}
}

/// Creates entity workers on demand.
///
/// Called by a shard controller on the first message routed to an id, and
/// again after every passivation cycle of that id.
pub trait EntityFactory: Send + Sync + 'static {
    /// The entity type this factory produces.
    type Entity: Entity;

    /// Creates a fresh worker for `entity_id` on `shard_id`.
    fn create(&self, shard_id: &ShardId, entity_id: &EntityId) -> Self::Entity;
}

/// The message type produced by a factory's entities.
pub type MessageOf<F> = <<F as EntityFactory>::Entity as Entity>::Message;

/// Per-worker context handed to [`Entity::handle`].
pub struct EntityContext<M> {
    shard_id: ShardId,
    entity_id: EntityId,
    messenger: ShardMessenger<M>,
}

impl<M> EntityContext<M> {
    pub(crate) fn new(
        shard_id: ShardId,
        entity_id: EntityId,
        messenger: ShardMessenger<M>,
    ) -> Self {
        Self {
            shard_id,
            entity_id,
            messenger,
        }
    }

    /// The shard hosting this entity.
    #[must_use]
    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// The id of this entity.
    #[must_use]
    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// A handle to the owning shard controller, usable to message sibling
    /// entities on the same shard.
    #[must_use]
    pub fn messenger(&self) -> &ShardMessenger<M> {
        &self.messenger
    }

    /// Requests passivation of this entity.
    ///
    /// The controller treats the request identically to an eviction
    /// decision: `stop_message` (or a bare stop signal, if `None`) is
    /// delivered as the terminal message, later arrivals are buffered, and
    /// the id is re-activatable once the worker terminates.
    pub fn passivate(&self, stop_message: Option<M>) {
        self.messenger.passivate(self.entity_id.clone(), stop_message);
    }
}

impl<M> Clone for EntityContext<M> {
    fn clone(&self) -> Self {
        Self {
            shard_id: self.shard_id.clone(),
            entity_id: self.entity_id.clone(),
            messenger: self.messenger.clone(),
        }
    }
}

/// The worker task body: drains the entity's mailbox until the terminal
/// stop signal, then runs the stop hook.
pub(crate) async fn run_worker<E: Entity>(
    mut entity: E,
    ctx: EntityContext<E::Message>,
    mut rx: Receiver<WorkerMessage<E::Message>>,
) {
    while let Some(message) = rx.next().await {
        match message {
            WorkerMessage::Deliver(message) => entity.handle(&ctx, message).await,
            WorkerMessage::Stop(stop_message) => {
                if let Some(message) = stop_message {
                    entity.handle(&ctx, message).await;
                }

                break;
            },
        }
    }

    entity.stopped().await;
}
