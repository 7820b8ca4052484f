use tokio::sync::oneshot::Sender as OneshotSender;

use crate::model::{CurrentShardState, EntityId, ShardStats};
use crate::passivation::PassivateIntent;

/// A message processed by a [`ShardController`] task.
///
/// [`ShardController`]: super::ShardController
#[derive(Debug)]
pub enum ShardControllerMessage<M> {
    /// An application message routed to an entity of the shard, creating
    /// the entity on first delivery.
    Deliver {
        /// The target entity.
        entity_id: EntityId,
        /// The application payload.
        message: M,
    },
    /// A worker's request to passivate itself, treated identically to an
    /// eviction decision.
    Passivate {
        /// The requesting entity.
        entity_id: EntityId,
        /// A custom terminal message delivered to the worker in place of a
        /// bare stop signal.
        stop_message: Option<M>,
    },
    /// Passivation intents produced by the manager, to apply in order.
    Apply(Vec<PassivateIntent>),
    /// Termination acknowledgement: the worker task for `entity_id` has
    /// finished, whether voluntarily, by panic, or by abort.
    WorkerStopped {
        /// The stopped entity.
        entity_id: EntityId,
        /// The worker instance the acknowledgement belongs to; stale acks
        /// from an earlier instance are ignored.
        epoch: u64,
    },
    /// The hand-off deadline for a passivating worker has elapsed.
    HandOffExpired {
        /// The entity that failed to stop in time.
        entity_id: EntityId,
        /// The worker instance the deadline was armed for.
        epoch: u64,
    },
    /// Administrative query for the shard's active entity ids.
    GetState {
        /// Where to send the reply.
        tx: OneshotSender<CurrentShardState>,
    },
    /// Administrative query for the shard's entity occupancy.
    GetStats {
        /// Where to send the reply.
        tx: OneshotSender<ShardStats>,
    },
    /// Indicator that the shard is being deactivated: hand-off timers are
    /// cancelled, active workers are stopped, passivating workers are
    /// force-terminated.
    Shutdown,
}

/// The terminal protocol between a controller and one worker instance.
#[derive(Debug)]
pub enum WorkerMessage<M> {
    /// A normal application payload.
    Deliver(M),
    /// Terminal signal: the worker must drain and terminate. A custom stop
    /// message, if any, is handled before [`Entity::stopped`] runs.
    ///
    /// [`Entity::stopped`]: super::Entity::stopped
    Stop(Option<M>),
}
