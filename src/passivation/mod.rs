//! The passivation engine: policy state and the node-wide manager that owns
//! it.
//!
//! Of interest are two pieces:
//!
//! ### [`PassivationManager`]
//!
//! The process-wide owner of the configured strategy, the registry of hosted
//! shards, and the per-shard recency/idle bookkeeping. Shard controllers
//! feed it lifecycle events (`record_create`, `record_access`,
//! `record_stop`) and apply the [`PassivateIntent`]s it returns.
//!
//! ### [`PassivateIntent`]
//!
//! An instruction to passivate one entity. Intents are generated under the
//! manager's locks but applied by the owning shard controller, so intent
//! generation never waits on a handshake.

mod idle;
mod manager;
mod recency;
mod strategy;

pub use self::manager::PassivationManager;
pub(crate) use self::strategy::{ShardTracker, Strategy};
use crate::model::{EntityId, ShardId};

/// An instruction to passivate one entity, produced by the
/// [`PassivationManager`] and applied by the entity's shard controller.
///
/// Within one batch, intents for a shard are ordered oldest first and must
/// be applied in order.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PassivateIntent {
    /// The shard hosting the entity.
    pub shard_id: ShardId,
    /// The entity to passivate.
    pub entity_id: EntityId,
}
