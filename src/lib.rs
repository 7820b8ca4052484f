//! Shardhost is the entity passivation engine of a cluster-sharding node.
//!
//! In cluster sharding, a namespace of *entities* (identified by stable
//! string keys) is partitioned across *shards*, and each node hosts the
//! active entity workers of some set of shards. Active workers consume
//! memory, so long-lived processes must *passivate* entities that are no
//! longer useful: stop them gracefully, without losing the messages that
//! arrive while they are stopping, and leave their ids re-activatable.
//!
//! This library decides which entity to evict and when, per shard, and runs
//! the two-phase stop handshake with the workers:
//!
//! - a [`ShardHost`] hosts one [`ShardController`] task per shard and
//!   routes traffic to it;
//! - each controller owns its shard's state exclusively, creating entity
//!   workers on first delivery and retiring them through a stop-signal /
//!   termination-acknowledgement handshake that buffers concurrent
//!   arrivals;
//! - a process-wide [`PassivationManager`] runs the configured strategy:
//!   none, idle timeout, or a least-recently-used bound on the number of
//!   active entities, divided across the currently hosted shards.
//!
//! Applications implement [`Entity`] for their workers and [`EntityFactory`]
//! to create them; see the type-level docs for examples. What this library
//! deliberately does not do: cluster membership, shard allocation,
//! persistence, or serialization of application messages.
//!
//! [`ShardController`]: crate::shard::ShardController
//! [`PassivationManager`]: crate::passivation::PassivationManager
//! [`Entity`]: crate::shard::Entity
//! [`EntityFactory`]: crate::shard::EntityFactory
#![doc(html_root_url = "https://docs.rs/shardhost/*")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rust_2018_idioms)]
#![warn(missing_docs)]

mod internal;

pub mod constants;
pub mod error;
pub mod model;
pub mod passivation;
pub mod prelude;
pub mod settings;
pub mod shard;

mod host;

pub use async_trait::async_trait;

pub use crate::error::{Error, Result};
pub use crate::host::ShardHost;
