//! Per-shard routing and the passivation handshake.
//!
//! Of interest are three pieces:
//!
//! ### [`ShardController`]
//!
//! The single-threaded owner of one shard's entity address space. It is run
//! as its own task, dequeues one [`ShardControllerMessage`] at a time,
//! routes traffic to entity workers, and mediates the stop handshake with
//! them. Nothing else writes a shard's state.
//!
//! ### [`ShardMessenger`]
//!
//! A cheap, cloneable handle to a controller task, used by the host to route
//! traffic and by workers to request their own passivation.
//!
//! ### [`Entity`] / [`EntityFactory`]
//!
//! The application-facing traits: a factory creates one worker per
//! (shard, entity id), and each worker's mailbox is drained by
//! [`Entity::handle`] until the terminal stop signal.

mod controller;
mod message;
mod messenger;
mod worker;

use std::error::Error as StdError;
use std::fmt;

pub use self::controller::ShardController;
pub use self::message::{ShardControllerMessage, WorkerMessage};
pub use self::messenger::ShardMessenger;
pub use self::worker::{Entity, EntityContext, EntityFactory, MessageOf};
use crate::model::{EntityId, ShardId};

/// The lifecycle stage of a hosted entity instance.
///
/// A stopped entity has no slot at all, so only the live stages appear
/// here.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum EntityStatus {
    /// The worker is running and receives routed messages directly.
    Active,
    /// The worker was sent a stop signal; arrivals are buffered until the
    /// termination acknowledgement.
    Passivating,
}

/// An error raised by a shard controller.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum ShardError {
    /// A shard with the same id is already hosted on this node.
    AlreadyStarted(ShardId),
    /// A termination acknowledgement arrived for an entity that was never
    /// asked to stop, and strict mode is enabled.
    InvalidTransition {
        /// The shard whose controller observed the acknowledgement.
        shard_id: ShardId,
        /// The entity that terminated unexpectedly.
        entity_id: EntityId,
    },
}

impl fmt::Display for ShardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyStarted(shard_id) => {
                write!(f, "shard {shard_id} is already started")
            },
            Self::InvalidTransition {
                shard_id,
                entity_id,
            } => write!(
                f,
                "entity {entity_id} on shard {shard_id} terminated while it was still active"
            ),
        }
    }
}

impl StdError for ShardError {}
