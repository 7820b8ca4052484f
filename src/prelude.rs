//! A set of exports which can be helpful to use.
//!
//! Note that the `ShardhostError` re-export is equivalent to
//! [`shardhost::Error`], re-exported under a separate name to remove likely
//! ambiguity with other crate error enums.
//!
//! # Examples
//!
//! Import all of the exports:
//!
//! ```rust
//! use shardhost::prelude::*;
//! ```
//!
//! [`shardhost::Error`]: crate::Error

pub use crate::error::Error as ShardhostError;
pub use crate::model::{CurrentShardState, EntityId, ShardId, ShardStats};
pub use crate::passivation::{PassivateIntent, PassivationManager};
pub use crate::settings::Settings;
pub use crate::shard::{Entity, EntityContext, EntityFactory, ShardMessenger};
pub use crate::{async_trait, ShardHost};
