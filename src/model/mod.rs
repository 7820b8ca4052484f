//! Identifier newtypes and the data returned by administrative queries.
//!
//! Entities and shards are addressed by stable, non-empty string keys. The
//! newtypes here wrap those keys in `Arc<str>` so that the recency and idle
//! bookkeeping can clone them freely.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::internal::prelude::*;

/// An error returned from the model types.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModelError {
    /// An entity or shard id was constructed from an empty string.
    EmptyId,
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyId => f.write_str("identifiers must be non-empty"),
        }
    }
}

impl StdError for ModelError {}

macro_rules! string_id {
    ($(#[$attr:meta] $name:ident;)+) => {$(
        #[$attr]
        #[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Creates a new id from the given string.
            ///
            /// # Panics
            ///
            /// Panics if `id` is empty. Use [`TryFrom`] for a fallible
            /// conversion.
            #[must_use]
            #[track_caller]
            pub fn new(id: &str) -> Self {
                match Self::try_from(id) {
                    Ok(id) => id,
                    Err(_) => panic!(
                        "Attempted to call {}::new with an empty value",
                        stringify!($name)
                    ),
                }
            }

            /// The id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<&str> for $name {
            type Error = ModelError;

            fn try_from(value: &str) -> StdResult<Self, Self::Error> {
                if value.is_empty() {
                    Err(ModelError::EmptyId)
                } else {
                    Ok(Self(Arc::from(value)))
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ModelError;

            fn try_from(value: String) -> StdResult<Self, Self::Error> {
                if value.is_empty() {
                    Err(ModelError::EmptyId)
                } else {
                    Ok(Self(Arc::from(value)))
                }
            }
        }

        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> StdResult<Self, Self::Err> {
                Self::try_from(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> StdResult<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> StdResult<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                Self::try_from(value).map_err(DeError::custom)
            }
        }
    )+};
}

string_id! {
    /// A stable identifier for an entity, unique within its shard.
    EntityId;
    /// An identifier for a shard hosted on this node, unique within the node.
    ShardId;
}

/// The administrative view of one shard, as returned by
/// [`ShardHost::shard_state`].
///
/// [`ShardHost::shard_state`]: crate::ShardHost::shard_state
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CurrentShardState {
    /// The shard this snapshot describes.
    pub shard_id: ShardId,
    /// The ids of the entities currently in the `Active` state.
    ///
    /// Entities that are mid-handshake (`Passivating`) are not included.
    pub active_ids: HashSet<EntityId>,
}

/// Entity occupancy statistics for one shard, as returned by
/// [`ShardHost::shard_stats`].
///
/// [`ShardHost::shard_stats`]: crate::ShardHost::shard_stats
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ShardStats {
    /// The shard these statistics describe.
    pub shard_id: ShardId,
    /// The number of entities currently in the `Active` state.
    pub entity_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(EntityId::new("counter-1").to_string(), "counter-1");
        assert_eq!(ShardId::new("7").as_str(), "7");
    }

    #[test]
    fn test_empty_id_is_rejected() {
        assert_eq!(EntityId::try_from(""), Err(ModelError::EmptyId));
        assert_eq!(ShardId::try_from(String::new()), Err(ModelError::EmptyId));
        assert!("x".parse::<EntityId>().is_ok());
    }

    #[test]
    #[should_panic(expected = "Attempted to call EntityId::new with an empty value")]
    fn test_empty_id_panics() {
        drop(EntityId::new(""));
    }

    #[test]
    fn test_id_serde() {
        let id = ShardId::new("region-a");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"region-a\"");
        assert_eq!(serde_json::from_str::<ShardId>(&json).unwrap(), id);
        assert!(serde_json::from_str::<EntityId>("\"\"").is_err());
    }
}
