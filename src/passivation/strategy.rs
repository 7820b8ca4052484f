use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::time::Duration;

use tokio::time::Instant;

use super::idle::IdleTracker;
use super::recency::RecencyIndex;
use super::PassivateIntent;
use crate::constants;
use crate::model::{EntityId, ShardId};

/// The passivation policy resolved from validated settings.
///
/// Deliberately a tagged variant rather than a trait object: the state it
/// carries stays explicit and the dispatch is a handful of `match` arms.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Strategy {
    /// Consume events, emit nothing.
    Disabled,
    /// Passivate entities idle for at least `timeout`.
    Idle { timeout: Duration },
    /// Bound the node to `limit` active entities across hosted shards.
    LeastRecentlyUsed { limit: NonZeroUsize },
}

impl Strategy {
    /// Fresh per-shard state for this strategy.
    pub fn tracker(&self) -> ShardTracker {
        match self {
            Self::Disabled => ShardTracker::Disabled {
                active: HashSet::new(),
            },
            Self::Idle {
                ..
            } => ShardTracker::Idle {
                last_touched: IdleTracker::default(),
            },
            Self::LeastRecentlyUsed {
                ..
            } => ShardTracker::LeastRecentlyUsed {
                recency: RecencyIndex::default(),
            },
        }
    }

    /// The sweep period driving idle detection, if this strategy needs one.
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self {
            Self::Idle {
                timeout,
            } => Some((*timeout / 2).max(constants::MIN_SWEEP_INTERVAL)),
            _ => None,
        }
    }

    /// The per-shard active-entity cap given the current number of hosted
    /// shards.
    pub fn per_shard_limit(&self, active_shards: usize) -> usize {
        match self {
            Self::LeastRecentlyUsed {
                limit,
            } => {
                if active_shards == 0 {
                    limit.get()
                } else {
                    (limit.get() / active_shards).max(1)
                }
            },
            _ => usize::MAX,
        }
    }
}

/// Per-shard strategy state, one variant per [`Strategy`] variant.
#[derive(Clone, Debug)]
pub(crate) enum ShardTracker {
    Disabled { active: HashSet<EntityId> },
    Idle { last_touched: IdleTracker },
    LeastRecentlyUsed { recency: RecencyIndex },
}

impl ShardTracker {
    /// Consumes an entity-activated event, appending any eviction intents.
    pub fn on_create(
        &mut self,
        shard_id: &ShardId,
        entity_id: &EntityId,
        now: Instant,
        limit: usize,
        intents: &mut Vec<PassivateIntent>,
    ) {
        match self {
            Self::Disabled {
                active,
            } => {
                active.insert(entity_id.clone());
            },
            Self::Idle {
                last_touched,
            } => last_touched.touch(entity_id, now),
            Self::LeastRecentlyUsed {
                recency,
            } => {
                recency.touch(entity_id);
                Self::evict_over_limit(recency, shard_id, limit, intents);
            },
        }
    }

    /// Consumes a message-dispatch event, appending any eviction intents.
    pub fn on_access(
        &mut self,
        shard_id: &ShardId,
        entity_id: &EntityId,
        now: Instant,
        limit: usize,
        intents: &mut Vec<PassivateIntent>,
    ) {
        match self {
            // Nothing to maintain: accesses only matter to recency and idle
            // accounting.
            Self::Disabled {
                ..
            } => {},
            Self::Idle {
                last_touched,
            } => last_touched.touch(entity_id, now),
            Self::LeastRecentlyUsed {
                recency,
            } => {
                recency.touch(entity_id);
                Self::evict_over_limit(recency, shard_id, limit, intents);
            },
        }
    }

    /// Consumes an entity-stopped event.
    pub fn on_stop(&mut self, entity_id: &EntityId) {
        match self {
            Self::Disabled {
                active,
            } => {
                active.remove(entity_id);
            },
            Self::Idle {
                last_touched,
            } => {
                last_touched.remove(entity_id);
            },
            Self::LeastRecentlyUsed {
                recency,
            } => {
                recency.remove(entity_id);
            },
        }
    }

    /// Shrinks the shard to `limit` tracked entities, oldest first. Only
    /// meaningful under the least-recently-used strategy.
    pub fn shrink_to(
        &mut self,
        shard_id: &ShardId,
        limit: usize,
        intents: &mut Vec<PassivateIntent>,
    ) {
        if let Self::LeastRecentlyUsed {
            recency,
        } = self
        {
            Self::evict_over_limit(recency, shard_id, limit, intents);
        }
    }

    /// Drains every entity idle for at least `timeout`, oldest first. Only
    /// meaningful under the idle strategy.
    pub fn take_idle(
        &mut self,
        shard_id: &ShardId,
        timeout: Duration,
        now: Instant,
        intents: &mut Vec<PassivateIntent>,
    ) {
        if let Self::Idle {
            last_touched,
        } = self
        {
            for entity_id in last_touched.take_idle(timeout, now) {
                intents.push(PassivateIntent {
                    shard_id: shard_id.clone(),
                    entity_id,
                });
            }
        }
    }

    /// The ids currently tracked for the shard.
    pub fn active_ids(&self) -> Vec<EntityId> {
        match self {
            Self::Disabled {
                active,
            } => active.iter().cloned().collect(),
            Self::Idle {
                last_touched,
            } => last_touched.ids().cloned().collect(),
            Self::LeastRecentlyUsed {
                recency,
            } => recency.ids().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Disabled {
                active,
            } => active.len(),
            Self::Idle {
                last_touched,
            } => last_touched.len(),
            Self::LeastRecentlyUsed {
                recency,
            } => recency.len(),
        }
    }

    fn evict_over_limit(
        recency: &mut RecencyIndex,
        shard_id: &ShardId,
        limit: usize,
        intents: &mut Vec<PassivateIntent>,
    ) {
        while recency.len() > limit {
            match recency.pop_least_recent() {
                Some(entity_id) => intents.push(PassivateIntent {
                    shard_id: shard_id.clone(),
                    entity_id,
                }),
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_interval_is_half_the_timeout() {
        let strategy = Strategy::Idle {
            timeout: Duration::from_secs(3),
        };
        assert_eq!(strategy.sweep_interval(), Some(Duration::from_millis(1500)));
        assert_eq!(Strategy::Disabled.sweep_interval(), None);
    }

    #[test]
    fn test_per_shard_limit_divides_the_budget() {
        let strategy = Strategy::LeastRecentlyUsed {
            limit: NonZeroUsize::new(10).unwrap(),
        };
        assert_eq!(strategy.per_shard_limit(1), 10);
        assert_eq!(strategy.per_shard_limit(2), 5);
        assert_eq!(strategy.per_shard_limit(3), 3);
        // Never starve a shard entirely.
        assert_eq!(strategy.per_shard_limit(11), 1);
        assert_eq!(Strategy::Disabled.per_shard_limit(4), usize::MAX);
    }
}
