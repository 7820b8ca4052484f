use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::strategy::Strategy;
use super::PassivateIntent;
use crate::internal::prelude::*;
use crate::model::{EntityId, ShardId};
use crate::settings::Settings;

/// The process-wide owner of the passivation strategy and its bookkeeping.
///
/// Every operation is synchronous and returns any passivation intents by
/// value; the caller (a shard controller, or the host's sweep timer) applies
/// them. Per-shard event recording locks only that shard's tracker entry;
/// the node-wide registry lock is taken for registry changes and sweeps, and
/// held only while the intent list is generated.
#[derive(Debug)]
pub struct PassivationManager {
    strategy: Strategy,
    /// The set of shards currently hosted on this node.
    registry: parking_lot::Mutex<HashSet<ShardId>>,
    /// Per-shard strategy state.
    trackers: DashMap<ShardId, super::ShardTracker>,
    /// Cached per-shard capacity, recomputed on every registry change so
    /// the record path never touches the registry lock.
    per_shard_limit: AtomicUsize,
}

impl PassivationManager {
    /// Creates a manager from the given settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Settings`] if the settings are invalid; an invalid
    /// configuration is fatal.
    pub fn new(settings: &Settings) -> Result<Self> {
        let strategy = settings.strategy().map_err(Error::Settings)?;

        Ok(Self {
            per_shard_limit: AtomicUsize::new(strategy.per_shard_limit(0)),
            strategy,
            registry: parking_lot::Mutex::new(HashSet::new()),
            trackers: DashMap::new(),
        })
    }

    /// Registers a newly activated shard and rebalances per-shard capacity.
    ///
    /// The returned intents evict entities of *other* shards whose share of
    /// the budget shrank; they are ordered oldest first per shard and must
    /// be applied in order.
    pub fn register_shard(&self, shard_id: ShardId) -> Vec<PassivateIntent> {
        let mut registry = self.registry.lock();
        if !registry.insert(shard_id.clone()) {
            warn!("[PassivationManager] Shard {shard_id} is already registered");
            return Vec::new();
        }

        debug!("[PassivationManager] Registered shard {shard_id}");
        self.trackers.insert(shard_id, self.strategy.tracker());

        self.rebalance(registry.len())
    }

    /// Deregisters a deactivated shard, dropping its bookkeeping, and
    /// rebalances per-shard capacity.
    pub fn deregister_shard(&self, shard_id: &ShardId) -> Vec<PassivateIntent> {
        let mut registry = self.registry.lock();
        if !registry.remove(shard_id) {
            warn!("[PassivationManager] Shard {shard_id} is not registered");
            return Vec::new();
        }

        debug!("[PassivationManager] Deregistered shard {shard_id}");
        self.trackers.remove(shard_id);

        self.rebalance(registry.len())
    }

    /// Records the activation of a new entity. Fired by the shard
    /// controller when the first message for an id arrives.
    pub fn record_create(
        &self,
        shard_id: &ShardId,
        entity_id: &EntityId,
        now: Instant,
    ) -> Vec<PassivateIntent> {
        let limit = self.per_shard_limit.load(Ordering::Acquire);
        let Some(mut tracker) = self.trackers.get_mut(shard_id) else {
            warn!("[PassivationManager] Dropping create event for unknown shard {shard_id}");
            return Vec::new();
        };

        let mut intents = Vec::new();
        tracker.on_create(shard_id, entity_id, now, limit, &mut intents);

        intents
    }

    /// Records a message dispatch to an active entity.
    pub fn record_access(
        &self,
        shard_id: &ShardId,
        entity_id: &EntityId,
        now: Instant,
    ) -> Vec<PassivateIntent> {
        let limit = self.per_shard_limit.load(Ordering::Acquire);
        let Some(mut tracker) = self.trackers.get_mut(shard_id) else {
            warn!("[PassivationManager] Dropping access event for unknown shard {shard_id}");
            return Vec::new();
        };

        let mut intents = Vec::new();
        tracker.on_access(shard_id, entity_id, now, limit, &mut intents);

        intents
    }

    /// Records that an entity reached the stopped state and released its
    /// slot.
    pub fn record_stop(&self, shard_id: &ShardId, entity_id: &EntityId) {
        match self.trackers.get_mut(shard_id) {
            Some(mut tracker) => tracker.on_stop(entity_id),
            None => {
                warn!("[PassivationManager] Dropping stop event for unknown shard {shard_id}");
            },
        }
    }

    /// Scans every shard for entities idle past the configured timeout.
    ///
    /// Invoked by the host's sweep timer under the idle strategy; a no-op
    /// under the others.
    pub fn sweep(&self, now: Instant) -> Vec<PassivateIntent> {
        let Strategy::Idle {
            timeout,
        } = self.strategy
        else {
            return Vec::new();
        };

        let registry = self.registry.lock();
        let mut intents = Vec::new();
        for mut entry in self.trackers.iter_mut() {
            let shard_id = entry.key().clone();
            entry.value_mut().take_idle(&shard_id, timeout, now, &mut intents);
        }
        drop(registry);

        intents
    }

    /// The ids currently tracked for `shard_id`.
    ///
    /// This reflects the strategy layer's bookkeeping: an entity that is
    /// mid-handshake may linger here until its stop is recorded. The
    /// `Active`-only view lives with the owning shard controller.
    pub fn snapshot_active(&self, shard_id: &ShardId) -> Vec<EntityId> {
        self.trackers.get(shard_id).map(|tracker| tracker.active_ids()).unwrap_or_default()
    }

    /// The sweep period the host must drive, if the strategy needs one.
    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.strategy.sweep_interval()
    }

    fn rebalance(&self, active_shards: usize) -> Vec<PassivateIntent> {
        let limit = self.strategy.per_shard_limit(active_shards);
        self.per_shard_limit.store(limit, Ordering::Release);

        let mut intents = Vec::new();
        if matches!(self.strategy, Strategy::LeastRecentlyUsed { .. }) {
            for mut entry in self.trackers.iter_mut() {
                let shard_id = entry.key().clone();
                entry.value_mut().shrink_to(&shard_id, limit, &mut intents);
            }
        }

        intents
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;
    use crate::settings::Settings;

    fn shard(n: u8) -> ShardId {
        ShardId::new(&format!("{n}"))
    }

    fn entity(n: u8) -> EntityId {
        EntityId::new(&format!("{n}"))
    }

    fn lru_manager(limit: usize) -> PassivationManager {
        PassivationManager::new(&Settings::least_recently_used(limit)).unwrap()
    }

    #[test]
    fn test_lru_evicts_oldest_beyond_the_limit() {
        let manager = lru_manager(10);
        assert!(manager.register_shard(shard(1)).is_empty());

        let now = Instant::now();
        let mut stops = Vec::new();
        for n in 1..=20 {
            for intent in manager.record_create(&shard(1), &entity(n), now) {
                assert_eq!(intent.shard_id, shard(1));
                manager.record_stop(&intent.shard_id, &intent.entity_id);
                stops.push(intent.entity_id);
            }
        }

        let expected = (1..=10).map(entity).collect::<Vec<_>>();
        assert_eq!(stops, expected);

        let mut active = manager.snapshot_active(&shard(1));
        active.sort();
        let mut survivors = (11..=20).map(entity).collect::<Vec<_>>();
        survivors.sort();
        assert_eq!(active, survivors);
    }

    #[test]
    fn test_lru_victim_is_least_recently_accessed() {
        let manager = lru_manager(3);
        manager.register_shard(shard(1));

        let now = Instant::now();
        for n in 1..=3 {
            assert!(manager.record_create(&shard(1), &entity(n), now).is_empty());
        }

        // Refresh entity 1; entity 2 becomes the victim.
        assert!(manager.record_access(&shard(1), &entity(1), now).is_empty());
        let intents = manager.record_create(&shard(1), &entity(4), now);
        assert_eq!(intents, vec![PassivateIntent {
            shard_id: shard(1),
            entity_id: entity(2),
        }]);
    }

    #[test]
    fn test_registering_a_shard_rebalances_oldest_first() {
        let manager = lru_manager(10);
        manager.register_shard(shard(1));

        let now = Instant::now();
        for n in 1..=10 {
            assert!(manager.record_create(&shard(1), &entity(n), now).is_empty());
        }

        // A second shard halves the per-shard cap; shard 1 must shed its
        // five oldest entities, in age order.
        let intents = manager.register_shard(shard(2));
        let victims = intents.iter().map(|i| i.entity_id.clone()).collect::<Vec<_>>();
        assert!(intents.iter().all(|i| i.shard_id == shard(1)));
        assert_eq!(victims, (1..=5).map(entity).collect::<Vec<_>>());

        assert_eq!(manager.snapshot_active(&shard(1)).len(), 5);
        assert!(manager.snapshot_active(&shard(2)).is_empty());
    }

    #[test]
    fn test_deregistering_a_shard_drops_its_state() {
        let manager = lru_manager(10);
        manager.register_shard(shard(1));
        manager.register_shard(shard(2));
        manager.record_create(&shard(2), &entity(1), Instant::now());

        assert!(manager.deregister_shard(&shard(2)).is_empty());
        assert!(manager.snapshot_active(&shard(2)).is_empty());

        // Capacity grew back to the full budget.
        let now = Instant::now();
        for n in 1..=10 {
            assert!(manager.record_create(&shard(1), &entity(n), now).is_empty());
        }
    }

    #[test]
    fn test_unknown_shard_events_are_dropped() {
        let manager = lru_manager(10);
        assert!(manager.record_create(&shard(9), &entity(1), Instant::now()).is_empty());
        assert!(manager.record_access(&shard(9), &entity(1), Instant::now()).is_empty());
        manager.record_stop(&shard(9), &entity(1));
        assert!(manager.snapshot_active(&shard(9)).is_empty());
        assert!(manager.deregister_shard(&shard(9)).is_empty());
    }

    #[test]
    fn test_idle_sweep_emits_between_timeout_and_timeout_plus_tick() {
        let timeout = Duration::from_secs(1);
        let manager = PassivationManager::new(&Settings::idle(timeout)).unwrap();
        assert_eq!(manager.sweep_interval(), Some(Duration::from_millis(500)));
        manager.register_shard(shard(1));

        let start = Instant::now();
        manager.record_create(&shard(1), &entity(1), start);
        manager.record_access(&shard(1), &entity(2), start + Duration::from_millis(400));

        assert!(manager.sweep(start + Duration::from_millis(999)).is_empty());

        let intents = manager.sweep(start + Duration::from_millis(1100));
        assert_eq!(intents, vec![PassivateIntent {
            shard_id: shard(1),
            entity_id: entity(1),
        }]);

        // Entity 1 is mid-handshake now and must not be re-emitted.
        let intents = manager.sweep(start + Duration::from_millis(1500));
        assert_eq!(intents, vec![PassivateIntent {
            shard_id: shard(1),
            entity_id: entity(2),
        }]);
    }

    #[test]
    fn test_disabled_strategy_emits_nothing_but_snapshots() {
        let manager = PassivationManager::new(&Settings::disabled()).unwrap();
        assert_eq!(manager.sweep_interval(), None);
        manager.register_shard(shard(1));

        let now = Instant::now();
        for n in 1..=50 {
            assert!(manager.record_create(&shard(1), &entity(n), now).is_empty());
            assert!(manager.record_access(&shard(1), &entity(n), now).is_empty());
        }
        assert!(manager.sweep(now + Duration::from_secs(3600)).is_empty());
        assert_eq!(manager.snapshot_active(&shard(1)).len(), 50);

        manager.record_stop(&shard(1), &entity(1));
        assert_eq!(manager.snapshot_active(&shard(1)).len(), 49);
    }

    // P1: however creates and accesses interleave, no shard tracks more
    // entities than its share of the budget.
    #[quickcheck]
    fn prop_lru_bound_holds(ops: Vec<(u8, u8)>, limit: u8) -> bool {
        let limit = usize::from(limit % 16) + 1;
        let manager = lru_manager(limit);
        let shards = [shard(1), shard(2), shard(3)];
        for s in &shards {
            manager.register_shard(s.clone());
        }

        let per_shard = (limit / shards.len()).max(1);
        let now = Instant::now();
        for (s, e) in ops {
            let shard_id = &shards[usize::from(s) % shards.len()];
            let entity_id = entity(e % 64);
            let intents = if manager.snapshot_active(shard_id).contains(&entity_id) {
                manager.record_access(shard_id, &entity_id, now)
            } else {
                manager.record_create(shard_id, &entity_id, now)
            };
            for intent in intents {
                manager.record_stop(&intent.shard_id, &intent.entity_id);
            }

            if shards.iter().any(|s| manager.snapshot_active(s).len() > per_shard) {
                return false;
            }
        }

        true
    }

    // P2/P7: feeding n distinct entities through a shard with capacity k
    // evicts exactly the first n - k of them, in arrival order.
    #[quickcheck]
    fn prop_lru_victims_arrive_oldest_first(count: u8, limit: u8) -> bool {
        let count = usize::from(count % 64);
        let limit = usize::from(limit % 16) + 1;
        let manager = lru_manager(limit);
        manager.register_shard(shard(1));

        let now = Instant::now();
        let mut victims = Vec::new();
        for n in 0..count {
            let intents = manager.record_create(&shard(1), &entity(n as u8), now);
            for intent in intents {
                manager.record_stop(&intent.shard_id, &intent.entity_id);
                victims.push(intent.entity_id);
            }
        }

        let expected =
            (0..count.saturating_sub(limit)).map(|n| entity(n as u8)).collect::<Vec<_>>();
        victims == expected
    }

    // P7: activating one more shard sheds exactly size - new_limit entities
    // from a full shard.
    #[quickcheck]
    fn prop_rebalance_sheds_exactly_the_excess(limit: u8) -> bool {
        let limit = usize::from(limit % 32) + 2;
        let manager = lru_manager(limit);
        manager.register_shard(shard(1));

        let now = Instant::now();
        for n in 0..limit {
            if !manager.record_create(&shard(1), &entity(n as u8), now).is_empty() {
                return false;
            }
        }

        let intents = manager.register_shard(shard(2));
        let new_limit = (limit / 2).max(1);
        intents.len() == limit.saturating_sub(new_limit)
            && manager.snapshot_active(&shard(1)).len() == new_limit
    }
}
