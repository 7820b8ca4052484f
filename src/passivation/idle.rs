use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::model::EntityId;

/// Tracks the last time each active entity of a shard was dispatched a
/// message.
///
/// The recorded instant is when the shard controller began dispatching, not
/// when the worker got around to processing, so idle detection is
/// independent of worker latency.
#[derive(Clone, Debug, Default)]
pub(crate) struct IdleTracker {
    last_touched: HashMap<EntityId, Instant>,
}

impl IdleTracker {
    pub fn touch(&mut self, id: &EntityId, now: Instant) {
        self.last_touched.insert(id.clone(), now);
    }

    pub fn remove(&mut self, id: &EntityId) -> bool {
        self.last_touched.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.last_touched.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.last_touched.keys()
    }

    /// Removes and returns every id that has been idle for at least
    /// `timeout` at `now`, oldest first.
    pub fn take_idle(&mut self, timeout: Duration, now: Instant) -> Vec<EntityId> {
        let mut idle = self
            .last_touched
            .iter()
            .filter(|(_, touched)| now.saturating_duration_since(**touched) >= timeout)
            .map(|(id, touched)| (*touched, id.clone()))
            .collect::<Vec<_>>();
        idle.sort_by_key(|(touched, _)| *touched);

        for (_, id) in &idle {
            self.last_touched.remove(id);
        }

        idle.into_iter().map(|(_, id)| id).collect()
    }
}
