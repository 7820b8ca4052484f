use std::collections::HashMap;

use crate::model::EntityId;

/// An ordering of entity ids by most recent access.
///
/// This is a doubly-linked list threaded through a hash map from id to list
/// node, so that [`Self::touch`], [`Self::remove`], and
/// [`Self::least_recent`] are all O(1). Ties between touches are broken by
/// arrival order: the controller that feeds this index is single-threaded.
#[derive(Clone, Debug, Default)]
pub(crate) struct RecencyIndex {
    nodes: HashMap<EntityId, Node>,
    /// Most recently touched id.
    head: Option<EntityId>,
    /// Least recently touched id.
    tail: Option<EntityId>,
}

#[derive(Clone, Debug)]
struct Node {
    newer: Option<EntityId>,
    older: Option<EntityId>,
}

impl RecencyIndex {
    /// Moves `id` to the most-recent position, inserting it if absent.
    pub fn touch(&mut self, id: &EntityId) {
        if self.nodes.contains_key(id) {
            self.unlink(id);
        }

        self.push_front(id.clone());
    }

    /// Removes `id` from the index, returning whether it was present.
    pub fn remove(&mut self, id: &EntityId) -> bool {
        if self.nodes.contains_key(id) {
            self.unlink(id);
            true
        } else {
            false
        }
    }

    /// The least recently touched id, if the index is non-empty.
    pub fn least_recent(&self) -> Option<&EntityId> {
        self.tail.as_ref()
    }

    /// Removes and returns the least recently touched id.
    pub fn pop_least_recent(&mut self) -> Option<EntityId> {
        let id = self.tail.clone()?;
        self.unlink(&id);

        Some(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The tracked ids, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.nodes.keys()
    }

    fn push_front(&mut self, id: EntityId) {
        let old_head = self.head.take();
        if let Some(head) = &old_head {
            if let Some(node) = self.nodes.get_mut(head) {
                node.newer = Some(id.clone());
            }
        }

        self.nodes.insert(id.clone(), Node {
            newer: None,
            older: old_head,
        });

        if self.tail.is_none() {
            self.tail = Some(id.clone());
        }

        self.head = Some(id);
    }

    fn unlink(&mut self, id: &EntityId) {
        let Some(node) = self.nodes.remove(id) else {
            return;
        };

        match &node.newer {
            Some(newer) => {
                if let Some(n) = self.nodes.get_mut(newer) {
                    n.older = node.older.clone();
                }
            },
            None => self.head = node.older.clone(),
        }

        match &node.older {
            Some(older) => {
                if let Some(n) = self.nodes.get_mut(older) {
                    n.newer = node.newer.clone();
                }
            },
            None => self.tail = node.newer.clone(),
        }
    }

    /// The tracked ids ordered most recent first, by walking the list.
    #[cfg(test)]
    fn ordered(&self) -> Vec<EntityId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut cursor = self.head.clone();
        while let Some(id) = cursor {
            cursor = self.nodes.get(&id).and_then(|node| node.older.clone());
            out.push(id);
        }

        out
    }
}
