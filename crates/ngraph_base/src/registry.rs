//! ID and Name registries.
//!
//! Both are open bucket tables of non-owning back-references to nodes.
//! The bucket count doubles whenever the load exceeds two entries per
//! bucket. Entries are removed when the node itself is dropped, so a
//! registered ID stays reserved until the last reference is gone.
//!
//! Lookups only return valid nodes. A node handle upgraded while a table
//! lock is held must be dropped after the lock is released: dropping the
//! last handle unregisters the node, which takes the same lock.

use crate::error::{NgError, Result};
use crate::node::{Node, NodeId, NodeInner};
use core::hash::BuildHasher;
use hashbrown::DefaultHashBuilder;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// Maximum entries per bucket before the table doubles.
const MAX_LOAD: usize = 2;

struct Entry<K> {
    key: K,
    id: NodeId,
    node: Weak<NodeInner>,
}

/// Bucket table keyed by a precomputed hash.
struct NodeTable<K> {
    buckets: Vec<Vec<Entry<K>>>,
    len: usize,
}

impl<K: Eq> NodeTable<K> {
    fn new(buckets: usize) -> Self {
        let count = buckets.max(1).next_power_of_two();
        Self {
            buckets: (0..count).map(|_| Vec::new()).collect(),
            len: 0,
        }
    }

    fn mask(&self) -> u64 {
        (self.buckets.len() - 1) as u64
    }

    fn bucket(&self, hash: u64) -> &[Entry<K>] {
        &self.buckets[(hash & self.mask()) as usize]
    }

    fn insert(&mut self, hash: u64, entry: Entry<K>, rehash: impl Fn(&K) -> u64) {
        let slot = (hash & self.mask()) as usize;
        self.buckets[slot].push(entry);
        self.len += 1;
        if self.len > MAX_LOAD * self.buckets.len() {
            self.grow(rehash);
        }
    }

    fn grow(&mut self, rehash: impl Fn(&K) -> u64) {
        let count = self.buckets.len() * 2;
        let old = core::mem::replace(&mut self.buckets, (0..count).map(|_| Vec::new()).collect());
        let mask = (count - 1) as u64;
        for entry in old.into_iter().flatten() {
            let slot = (rehash(&entry.key) & mask) as usize;
            self.buckets[slot].push(entry);
        }
    }

    /// Removes the entry owned by `id` from the bucket for `hash`.
    fn remove(&mut self, hash: u64, id: NodeId) -> bool {
        let slot = (hash & self.mask()) as usize;
        let bucket = &mut self.buckets[slot];
        match bucket.iter().position(|entry| entry.id == id) {
            Some(pos) => {
                bucket.swap_remove(pos);
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    fn entries(&self) -> impl Iterator<Item = &Entry<K>> {
        self.buckets.iter().flatten()
    }
}

struct IdTable {
    table: NodeTable<NodeId>,
    next: u32,
}

fn id_hash(id: &NodeId) -> u64 {
    u64::from(id.get())
}

// ─────────────────────────────────────────────────────────────────────────────
// Registries
// ─────────────────────────────────────────────────────────────────────────────

/// The ID and Name tables of one graph.
pub(crate) struct Registries {
    ids: RwLock<IdTable>,
    names: RwLock<NodeTable<Arc<str>>>,
    hasher: DefaultHashBuilder,
}

impl Registries {
    pub(crate) fn new(buckets: usize) -> Self {
        Self {
            ids: RwLock::new(IdTable {
                table: NodeTable::new(buckets),
                next: 1,
            }),
            names: RwLock::new(NodeTable::new(buckets)),
            hasher: DefaultHashBuilder::default(),
        }
    }

    fn name_hash(&self, name: &str) -> u64 {
        self.hasher.hash_one(name)
    }

    /// Draws a fresh ID, builds the node with it and registers it.
    ///
    /// The counter wraps at 32 bits. Zero and IDs still held by a
    /// registered node are skipped; once every candidate has been tried
    /// the allocation fails.
    pub(crate) fn register(&self, build: impl FnOnce(NodeId) -> Node) -> Result<Node> {
        let mut ids = self.ids.write();
        let attempts = ids.table.len + 1;
        let mut found = None;
        for _ in 0..=attempts {
            let raw = ids.next;
            ids.next = ids.next.wrapping_add(1);
            let Some(id) = NodeId::new(raw) else {
                continue;
            };
            if !ids.table.bucket(id_hash(&id)).iter().any(|e| e.id == id) {
                found = Some(id);
                break;
            }
        }
        let id = found.ok_or(NgError::OutOfMemory)?;
        let node = build(id);
        let entry = Entry {
            key: id,
            id,
            node: Arc::downgrade(node.inner()),
        };
        ids.table.insert(id_hash(&id), entry, id_hash);
        Ok(node)
    }

    /// Removes every table entry belonging to `id`.
    pub(crate) fn unregister(&self, id: NodeId, name: Option<&str>) {
        self.ids.write().table.remove(id_hash(&id), id);
        if let Some(name) = name {
            let hash = self.name_hash(name);
            self.names.write().remove(hash, id);
        }
    }

    pub(crate) fn find_id(&self, id: NodeId) -> Option<Node> {
        let node = {
            let ids = self.ids.read();
            ids.table
                .bucket(id_hash(&id))
                .iter()
                .find(|e| e.id == id)
                .and_then(|e| e.node.upgrade())
        }
        .map(Node::from_inner)?;
        node.is_valid().then_some(node)
    }

    pub(crate) fn find_name(&self, name: &str) -> Option<Node> {
        let hash = self.name_hash(name);
        let candidates: Vec<Node> = {
            let names = self.names.read();
            names
                .bucket(hash)
                .iter()
                .filter(|e| &*e.key == name)
                .filter_map(|e| e.node.upgrade())
                .map(Node::from_inner)
                .collect()
        };
        candidates.into_iter().find(Node::is_valid)
    }

    /// Moves `node` under `name` in the Name table.
    ///
    /// Fails with `AlreadyExists` if another valid node holds the name.
    pub(crate) fn set_name(&self, node: &Node, name: &str) -> Result<()> {
        let new_hash = self.name_hash(name);
        // Declared before the guard so upgraded handles outlive it.
        let mut held: Vec<Node> = Vec::new();
        let mut names = self.names.write();
        for entry in names.bucket(new_hash) {
            if &*entry.key != name || entry.id == node.id() {
                continue;
            }
            if let Some(other) = entry.node.upgrade() {
                let other = Node::from_inner(other);
                let taken = other.is_valid();
                held.push(other);
                if taken {
                    return Err(NgError::AlreadyExists);
                }
            }
        }
        let key: Arc<str> = Arc::from(name);
        if let Some(old) = node.replace_name(Some(Arc::clone(&key))) {
            let old_hash = self.name_hash(&old);
            names.remove(old_hash, node.id());
        }
        let entry = Entry {
            key,
            id: node.id(),
            node: Arc::downgrade(node.inner()),
        };
        let hasher = &self.hasher;
        names.insert(new_hash, entry, |key| hasher.hash_one(&**key));
        drop(names);
        drop(held);
        Ok(())
    }

    /// Valid nodes, at most `limit` of them, optionally only named ones.
    pub(crate) fn snapshot(&self, limit: usize, named_only: bool) -> Vec<Node> {
        let mut out = Vec::with_capacity(limit);
        let mut skipped: Vec<Node> = Vec::new();
        let ids = self.ids.read();
        for entry in ids.table.entries() {
            if out.len() == limit {
                break;
            }
            let Some(inner) = entry.node.upgrade() else {
                continue;
            };
            let node = Node::from_inner(inner);
            if node.is_valid() && (!named_only || node.name().is_some()) {
                out.push(node);
            } else {
                skipped.push(node);
            }
        }
        drop(ids);
        drop(skipped);
        out
    }

    /// Every registered node that is still alive, valid or not.
    pub(crate) fn all_nodes(&self) -> Vec<Node> {
        let ids = self.ids.read();
        let nodes = ids
            .table
            .entries()
            .filter_map(|e| e.node.upgrade())
            .map(Node::from_inner)
            .collect();
        drop(ids);
        nodes
    }

    pub(crate) fn id_count(&self) -> usize {
        self.ids.read().table.len
    }

    pub(crate) fn name_count(&self) -> usize {
        self.names.read().len
    }

    pub(crate) fn id_buckets(&self) -> usize {
        self.ids.read().table.buckets.len()
    }

    pub(crate) fn name_buckets(&self) -> usize {
        self.names.read().buckets.len()
    }
}
