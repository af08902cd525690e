//! Node types and the type registry.
//!
//! A node type is a capability descriptor: a name, an ABI version, and a
//! set of optional callbacks. Rather than null-checked function pointers,
//! every callback has a default body on [`NodeType`] and the framework only
//! invokes the ones announced in [`NodeType::capabilities`].
//!
//! # Example
//!
//! ```ignore
//! use ngraph_base::prelude::*;
//!
//! struct Hole;
//!
//! impl NodeType for Hole {
//!     fn name(&self) -> &str { "hole" }
//!     fn capabilities(&self) -> Capabilities {
//!         Capabilities::CONSTRUCTOR | Capabilities::RCVDATA
//!     }
//! }
//!
//! graph.register_type(Arc::new(Hole))?;
//! ```

use crate::codec::{CommandInfo, MessageCodec};
use crate::error::{NgError, Result};
use crate::hook::Hook;
use crate::item::Item;
use crate::message::{Message, TypeInfo};
use crate::node::Node;
use crate::reply::Responder;
use bitflags::bitflags;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// ABI version node types must be built against.
pub const ABI_VERSION: u32 = 12;

/// Type names must be strictly shorter than this.
pub const TYPE_NAME_MAX: usize = 32;

bitflags! {
    /// The callbacks a node type implements.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u32 {
        /// [`NodeType::constructor`]. Required by `create_node`.
        const CONSTRUCTOR = 1 << 0;
        /// [`NodeType::new_hook`].
        const NEWHOOK = 1 << 1;
        /// [`NodeType::find_hook`].
        const FINDHOOK = 1 << 2;
        /// [`NodeType::rcvmsg`].
        const RCVMSG = 1 << 3;
        /// [`NodeType::rcvdata`].
        const RCVDATA = 1 << 4;
        /// [`NodeType::connect`].
        const CONNECT = 1 << 5;
        /// [`NodeType::disconnect`].
        const DISCONNECT = 1 << 6;
        /// [`NodeType::close`].
        const CLOSE = 1 << 7;
        /// [`NodeType::shutdown`].
        const SHUTDOWN = 1 << 8;
    }
}

/// Behavior shared by every node of one type.
///
/// All callbacks are invoked with the node's lock held in the mode the
/// triggering item asked for. Callbacks that are not listed in
/// [`capabilities`](Self::capabilities) are never called.
pub trait NodeType: Send + Sync + 'static {
    /// Unique type name.
    fn name(&self) -> &str;

    /// ABI version the type was written against.
    fn abi_version(&self) -> u32 {
        ABI_VERSION
    }

    /// The callbacks this type implements.
    fn capabilities(&self) -> Capabilities;

    /// Initializes a freshly created node. An error discards the node.
    fn constructor(&self, _node: &Node) -> Result<()> {
        Ok(())
    }

    /// Veto point for a new hook on `node`.
    fn new_hook(&self, _node: &Node, _hook: &Hook, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Replaces the default linear hook lookup.
    fn find_hook(&self, _node: &Node, _name: &str) -> Option<Hook> {
        None
    }

    /// Handles a control message. Respond through `reply`.
    fn rcvmsg(
        &self,
        _node: &Node,
        _msg: Message,
        _reply: &mut Responder,
        _lasthook: Option<&Hook>,
    ) -> Result<()> {
        Ok(())
    }

    /// Handles a data item arriving on `hook`.
    fn rcvdata(&self, _hook: &Hook, _item: Item) -> Result<()> {
        Ok(())
    }

    /// Veto point once `hook` has been paired with a peer.
    fn connect(&self, _hook: &Hook) -> Result<()> {
        Ok(())
    }

    /// Called after `hook` was removed from its node.
    fn disconnect(&self, _hook: &Hook) {}

    /// Called at the start of shutdown, before hooks are destroyed.
    fn close(&self, _node: &Node) {}

    /// Called at the end of shutdown. Calling
    /// [`Node::revive`] here keeps the node alive.
    fn shutdown(&self, _node: &Node) {}

    /// Type-specific commands known to the codec.
    fn commands(&self) -> &[CommandInfo] {
        &[]
    }

    /// Codec for this type's commands. `None` selects the JSON codec.
    fn codec(&self) -> Option<&dyn MessageCodec> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TypeEntry
// ─────────────────────────────────────────────────────────────────────────────

/// A registered type together with its live-node count.
pub(crate) struct TypeEntry {
    name: Arc<str>,
    ops: Arc<dyn NodeType>,
    caps: Capabilities,
    live: AtomicUsize,
}

impl TypeEntry {
    pub(crate) fn new(ops: Arc<dyn NodeType>) -> Self {
        Self {
            name: Arc::from(ops.name()),
            caps: ops.capabilities(),
            ops,
            live: AtomicUsize::new(0),
        }
    }

    pub(crate) fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) fn ops(&self) -> &dyn NodeType {
        &*self.ops
    }

    pub(crate) fn shared(&self) -> Arc<dyn NodeType> {
        Arc::clone(&self.ops)
    }

    pub(crate) fn has(&self, cap: Capabilities) -> bool {
        self.caps.contains(cap)
    }

    pub(crate) fn live_nodes(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn node_released(&self) {
        let prev = self.live.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "live node count underflow for type {}", self.name);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TypeRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Name to type map, in registration order.
#[derive(Default)]
pub(crate) struct TypeRegistry {
    types: RwLock<IndexMap<Arc<str>, Arc<TypeEntry>>>,
}

impl TypeRegistry {
    pub(crate) fn register(&self, ops: Arc<dyn NodeType>) -> Result<()> {
        if ops.abi_version() != ABI_VERSION {
            return Err(NgError::VersionMismatch);
        }
        let name = ops.name();
        if name.is_empty() || name.len() >= TYPE_NAME_MAX {
            return Err(NgError::InvalidArgument);
        }
        let mut types = self.types.write();
        if types.contains_key(name) {
            return Err(NgError::AlreadyExists);
        }
        let entry = Arc::new(TypeEntry::new(ops));
        debug!(type_name = %entry.name, "registered node type");
        types.insert(Arc::clone(&entry.name), entry);
        Ok(())
    }

    pub(crate) fn unregister(&self, name: &str) -> Result<()> {
        let mut types = self.types.write();
        let entry = types.get(name).ok_or(NgError::NotFound)?;
        if entry.live_nodes() != 0 {
            return Err(NgError::Busy);
        }
        types.shift_remove(name);
        debug!(type_name = name, "unregistered node type");
        Ok(())
    }

    pub(crate) fn find(&self, name: &str) -> Option<Arc<TypeEntry>> {
        self.types.read().get(name).cloned()
    }

    /// Looks up a type and counts one more live node against it. Holding
    /// the read lock keeps this atomic with respect to `unregister`.
    pub(crate) fn acquire(&self, name: &str) -> Result<Arc<TypeEntry>> {
        let types = self.types.read();
        let entry = types.get(name).ok_or(NgError::NotFound)?;
        entry.live.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::clone(entry))
    }

    pub(crate) fn snapshot(&self) -> Vec<TypeInfo> {
        self.types
            .read()
            .values()
            .map(|entry| TypeInfo {
                type_name: entry.name.to_string(),
                num_nodes: entry.live_nodes() as u32,
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.types.read().len()
    }
}
