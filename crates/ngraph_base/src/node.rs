//! Graph vertices.
//!
//! A [`Node`] is a cheap, cloneable strong handle. While a node has not
//! been shut down it also holds a reference to itself, so it stays
//! addressable after every external handle is dropped. Shutdown releases
//! that self-reference; the node is unregistered from the ID and Name
//! tables when the last handle goes away.
//!
//! # Example
//!
//! ```ignore
//! let node = graph.create_node("echo")?;
//! node.set_name("e1")?;
//! let out = node.add_hook("out")?;
//! assert!(!out.is_valid()); // unconnected
//! node.shutdown();
//! ```

use crate::callout::Callout;
use crate::dispatch::{self, Address};
use crate::error::{NgError, Result};
use crate::graph::GraphCore;
use crate::hook::Hook;
use crate::item::{Item, ItemFn, Payload};
use crate::message::{Message, NodeInfo};
use crate::path::{self, Resolved};
use crate::types::{Capabilities, NodeType, TypeEntry};
use bitflags::bitflags;
use core::fmt;
use core::num::NonZeroU32;
use core::time::Duration;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// Node names must be strictly shorter than this.
pub const NODE_NAME_MAX: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// NodeId
// ─────────────────────────────────────────────────────────────────────────────

/// Nonzero numeric node identifier, unique among registered nodes.
///
/// Displays as `[hex]`, the form accepted as a path node spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(NonZeroU32);

impl NodeId {
    /// Wraps a raw ID. Returns `None` for zero.
    #[must_use]
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// The raw value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Decodes the reserved `[hexid]` form.
    ///
    /// Requires brackets, at least one hex digit, nothing else, and a
    /// nonzero value that fits in 32 bits.
    #[must_use]
    pub fn decode(s: &str) -> Option<Self> {
        let digits = s.strip_prefix('[')?.strip_suffix(']')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(digits, 16).ok().and_then(Self::new)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:x}]", self.0)
    }
}

bitflags! {
    /// Node state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u32 {
        /// Not accepting new hooks or messages.
        const INVALID = 1 << 0;
        /// Shutdown in progress.
        const CLOSING = 1 << 1;
        /// Every item is applied with the writer lock.
        const FORCE_WRITER = 1 << 2;
        /// Shutdown ignores persistence requests.
        const REALLY_DIE = 1 << 3;
    }
}

/// Checks a node name: non-empty, short enough, no `.` or `:`, and not
/// decodable as `[hexid]`.
pub fn validate_node_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.len() >= NODE_NAME_MAX
        || name.contains(['.', ':'])
        || NodeId::decode(name).is_some()
    {
        return Err(NgError::InvalidArgument);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Node
// ─────────────────────────────────────────────────────────────────────────────

type Private = Arc<dyn Any + Send + Sync>;

pub(crate) struct NodeInner {
    id: NodeId,
    core: Option<Arc<GraphCore>>,
    ty: Arc<TypeEntry>,
    flags: AtomicU32,
    name: RwLock<Option<Arc<str>>>,
    hooks: Mutex<Vec<Hook>>,
    token: RwLock<()>,
    private: RwLock<Option<Private>>,
    keepalive: Mutex<Option<Node>>,
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        let Some(core) = &self.core else {
            return;
        };
        let name = self.name.get_mut().take();
        core.registries().unregister(self.id, name.as_deref());
        self.ty.node_released();
        debug!(node = %self.id, type_name = %self.ty.name(), "node freed");
    }
}

/// Strong handle to a graph vertex.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("type", &self.type_name())
            .field("name", &self.name())
            .field("flags", &self.flags())
            .finish()
    }
}

struct DeadType;

impl NodeType for DeadType {
    fn name(&self) -> &str {
        "dead"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }
}

static DEAD_NODE: LazyLock<Node> = LazyLock::new(|| Node {
    inner: Arc::new(NodeInner {
        id: NodeId(NonZeroU32::MAX),
        core: None,
        ty: Arc::new(TypeEntry::new(Arc::new(DeadType))),
        flags: AtomicU32::new((NodeFlags::INVALID | NodeFlags::CLOSING).bits()),
        name: RwLock::new(None),
        hooks: Mutex::new(Vec::new()),
        token: RwLock::new(()),
        private: RwLock::new(None),
        keepalive: Mutex::new(None),
    }),
});

impl Node {
    /// Builds a registered node holding its own keep-alive reference.
    pub(crate) fn create(core: Arc<GraphCore>, id: NodeId, ty: Arc<TypeEntry>) -> Self {
        let node = Self {
            inner: Arc::new(NodeInner {
                id,
                core: Some(core),
                ty,
                flags: AtomicU32::new(0),
                name: RwLock::new(None),
                hooks: Mutex::new(Vec::new()),
                token: RwLock::new(()),
                private: RwLock::new(None),
                keepalive: Mutex::new(None),
            }),
        };
        *node.inner.keepalive.lock() = Some(node.clone());
        node
    }

    pub(crate) fn from_inner(inner: Arc<NodeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<NodeInner> {
        &self.inner
    }

    /// The always-invalid sentinel that detached hooks point at.
    #[must_use]
    pub fn dead() -> Node {
        DEAD_NODE.clone()
    }

    /// Returns `true` for the dead sentinel.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        Arc::ptr_eq(&self.inner, &DEAD_NODE.inner)
    }

    pub(crate) fn core(&self) -> Result<&Arc<GraphCore>> {
        self.inner.core.as_ref().ok_or(NgError::Unreachable)
    }

    pub(crate) fn type_entry(&self) -> &Arc<TypeEntry> {
        &self.inner.ty
    }

    pub(crate) fn token(&self) -> &RwLock<()> {
        &self.inner.token
    }

    /// Node ID.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Current name, if any.
    #[must_use]
    pub fn name(&self) -> Option<Arc<str>> {
        self.inner.name.read().clone()
    }

    /// Type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.inner.ty.name()
    }

    /// The node type.
    #[must_use]
    pub fn node_type(&self) -> &dyn NodeType {
        self.inner.ty.ops()
    }

    /// Current flags.
    #[must_use]
    pub fn flags(&self) -> NodeFlags {
        NodeFlags::from_bits_retain(self.inner.flags.load(Ordering::Acquire))
    }

    fn set_flags(&self, flags: NodeFlags) -> NodeFlags {
        NodeFlags::from_bits_retain(self.inner.flags.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    fn clear_flags(&self, flags: NodeFlags) {
        self.inner.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Returns `true` unless the node is invalid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.flags().contains(NodeFlags::INVALID)
    }

    /// Returns `true` while shutdown is in progress or after it finished.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.flags().contains(NodeFlags::CLOSING)
    }

    /// Requests the writer lock for every item applied to this node.
    pub fn set_force_writer(&self, on: bool) {
        if on {
            self.set_flags(NodeFlags::FORCE_WRITER);
        } else {
            self.clear_flags(NodeFlags::FORCE_WRITER);
        }
    }

    pub(crate) fn forces_writer(&self) -> bool {
        self.flags().contains(NodeFlags::FORCE_WRITER)
    }

    /// Clears `INVALID`. Called from a shutdown callback, this makes the
    /// node persistent unless the shutdown was forced.
    pub fn revive(&self) {
        self.clear_flags(NodeFlags::INVALID);
    }

    /// Marks the node so that the next shutdown cannot be vetoed.
    pub fn set_really_die(&self) {
        self.set_flags(NodeFlags::REALLY_DIE);
    }

    /// Stores type-private state.
    pub fn set_private<T: Any + Send + Sync>(&self, value: T) {
        *self.inner.private.write() = Some(Arc::new(value));
    }

    /// Returns the private state if it has type `T`.
    #[must_use]
    pub fn private<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let private = self.inner.private.read().clone()?;
        private.downcast::<T>().ok()
    }

    /// Removes the private state.
    pub fn clear_private(&self) {
        self.inner.private.write().take();
    }

    /// Snapshot for `NodeInfo` responses.
    #[must_use]
    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            name: self.name().map(|n| n.to_string()),
            type_name: self.type_name().to_string(),
            id: self.id(),
            hooks: self.num_hooks() as u32,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Naming
    // ─────────────────────────────────────────────────────────────────────

    /// Names the node, replacing any previous name.
    ///
    /// Fails with `InvalidArgument` for a malformed name and with
    /// `AlreadyExists` if another live node holds it.
    pub fn set_name(&self, name: &str) -> Result<()> {
        validate_node_name(name)?;
        let core = self.core()?;
        if !self.is_valid() {
            return Err(NgError::Invalid);
        }
        core.registries().set_name(self, name)?;
        debug!(node = %self.id(), name, "node named");
        Ok(())
    }

    pub(crate) fn replace_name(&self, name: Option<Arc<str>>) -> Option<Arc<str>> {
        core::mem::replace(&mut *self.inner.name.write(), name)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Hooks
    // ─────────────────────────────────────────────────────────────────────

    /// Number of hooks attached.
    #[must_use]
    pub fn num_hooks(&self) -> usize {
        self.inner.hooks.lock().len()
    }

    /// Snapshot of the attached hooks.
    #[must_use]
    pub fn hooks(&self) -> Vec<Hook> {
        self.inner.hooks.lock().clone()
    }

    /// Finds a valid hook by name, through the type's `find_hook` if it
    /// has one.
    #[must_use]
    pub fn find_hook(&self, name: &str) -> Option<Hook> {
        let ty = self.type_entry();
        if ty.has(Capabilities::FINDHOOK) {
            return ty.ops().find_hook(self, name);
        }
        self.inner
            .hooks
            .lock()
            .iter()
            .find(|hook| hook.is_valid() && hook.name() == name)
            .cloned()
    }

    /// Any attached hook with this name, connected or not.
    pub(crate) fn hook_named(&self, name: &str) -> Option<Hook> {
        self.inner
            .hooks
            .lock()
            .iter()
            .find(|hook| hook.name() == name)
            .cloned()
    }

    /// Adds an unconnected hook.
    ///
    /// The type's `new_hook` callback may veto. The returned hook stays
    /// invalid until it is connected.
    pub fn add_hook(&self, name: &str) -> Result<Hook> {
        let core = self.core()?;
        crate::hook::validate_hook_name(name)?;
        if !self.is_valid() {
            return Err(NgError::Invalid);
        }
        if self.hook_named(name).is_some() {
            return Err(NgError::AlreadyExists);
        }
        let hook = Hook::new(core, name, self.clone());
        if let Err(err) = self.accept_hook(&hook) {
            hook.detach_node();
            return Err(err);
        }
        debug!(node = %self.id(), hook = name, "hook added");
        Ok(hook)
    }

    /// Runs the `new_hook` veto, then links `hook` into the hook set.
    pub(crate) fn accept_hook(&self, hook: &Hook) -> Result<()> {
        let ty = self.type_entry();
        if ty.has(Capabilities::NEWHOOK) {
            ty.ops().new_hook(self, hook, hook.name())?;
        }
        let mut hooks = self.inner.hooks.lock();
        if hooks.iter().any(|h| h.name() == hook.name()) {
            return Err(NgError::AlreadyExists);
        }
        hooks.push(hook.clone());
        Ok(())
    }

    /// Unlinks `hook`; the removed handle is returned so the caller drops
    /// it outside the lock.
    pub(crate) fn unlink_hook(&self, hook: &Hook) -> Option<Hook> {
        let mut hooks = self.inner.hooks.lock();
        let pos = hooks.iter().position(|h| h == hook)?;
        Some(hooks.remove(pos))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Shutdown
    // ─────────────────────────────────────────────────────────────────────

    /// Runs the shutdown state machine directly.
    ///
    /// Marks the node invalid and closing, calls the type's `close`,
    /// destroys every hook and calls the type's `shutdown`. If that
    /// callback revived the node (and the shutdown was not forced) the
    /// node stays active; otherwise its self-reference is released.
    /// Repeated calls on a closing node do nothing.
    ///
    /// The caller must have exclusive access to the node, as a writer
    /// item does. Use [`remove_self`](Self::remove_self) otherwise.
    pub fn shutdown(&self) {
        if self.is_dead() {
            warn!("shutdown requested on the dead node");
            return;
        }
        let prev = self.set_flags(NodeFlags::INVALID | NodeFlags::CLOSING);
        if prev.contains(NodeFlags::CLOSING) {
            return;
        }
        let _hold = self.clone();
        debug!(node = %self.id(), type_name = %self.type_name(), "node shutting down");

        let ty = Arc::clone(self.type_entry());
        if ty.has(Capabilities::CLOSE) {
            ty.ops().close(self);
        }
        self.destroy_all_hooks();

        if ty.has(Capabilities::SHUTDOWN) {
            ty.ops().shutdown(self);
            if self.is_valid() {
                if self.flags().contains(NodeFlags::REALLY_DIE) {
                    warn!(node = %self.id(), "forced shutdown ignores revive");
                    self.set_flags(NodeFlags::INVALID);
                } else {
                    self.clear_flags(NodeFlags::CLOSING);
                    debug!(node = %self.id(), "persistent node survived shutdown");
                    return;
                }
            }
        }
        let keepalive = self.inner.keepalive.lock().take();
        drop(keepalive);
    }

    /// Discards a node whose constructor failed: no callbacks run, the
    /// self-reference is released.
    pub(crate) fn abandon(&self) {
        self.set_flags(NodeFlags::INVALID | NodeFlags::CLOSING);
        let keepalive = self.inner.keepalive.lock().take();
        drop(keepalive);
    }

    fn destroy_all_hooks(&self) {
        loop {
            let hooks = self.hooks();
            if hooks.is_empty() {
                return;
            }
            let before = hooks.len();
            for hook in hooks {
                hook.destroy();
            }
            if self.num_hooks() >= before {
                // Another thread is mid-way through tearing one down.
                std::thread::yield_now();
            }
        }
    }

    /// Queues a shutdown to run under this node's writer lock.
    pub fn remove_self(&self) -> Result<()> {
        self.set_flags(NodeFlags::INVALID);
        let f: ItemFn = Box::new(|node, _| node.shutdown());
        let item = Item::new(self.core()?, Payload::Function(f))?
            .allow_invalid()
            .addressed(self.clone(), None);
        dispatch::submit(item)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────────────

    /// Resolves a path relative to this node.
    pub fn resolve(&self, path: &str) -> Result<Resolved> {
        path::resolve(self.core()?, Some(self), path)
    }

    /// Sends a control message. Responses come back to this node.
    pub fn send_msg(&self, to: impl Into<Address>, msg: Message) -> Result<()> {
        let core = self.core()?;
        dispatch::send_msg(core, Some(self), &to.into(), msg, None)
    }

    /// Queues `f` to run on this node under its writer lock.
    pub fn send_fn<F>(&self, hook: Option<&Hook>, f: F) -> Result<()>
    where
        F: FnOnce(&Node, Option<&Hook>) + Send + 'static,
    {
        let item = Item::new(self.core()?, Payload::Function(Box::new(f)))?
            .addressed(self.clone(), hook.cloned());
        dispatch::submit(item)
    }

    /// Schedules `f` to run on this node after `delay`.
    pub fn schedule<F>(&self, delay: Duration, hook: Option<&Hook>, f: F) -> Result<Callout>
    where
        F: FnOnce(&Node, Option<&Hook>) + Send + 'static,
    {
        let core = self.core()?;
        let item = Item::new(core, Payload::Function(Box::new(f)))?
            .addressed(self.clone(), hook.cloned());
        Callout::arm(core, delay, item)
    }
}
