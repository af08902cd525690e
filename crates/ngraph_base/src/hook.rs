//! Graph edge endpoints.
//!
//! A [`Hook`] belongs to exactly one node and, once connected, points at
//! a peer hook on another (or the same) node. A hook keeps its node alive
//! and a connected hook keeps its peer alive. Tearing a hook down
//! "divorces" it: both ends are repointed at the dead sentinel and the
//! former peer is queued for its own teardown on its own node.

use crate::dispatch::{self, Address};
use crate::error::{NgError, Result};
use crate::graph::GraphCore;
use crate::item::{Item, ItemFn, ItemType, Payload};
use crate::message::Message;
use crate::node::Node;
use crate::reply::Responder;
use crate::types::Capabilities;
use bitflags::bitflags;
use core::fmt;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// Hook names must be strictly shorter than this.
pub const HOOK_NAME_MAX: usize = 32;

bitflags! {
    /// Hook state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HookFlags: u32 {
        /// Not connected, or being torn down.
        const INVALID = 1 << 0;
        /// The dead sentinel.
        const DEAD = 1 << 1;
        /// Items arriving on this hook take the writer lock.
        const FORCE_WRITER = 1 << 2;
        /// Teardown has started.
        const DESTROYED = 1 << 3;
    }
}

/// Per-hook override of the type's data receiver.
pub type DataHandler = Arc<dyn Fn(&Hook, Item) -> Result<()> + Send + Sync>;

/// Per-hook override of the type's message receiver.
pub type MsgHandler =
    Arc<dyn Fn(&Node, Message, &mut Responder, Option<&Hook>) -> Result<()> + Send + Sync>;

/// Checks a hook name: non-empty, short enough, no `.` or `:`.
pub fn validate_hook_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() >= HOOK_NAME_MAX || name.contains(['.', ':']) {
        return Err(NgError::InvalidArgument);
    }
    Ok(())
}

pub(crate) struct HookInner {
    name: Arc<str>,
    core: Option<Arc<GraphCore>>,
    flags: AtomicU32,
    node: Mutex<Node>,
    /// `None` means the dead sentinel.
    peer: Mutex<Option<Hook>>,
    rcvdata: RwLock<Option<DataHandler>>,
    rcvmsg: RwLock<Option<MsgHandler>>,
    private: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
}

/// Strong handle to a hook.
#[derive(Clone)]
pub struct Hook {
    inner: Arc<HookInner>,
}

impl PartialEq for Hook {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Hook {}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name())
            .field("node", &self.node().id())
            .field("flags", &self.flags())
            .finish()
    }
}

static DEAD_HOOK: LazyLock<Hook> = LazyLock::new(|| Hook {
    inner: Arc::new(HookInner {
        name: Arc::from("dead"),
        core: None,
        flags: AtomicU32::new((HookFlags::INVALID | HookFlags::DEAD | HookFlags::DESTROYED).bits()),
        node: Mutex::new(Node::dead()),
        peer: Mutex::new(None),
        rcvdata: RwLock::new(None),
        rcvmsg: RwLock::new(None),
        private: RwLock::new(None),
    }),
});

impl Hook {
    fn build(core: &Arc<GraphCore>, name: &str, node: Node) -> Self {
        Self {
            inner: Arc::new(HookInner {
                name: Arc::from(name),
                core: Some(Arc::clone(core)),
                flags: AtomicU32::new(HookFlags::INVALID.bits()),
                node: Mutex::new(node),
                peer: Mutex::new(None),
                rcvdata: RwLock::new(None),
                rcvmsg: RwLock::new(None),
                private: RwLock::new(None),
            }),
        }
    }

    /// An unconnected hook owned by `node`, not yet in its hook set.
    pub(crate) fn new(core: &Arc<GraphCore>, name: &str, node: Node) -> Self {
        Self::build(core, name, node)
    }

    /// An unconnected hook with no owner yet.
    pub(crate) fn new_detached(core: &Arc<GraphCore>, name: &str) -> Self {
        Self::build(core, name, Node::dead())
    }

    /// The always-invalid sentinel that divorced hooks point at.
    #[must_use]
    pub fn dead() -> Hook {
        DEAD_HOOK.clone()
    }

    /// Returns `true` for the dead sentinel.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.flags().contains(HookFlags::DEAD)
    }

    pub(crate) fn core(&self) -> Result<&Arc<GraphCore>> {
        self.inner.core.as_ref().ok_or(NgError::Unreachable)
    }

    /// Hook name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Owning node, or the dead node once the hook is torn down.
    #[must_use]
    pub fn node(&self) -> Node {
        self.inner.node.lock().clone()
    }

    /// Peer hook, or the dead hook when unconnected.
    #[must_use]
    pub fn peer(&self) -> Hook {
        self.peer_opt().unwrap_or_else(Hook::dead)
    }

    pub(crate) fn peer_opt(&self) -> Option<Hook> {
        self.inner.peer.lock().clone()
    }

    /// Node on the other end, or the dead node.
    #[must_use]
    pub fn peer_node(&self) -> Node {
        self.peer().node()
    }

    /// Current flags.
    #[must_use]
    pub fn flags(&self) -> HookFlags {
        HookFlags::from_bits_retain(self.inner.flags.load(Ordering::Acquire))
    }

    fn set_flags(&self, flags: HookFlags) -> HookFlags {
        HookFlags::from_bits_retain(self.inner.flags.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    fn clear_flags(&self, flags: HookFlags) {
        self.inner.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Returns `true` once connected and until teardown starts.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.flags().contains(HookFlags::INVALID)
    }

    /// Requests the writer lock for items arriving on this hook.
    pub fn set_force_writer(&self, on: bool) {
        if on {
            self.set_flags(HookFlags::FORCE_WRITER);
        } else {
            self.clear_flags(HookFlags::FORCE_WRITER);
        }
    }

    pub(crate) fn forces_writer(&self) -> bool {
        self.flags().contains(HookFlags::FORCE_WRITER)
    }

    /// Stores hook-private state.
    pub fn set_private<T: Any + Send + Sync>(&self, value: T) {
        *self.inner.private.write() = Some(Arc::new(value));
    }

    /// Returns the private state if it has type `T`.
    #[must_use]
    pub fn private<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let private = self.inner.private.read().clone()?;
        private.downcast::<T>().ok()
    }

    /// Installs (or with `None` removes) a data receiver for this hook.
    pub fn set_rcvdata(&self, handler: Option<DataHandler>) {
        *self.inner.rcvdata.write() = handler;
    }

    /// Installs (or with `None` removes) a message receiver for this hook.
    pub fn set_rcvmsg(&self, handler: Option<MsgHandler>) {
        *self.inner.rcvmsg.write() = handler;
    }

    pub(crate) fn data_handler(&self) -> Option<DataHandler> {
        self.inner.rcvdata.read().clone()
    }

    pub(crate) fn msg_handler(&self) -> Option<MsgHandler> {
        self.inner.rcvmsg.read().clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Ownership
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn attach_node(&self, node: Node) {
        let old = core::mem::replace(&mut *self.inner.node.lock(), node);
        drop(old);
    }

    /// Points the hook at the dead node, releasing the reference it held.
    pub(crate) fn detach_node(&self) {
        self.attach_node(Node::dead());
    }

    /// Pairs two unconnected hooks. Caller holds the topology lock.
    fn link_locked(&self, other: &Hook) -> Result<()> {
        let destroyed = |h: &Hook| h.flags().contains(HookFlags::DESTROYED);
        if destroyed(self) || destroyed(other) {
            return Err(NgError::Unreachable);
        }
        let mut ours = self.inner.peer.lock();
        if ours.is_some() {
            return Err(NgError::InvalidArgument);
        }
        let mut theirs = other.inner.peer.lock();
        if theirs.is_some() {
            return Err(NgError::InvalidArgument);
        }
        *ours = Some(other.clone());
        *theirs = Some(self.clone());
        Ok(())
    }

    pub(crate) fn link(&self, other: &Hook) -> Result<()> {
        let core = self.core()?;
        let _topology = core.topology().write();
        self.link_locked(other)
    }

    /// Clears `INVALID` on both ends if they are still peered with each
    /// other and neither has started teardown.
    pub(crate) fn validate_pair(&self, other: &Hook) -> Result<()> {
        let core = self.core()?;
        let _topology = core.topology().write();
        let paired = self.peer_opt().is_some_and(|p| p == *other)
            && other.peer_opt().is_some_and(|p| p == *self);
        let alive = !self.flags().contains(HookFlags::DESTROYED)
            && !other.flags().contains(HookFlags::DESTROYED);
        if !paired || !alive {
            return Err(NgError::NotFound);
        }
        self.clear_flags(HookFlags::INVALID);
        other.clear_flags(HookFlags::INVALID);
        Ok(())
    }

    /// Returns `true` while both ends still point at each other and
    /// neither has started teardown.
    pub(crate) fn is_paired_with(&self, other: &Hook) -> bool {
        let Ok(core) = self.core() else {
            return false;
        };
        let _topology = core.topology().read();
        self.peer_opt().is_some_and(|p| p == *other)
            && other.peer_opt().is_some_and(|p| p == *self)
            && !self.flags().contains(HookFlags::DESTROYED)
            && !other.flags().contains(HookFlags::DESTROYED)
    }

    /// Runs the owning node's `connect` veto for this hook.
    pub(crate) fn run_connect(&self) -> Result<()> {
        let node = self.node();
        if node.is_dead() {
            return Err(NgError::NotFound);
        }
        let ty = Arc::clone(node.type_entry());
        if ty.has(Capabilities::CONNECT) {
            ty.ops().connect(self)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Edges
    // ─────────────────────────────────────────────────────────────────────

    /// Connects two unconnected hooks.
    ///
    /// Both owning nodes get a `connect` veto. On any failure both hooks
    /// are torn down. On success both become valid together.
    pub fn connect(&self, other: &Hook) -> Result<()> {
        if self == other || self.is_dead() || other.is_dead() {
            return Err(NgError::InvalidArgument);
        }
        let (ours, theirs) = (self.node(), other.node());
        if ours.is_dead() || theirs.is_dead() {
            return Err(NgError::Unreachable);
        }
        if !ours.is_valid() || !theirs.is_valid() {
            return Err(NgError::Invalid);
        }
        self.link(other)?;
        let result = self
            .run_connect()
            .and_then(|()| other.run_connect())
            .and_then(|()| self.validate_pair(other));
        if let Err(err) = result {
            debug!(hook = self.name(), peer = other.name(), %err, "connect vetoed");
            self.destroy();
            other.destroy();
            return Err(err);
        }
        debug!(
            node = %ours.id(), hook = self.name(),
            peer_node = %theirs.id(), peer = other.name(),
            "hooks connected"
        );
        Ok(())
    }

    /// Tears the hook down. Idempotent.
    ///
    /// A connected peer is divorced and queued for its own teardown. The
    /// hook then leaves its node's hook set, the type's `disconnect` runs
    /// and the reference on the node is released.
    pub fn destroy(&self) {
        if self.is_dead() {
            warn!("destroy requested on the dead hook");
            return;
        }
        let Ok(core) = self.core() else {
            return;
        };
        let (peer, back) = {
            let _topology = core.topology().write();
            let prev = self.set_flags(HookFlags::INVALID | HookFlags::DESTROYED);
            if prev.contains(HookFlags::DESTROYED) {
                return;
            }
            let peer = self.inner.peer.lock().take();
            let back = peer.as_ref().and_then(|p| p.inner.peer.lock().take());
            (peer, back)
        };
        drop(back);
        if let Some(peer) = peer
            && !peer.node().is_dead()
            && let Err(err) = peer.remove_self()
        {
            warn!(hook = peer.name(), %err, "could not queue peer teardown");
        }

        let node = self.node();
        if node.is_dead() {
            return;
        }
        let removed = node.unlink_hook(self);
        let ty = Arc::clone(node.type_entry());
        if removed.is_some() && ty.has(Capabilities::DISCONNECT) {
            ty.ops().disconnect(self);
        }
        drop(removed);
        debug!(node = %node.id(), hook = self.name(), "hook destroyed");
        self.detach_node();
    }

    /// Queues [`destroy`](Self::destroy) to run under the owning node's
    /// writer lock.
    pub fn remove_self(&self) -> Result<()> {
        let node = self.node();
        if node.is_dead() {
            return Ok(());
        }
        let f: ItemFn = Box::new(|_, hook| {
            if let Some(hook) = hook {
                hook.destroy();
            }
        });
        let item = Item::new(node.core()?, Payload::Function(f))?
            .allow_invalid()
            .addressed(node, Some(self.clone()));
        dispatch::submit(item)
    }

    /// Splices the owning node out of a chain.
    ///
    /// Both hooks must belong to the same node and be connected. Their
    /// former peers end up connected to each other and both hooks are
    /// destroyed.
    pub fn bypass(&self, other: &Hook) -> Result<()> {
        let node = self.node();
        if self == other || node.is_dead() || node != other.node() {
            return Err(NgError::InvalidArgument);
        }
        let core = self.core()?;
        let released = {
            let _topology = core.topology().write();
            let (Some(p1), Some(p2)) = (self.peer_opt(), other.peer_opt()) else {
                return Err(NgError::InvalidArgument);
            };
            if p1 == *other {
                return Err(NgError::InvalidArgument);
            }
            let r1 = p1.inner.peer.lock().replace(p2.clone());
            let r2 = p2.inner.peer.lock().replace(p1.clone());
            let r3 = self.inner.peer.lock().take();
            let r4 = other.inner.peer.lock().take();
            [r1, r2, r3, r4]
        };
        drop(released);
        debug!(node = %node.id(), a = self.name(), b = other.name(), "node bypassed");
        self.destroy();
        other.destroy();
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────────────

    /// Destination of an item sent out through this hook: the peer's
    /// node and the peer. Fails with `Unreachable` if this hook, the peer
    /// or the peer's node is invalid.
    pub(crate) fn address(&self) -> Result<(Node, Hook)> {
        if !self.is_valid() {
            return Err(NgError::Unreachable);
        }
        let peer = self.peer();
        if !peer.is_valid() {
            return Err(NgError::Unreachable);
        }
        let node = peer.node();
        if !node.is_valid() {
            return Err(NgError::Unreachable);
        }
        Ok((node, peer))
    }

    /// Sends data to the peer.
    pub fn send_data(&self, data: Vec<u8>) -> Result<()> {
        let item = Item::new(self.core()?, Payload::Data(data))?;
        self.forward(item)
    }

    /// Re-addresses a received data item to the peer and submits it.
    pub fn forward(&self, item: Item) -> Result<()> {
        if item.kind() != ItemType::Data {
            return Err(NgError::InvalidArgument);
        }
        let (node, peer) = self.address()?;
        dispatch::submit(item.addressed(node, Some(peer)))
    }

    /// Sends a control message to the peer's node. Responses come back to
    /// this hook's node.
    pub fn send_msg(&self, msg: Message) -> Result<()> {
        let core = self.core()?;
        let here = self.node();
        dispatch::send_msg(core, Some(&here), &Address::Hook(self.clone()), msg, None)
    }
}
