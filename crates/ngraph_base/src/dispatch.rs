//! Item dispatch.
//!
//! Each graph runs a fixed set of worker threads, one run queue each. A
//! freshly built item is always queued, never run inline; the worker takes
//! it, locks the destination node (shared for readers, exclusive for
//! writers), calls the node type or the generic handler, and releases the
//! lock. Only then does the next item start.
//!
//! An item submitted a second time (forwarded data, the next step of a
//! continuation chain) is a continuation. On a worker it is applied right
//! after the current item releases its lock, before the worker picks up
//! anything else; elsewhere it is applied on the spot. A continuation
//! therefore never waits for one node's lock while holding another's.
//!
//! Queue selection hashes the originating node (the node whose item is
//! being applied when the new item is submitted, else the destination),
//! so items from one node keep their order.

use crate::error::{NgError, Result};
use crate::generic;
use crate::graph::GraphCore;
use crate::hook::Hook;
use crate::item::{Item, ItemType, Payload};
use crate::message::Message;
use crate::node::{Node, NodeId};
use crate::path;
use crate::reply::{Responder, ReturnAddr};
use crate::types::Capabilities;
use parking_lot::{Condvar, Mutex};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, trace, warn};

thread_local! {
    /// Continuations deferred until the current item finishes. `Some` only
    /// on worker threads.
    static DEFERRED: RefCell<Option<VecDeque<Item>>> = const { RefCell::new(None) };
    /// Node whose item is being applied on this thread.
    static CURRENT: Cell<Option<NodeId>> = const { Cell::new(None) };
}

fn on_worker() -> bool {
    DEFERRED.with(|d| d.borrow().is_some())
}

// ─────────────────────────────────────────────────────────────────────────────
// Address
// ─────────────────────────────────────────────────────────────────────────────

/// Destination of a message.
#[derive(Debug, Clone)]
pub enum Address {
    /// A node handle.
    Node(Node),
    /// A node ID.
    Id(NodeId),
    /// A path, resolved relative to the sender.
    Path(String),
    /// The peer of a hook.
    Hook(Hook),
}

impl From<&Node> for Address {
    fn from(node: &Node) -> Self {
        Self::Node(node.clone())
    }
}

impl From<NodeId> for Address {
    fn from(id: NodeId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for Address {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<&Hook> for Address {
    fn from(hook: &Hook) -> Self {
        Self::Hook(hook.clone())
    }
}

/// Resolves an address to a destination node and optional hook.
pub(crate) fn locate(
    core: &Arc<GraphCore>,
    here: Option<&Node>,
    addr: &Address,
) -> Result<(Node, Option<Hook>)> {
    match addr {
        Address::Node(node) => Ok((node.clone(), None)),
        Address::Id(id) => core
            .registries()
            .find_id(*id)
            .map(|node| (node, None))
            .ok_or(NgError::NotFound),
        Address::Path(p) => {
            let resolved = path::resolve(core, here, p)?;
            Ok((resolved.node, resolved.last_hook))
        }
        Address::Hook(hook) => {
            let (node, peer) = hook.address()?;
            Ok((node, Some(peer)))
        }
    }
}

/// Packages and submits a message. Without an explicit return address,
/// responses go to `here`.
pub(crate) fn send_msg(
    core: &Arc<GraphCore>,
    here: Option<&Node>,
    to: &Address,
    mut msg: Message,
    ret: Option<ReturnAddr>,
) -> Result<()> {
    let (node, hook) = locate(core, here, to)?;
    if msg.header.token == 0 {
        msg.header.token = core.next_token();
    }
    // Responses carry no return address of their own.
    let ret = if msg.is_response() {
        ret
    } else {
        ret.or_else(|| here.map(|n| ReturnAddr::Node(n.id())))
    };
    let item = Item::new(core, Payload::Message(msg, ret))?.addressed(node, hook);
    submit(item)
}

// ─────────────────────────────────────────────────────────────────────────────
// Submission and apply
// ─────────────────────────────────────────────────────────────────────────────

/// Submits an addressed item.
pub(crate) fn submit(mut item: Item) -> Result<()> {
    let target = match item.node() {
        Some(node) => node.core().map(|core| (Arc::clone(core), node.id())),
        None => Err(NgError::InvalidArgument),
    };
    let (core, target) = match target {
        Ok(found) => found,
        Err(err) => return Err(item.fail(err)),
    };
    if item.kind() == ItemType::Data && item.hook().is_none() {
        return Err(item.fail(NgError::InvalidArgument));
    }
    core.stats().submitted.fetch_add(1, Ordering::Relaxed);

    if item.bump_hops() == 1 {
        let affinity = CURRENT.with(Cell::get).unwrap_or(target);
        return core.dispatcher().enqueue(affinity, item);
    }

    let item = DEFERRED.with(|d| match d.borrow_mut().as_mut() {
        Some(queue) => {
            queue.push_back(item);
            None
        }
        None => Some(item),
    });
    match item {
        Some(item) => apply(item),
        None => Ok(()),
    }
}

/// Applies one item under the destination node's lock.
pub(crate) fn apply(mut item: Item) -> Result<()> {
    let node = item
        .take_node()
        .unwrap_or_else(|| panic!("item applied without a destination: {item:?}"));
    let hook = item.take_hook();
    let writer =
        item.is_writer() || node.forces_writer() || hook.as_ref().is_some_and(Hook::forces_writer);
    let completion = item.completion();
    if let Ok(core) = node.core() {
        core.stats().applied.fetch_add(1, Ordering::Relaxed);
    }
    trace!(node = %node.id(), kind = ?item.kind(), writer, "applying item");

    let prev = CURRENT.with(|c| c.replace(Some(node.id())));
    let result = if writer {
        let _token = node.token().write();
        dispatch(&node, hook, item)
    } else {
        let _token = node.token().read();
        dispatch(&node, hook, item)
    };
    CURRENT.with(|c| c.set(prev));

    if let Err(err) = result {
        trace!(node = %node.id(), %err, "item failed");
        if let Some(completion) = &completion {
            completion.record(err);
        }
    }
    drop(completion);
    result
}

fn dispatch(node: &Node, hook: Option<Hook>, mut item: Item) -> Result<()> {
    let ty = Arc::clone(node.type_entry());
    if item.kind() == ItemType::Data {
        let Some(hook) = hook else {
            return Err(NgError::InvalidArgument);
        };
        if !hook.is_valid() || !node.is_valid() {
            debug!(node = %node.id(), hook = hook.name(), "data dropped on invalid target");
            return Err(NgError::Io);
        }
        return if let Some(handler) = hook.data_handler() {
            handler(&hook, item)
        } else if ty.has(Capabilities::RCVDATA) {
            ty.ops().rcvdata(&hook, item)
        } else {
            Ok(())
        };
    }
    match item.take_payload() {
        Payload::Message(msg, ret) => {
            drop(item);
            let hook = hook.filter(Hook::is_valid);
            // Responses are never answered back to a node.
            let ret = ret.filter(|ret| !msg.is_response() || matches!(ret, ReturnAddr::Reply(_)));
            let mut reply = Responder::new(node.clone(), msg.header.clone(), ret);
            let result = if !node.is_valid() {
                Err(NgError::Invalid)
            } else if msg.is_generic() && !msg.is_response() {
                generic::handle(node, msg, &mut reply, hook.as_ref())
            } else if let Some(handler) = hook.as_ref().and_then(Hook::msg_handler) {
                handler(node, msg, &mut reply, hook.as_ref())
            } else if ty.has(Capabilities::RCVMSG) {
                ty.ops().rcvmsg(node, msg, &mut reply, hook.as_ref())
            } else {
                Ok(())
            };
            reply.finish(&result);
            result
        }
        Payload::Function(f) => {
            if !node.is_valid() && !item.allows_invalid() {
                return Err(NgError::Invalid);
            }
            drop(item);
            f(node, hook.as_ref());
            Ok(())
        }
        Payload::Reuse(f) => {
            if !node.is_valid() && !item.allows_invalid() {
                return Err(NgError::Invalid);
            }
            f(node, item, hook)
        }
        Payload::Data(_) | Payload::Spent => {
            panic!("spent item submitted to node {}", node.id())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Lifetime counters.
#[derive(Default)]
pub(crate) struct DispatchStats {
    pub(crate) submitted: AtomicU64,
    pub(crate) applied: AtomicU64,
}

struct QueueState {
    items: VecDeque<Item>,
    closed: bool,
}

struct RunQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl RunQueue {
    fn pop(&self) -> Option<Item> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }
}

/// Items queued or running, with a condition to wait for zero.
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn begin(&self) {
        *self.count.lock() += 1;
    }

    fn end(&self) {
        let mut count = self.count.lock();
        assert!(*count > 0, "in-flight item count underflow");
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Run queues and in-flight accounting of one graph.
pub(crate) struct Dispatcher {
    queues: Vec<Arc<RunQueue>>,
    in_flight: Arc<InFlight>,
}

impl Dispatcher {
    pub(crate) fn new(workers: usize) -> Self {
        let queues = (0..workers.max(1))
            .map(|_| {
                Arc::new(RunQueue {
                    state: Mutex::new(QueueState {
                        items: VecDeque::new(),
                        closed: false,
                    }),
                    ready: Condvar::new(),
                })
            })
            .collect();
        Self {
            queues,
            in_flight: Arc::new(InFlight {
                count: Mutex::new(0),
                idle: Condvar::new(),
            }),
        }
    }

    /// Starts one thread per run queue.
    pub(crate) fn spawn_workers(&self, prefix: &str) -> Result<Vec<JoinHandle<()>>> {
        self.queues
            .iter()
            .enumerate()
            .map(|(index, queue)| {
                let queue = Arc::clone(queue);
                let in_flight = Arc::clone(&self.in_flight);
                std::thread::Builder::new()
                    .name(format!("{prefix}-{index}"))
                    .spawn(move || worker_loop(&queue, &in_flight))
                    .map_err(|err| {
                        warn!(%err, "could not spawn dispatcher worker");
                        NgError::OutOfMemory
                    })
            })
            .collect()
    }

    fn enqueue(&self, affinity: NodeId, item: Item) -> Result<()> {
        let index = affinity.get() as usize % self.queues.len();
        let queue = &self.queues[index];
        let mut state = queue.state.lock();
        if state.closed {
            drop(state);
            return Err(item.fail(NgError::Unreachable));
        }
        self.in_flight.begin();
        state.items.push_back(item);
        drop(state);
        queue.ready.notify_one();
        Ok(())
    }

    /// Blocks until no item is queued or running.
    pub(crate) fn wait_idle(&self) {
        if on_worker() {
            warn!("wait_idle called from a dispatcher worker; ignoring");
            return;
        }
        let mut count = self.in_flight.count.lock();
        while *count > 0 {
            self.in_flight.idle.wait(&mut count);
        }
    }

    /// Refuses new items; workers exit once their queue is drained.
    pub(crate) fn close(&self) {
        for queue in &self.queues {
            queue.state.lock().closed = true;
            queue.ready.notify_all();
        }
    }

    pub(crate) fn workers(&self) -> usize {
        self.queues.len()
    }
}

fn worker_loop(queue: &RunQueue, in_flight: &InFlight) {
    DEFERRED.with(|d| *d.borrow_mut() = Some(VecDeque::new()));
    while let Some(item) = queue.pop() {
        let _ = apply(item);
        while let Some(next) = DEFERRED.with(|d| d.borrow_mut().as_mut().and_then(VecDeque::pop_front)) {
            let _ = apply(next);
        }
        in_flight.end();
    }
    DEFERRED.with(|d| d.borrow_mut().take());
}
