//! Work items.
//!
//! An [`Item`] carries one unit of work through the graph: a data buffer,
//! a control message, or a deferred function call. It owns exactly the
//! references it needs (destination node and optional hook) and a slot
//! in the graph's bounded item pool; all of them are released exactly
//! once, when the item is dropped.
//!
//! Items may carry a completion notifier. It fires once the item and
//! every continuation that reused it are finished, reporting the first
//! error any step returned.

use crate::dispatch;
use crate::error::{NgError, Result};
use crate::graph::GraphCore;
use crate::hook::Hook;
use crate::message::Message;
use crate::node::Node;
use crate::reply::ReturnAddr;
use core::fmt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Deferred call applied to a node.
pub type ItemFn = Box<dyn FnOnce(&Node, Option<&Hook>) + Send>;

/// Deferred call that receives the item it arrived in, so it can resubmit
/// it as the next step of a continuation chain.
pub type ReuseFn = Box<dyn FnOnce(&Node, Item, Option<Hook>) -> Result<()> + Send>;

/// Completion callback.
pub type CompletionFn = Box<dyn FnOnce(Result<()>) + Send>;

/// What an item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    /// A data buffer.
    Data,
    /// A control message.
    Message,
    /// A deferred function call.
    Function,
    /// A deferred call that reuses its item.
    ReusingFunction,
    /// Payload already consumed.
    Spent,
}

pub(crate) enum Payload {
    Data(Vec<u8>),
    Message(Message, Option<ReturnAddr>),
    Function(ItemFn),
    Reuse(ReuseFn),
    Spent,
}

impl Payload {
    fn kind(&self) -> ItemType {
        match self {
            Self::Data(_) => ItemType::Data,
            Self::Message(..) => ItemType::Message,
            Self::Function(_) => ItemType::Function,
            Self::Reuse(_) => ItemType::ReusingFunction,
            Self::Spent => ItemType::Spent,
        }
    }

    /// Messages are writers unless flagged read-only; data are readers;
    /// functions are writers.
    fn wants_writer(&self) -> bool {
        match self {
            Self::Data(_) | Self::Spent => false,
            Self::Message(msg, _) => !msg.is_readonly(),
            Self::Function(_) | Self::Reuse(_) => true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ItemPool
// ─────────────────────────────────────────────────────────────────────────────

/// Bounded pool of item slots with lifetime accounting.
pub(crate) struct ItemPool {
    max: usize,
    outstanding: AtomicUsize,
    created: AtomicU64,
    freed: AtomicU64,
}

impl ItemPool {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            max,
            outstanding: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            freed: AtomicU64::new(0),
        }
    }

    fn reserve(self: &Arc<Self>) -> Result<Slot> {
        let prev = self.outstanding.fetch_add(1, Ordering::AcqRel);
        if prev >= self.max {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            return Err(NgError::Busy);
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(Slot {
            pool: Arc::clone(self),
        })
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub(crate) fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub(crate) fn freed(&self) -> u64 {
        self.freed.load(Ordering::Relaxed)
    }
}

struct Slot {
    pool: Arc<ItemPool>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let prev = self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "item pool underflow");
        self.pool.freed.fetch_add(1, Ordering::Relaxed);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Completion
// ─────────────────────────────────────────────────────────────────────────────

/// Shared by an item and the dispatcher while a step runs; fires when the
/// last holder lets go.
pub(crate) struct Completion {
    error: Mutex<Option<NgError>>,
    notify: Mutex<Option<CompletionFn>>,
}

impl Completion {
    pub(crate) fn record(&self, err: NgError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(notify) = self.notify.get_mut().take() {
            let result = match self.error.get_mut().take() {
                Some(err) => Err(err),
                None => Ok(()),
            };
            notify(result);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Item
// ─────────────────────────────────────────────────────────────────────────────

/// One unit of work addressed to a node.
pub struct Item {
    payload: Payload,
    node: Option<Node>,
    hook: Option<Hook>,
    writer: bool,
    hops: u32,
    allow_invalid: bool,
    completion: Option<Arc<Completion>>,
    _slot: Slot,
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("kind", &self.kind())
            .field("node", &self.node.as_ref().map(Node::id))
            .field("hook", &self.hook.as_ref().map(Hook::name))
            .field("writer", &self.writer)
            .field("hops", &self.hops)
            .finish()
    }
}

impl Item {
    /// Reserves a pool slot. Fails with `Busy` when the pool is exhausted.
    pub(crate) fn new(core: &Arc<GraphCore>, payload: Payload) -> Result<Self> {
        let slot = core.pool().reserve()?;
        Ok(Self {
            writer: payload.wants_writer(),
            payload,
            node: None,
            hook: None,
            hops: 0,
            allow_invalid: false,
            completion: None,
            _slot: slot,
        })
    }

    pub(crate) fn addressed(mut self, node: Node, hook: Option<Hook>) -> Self {
        self.node = Some(node);
        self.hook = hook;
        self
    }

    /// Lets the item run on an invalid node; used by teardown requests.
    pub(crate) fn allow_invalid(mut self) -> Self {
        self.allow_invalid = true;
        self
    }

    pub(crate) fn allows_invalid(&self) -> bool {
        self.allow_invalid
    }

    /// What the item carries.
    #[must_use]
    pub fn kind(&self) -> ItemType {
        self.payload.kind()
    }

    /// Returns `true` if the item will be applied with the writer lock.
    #[must_use]
    pub fn is_writer(&self) -> bool {
        self.writer
    }

    /// Forces the writer lock for this item.
    pub fn set_writer(&mut self) {
        self.writer = true;
    }

    /// Requests the reader lock for this item.
    pub fn set_reader(&mut self) {
        self.writer = false;
    }

    /// The data buffer of a data item.
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Data(buf) => Some(buf),
            _ => None,
        }
    }

    /// Mutable access to the data buffer of a data item.
    pub fn data_mut(&mut self) -> Option<&mut Vec<u8>> {
        match &mut self.payload {
            Payload::Data(buf) => Some(buf),
            _ => None,
        }
    }

    /// Consumes the item, returning its data buffer.
    #[must_use]
    pub fn into_data(mut self) -> Option<Vec<u8>> {
        match self.take_payload() {
            Payload::Data(buf) => Some(buf),
            _ => None,
        }
    }

    /// The message of a message item.
    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        match &self.payload {
            Payload::Message(msg, _) => Some(msg),
            _ => None,
        }
    }

    /// Destination node, once addressed.
    #[must_use]
    pub fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    /// Destination hook, if any.
    #[must_use]
    pub fn hook(&self) -> Option<&Hook> {
        self.hook.as_ref()
    }

    /// Number of times the item has been submitted.
    #[must_use]
    pub fn hops(&self) -> u32 {
        self.hops
    }

    /// Attaches a completion callback, replacing any previous one. The
    /// replaced callback still fires once with the result recorded so far,
    /// but only after every step currently holding it has finished.
    pub fn on_complete<F>(&mut self, f: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.completion = Some(Arc::new(Completion {
            error: Mutex::new(None),
            notify: Mutex::new(Some(Box::new(f))),
        }));
    }

    /// Turns a received item into the next step of a continuation chain:
    /// `f` will run on `node` under its writer lock, receiving this item
    /// back. Applied right after the current step releases its lock.
    pub fn continue_with<F>(mut self, node: &Node, hook: Option<&Hook>, f: F) -> Result<()>
    where
        F: FnOnce(&Node, Item, Option<Hook>) -> Result<()> + Send + 'static,
    {
        self.payload = Payload::Reuse(Box::new(f));
        self.writer = true;
        dispatch::submit(self.addressed(node.clone(), hook.cloned()))
    }

    pub(crate) fn take_payload(&mut self) -> Payload {
        core::mem::replace(&mut self.payload, Payload::Spent)
    }

    pub(crate) fn take_node(&mut self) -> Option<Node> {
        self.node.take()
    }

    pub(crate) fn take_hook(&mut self) -> Option<Hook> {
        self.hook.take()
    }

    pub(crate) fn completion(&self) -> Option<Arc<Completion>> {
        self.completion.clone()
    }

    /// Counts one more submission and returns the new count.
    pub(crate) fn bump_hops(&mut self) -> u32 {
        self.hops += 1;
        self.hops
    }

    /// Drops the item after recording `err` for its completion callback.
    pub(crate) fn fail(self, err: NgError) -> NgError {
        if let Some(completion) = &self.completion {
            completion.record(err);
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_refuses_beyond_capacity() {
        let pool = Arc::new(ItemPool::new(2));
        let a = pool.reserve().unwrap();
        let _b = pool.reserve().unwrap();
        assert!(matches!(pool.reserve(), Err(NgError::Busy)));
        drop(a);
        let _c = pool.reserve().unwrap();
        assert_eq!(pool.outstanding(), 2);
        assert_eq!(pool.created(), 3);
        assert_eq!(pool.freed(), 1);
    }

    #[test]
    fn completion_reports_first_error_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let completion = Arc::new(Completion {
            error: Mutex::new(None),
            notify: Mutex::new(Some(Box::new(move |r| sink.lock().push(r)))),
        });
        let held = Arc::clone(&completion);
        completion.record(NgError::NotFound);
        held.record(NgError::Busy);
        drop(completion);
        assert!(seen.lock().is_empty());
        drop(held);
        assert_eq!(*seen.lock(), vec![Err(NgError::NotFound)]);
    }

    #[test]
    fn replaced_completion_waits_for_its_holders() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let first = Arc::new(Completion {
            error: Mutex::new(None),
            notify: Mutex::new(Some(Box::new(move |r| sink.lock().push(r)))),
        });
        // A running step keeps its own handle.
        let applying = Arc::clone(&first);
        let mut slot = Some(first);
        let replaced = slot.replace(Arc::new(Completion {
            error: Mutex::new(None),
            notify: Mutex::new(None),
        }));
        drop(replaced);
        assert!(seen.lock().is_empty());
        drop(applying);
        assert_eq!(*seen.lock(), vec![Ok(())]);
        drop(slot);
    }
}
