//! The graph context.
//!
//! A [`Graph`] owns everything the nodes of one graph share: the type
//! registry, the ID and Name tables, the item pool, the dispatcher workers
//! and the timer runtime used by callouts. Graphs are independent of each
//! other; dropping one shuts it down.
//!
//! # Example
//!
//! ```ignore
//! use ngraph_base::prelude::*;
//!
//! let graph = Graph::new()?;
//! graph.register_type(Arc::new(Echo))?;
//! let e1 = graph.create_node("echo")?;
//! graph.send_msg(&e1, Message::mkpeer("echo", "out", "in"))?.wait()?;
//! e1.find_hook("out").unwrap().send_data(b"hello".to_vec())?;
//! graph.wait_idle();
//! ```

use crate::config::GraphConfig;
use crate::dispatch::{self, Address, DispatchStats, Dispatcher};
use crate::error::{NgError, Result};
use crate::item::ItemPool;
use crate::message::{Message, TypeInfo};
use crate::node::{Node, NodeId};
use crate::path::{self, Resolved};
use crate::registry::Registries;
use crate::reply::{PendingReply, ReturnAddr};
use crate::types::{Capabilities, NodeType, TypeRegistry};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, error, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// GraphCore
// ─────────────────────────────────────────────────────────────────────────────

/// State shared by every node and hook of one graph.
pub(crate) struct GraphCore {
    config: GraphConfig,
    types: TypeRegistry,
    registries: Registries,
    /// Guards peer links while they are created, swapped or torn down.
    topology: RwLock<()>,
    dispatcher: Dispatcher,
    stats: DispatchStats,
    pool: Arc<ItemPool>,
    tokens: AtomicU32,
    timer: Handle,
    running: AtomicBool,
}

impl GraphCore {
    pub(crate) fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub(crate) fn registries(&self) -> &Registries {
        &self.registries
    }

    pub(crate) fn topology(&self) -> &RwLock<()> {
        &self.topology
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub(crate) fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub(crate) fn pool(&self) -> &Arc<ItemPool> {
        &self.pool
    }

    pub(crate) fn timer(&self) -> &Handle {
        &self.timer
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Nonzero message token.
    pub(crate) fn next_token(&self) -> u32 {
        self.tokens.fetch_add(1, Ordering::Relaxed).wrapping_add(1).max(1)
    }

    /// Registers a node of `type_name` without running its constructor.
    pub(crate) fn make_node(self: &Arc<Self>, type_name: &str) -> Result<Node> {
        if !self.is_running() {
            return Err(NgError::Unreachable);
        }
        let ty = self.types.acquire(type_name)?;
        let registered = self
            .registries
            .register(|id| Node::create(Arc::clone(self), id, Arc::clone(&ty)));
        match registered {
            Ok(node) => {
                debug!(node = %node.id(), type_name, "node created");
                Ok(node)
            }
            Err(err) => {
                ty.node_released();
                Err(err)
            }
        }
    }

    /// Creates a node and runs its type's constructor.
    ///
    /// Fails with `InvalidArgument` if the type has no constructor. A node
    /// whose constructor fails is discarded.
    pub(crate) fn create_node(self: &Arc<Self>, type_name: &str) -> Result<Node> {
        let ty = self.types.find(type_name).ok_or(NgError::NotFound)?;
        if !ty.has(Capabilities::CONSTRUCTOR) {
            return Err(NgError::InvalidArgument);
        }
        let node = self.make_node(type_name)?;
        if let Err(err) = node.type_entry().ops().constructor(&node) {
            debug!(node = %node.id(), type_name, %err, "constructor failed");
            node.abandon();
            return Err(err);
        }
        Ok(node)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Graph
// ─────────────────────────────────────────────────────────────────────────────

/// Item and table accounting of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GraphStats {
    /// Items ever allocated.
    pub items_created: u64,
    /// Items ever freed.
    pub items_freed: u64,
    /// Items currently allocated.
    pub items_outstanding: usize,
    /// Submissions, including continuations.
    pub submitted: u64,
    /// Items applied to a node.
    pub applied: u64,
    /// Registered nodes.
    pub nodes: usize,
    /// Named nodes.
    pub named_nodes: usize,
    /// Registered types.
    pub types: usize,
    /// Buckets of the ID table.
    pub id_buckets: usize,
    /// Buckets of the Name table.
    pub name_buckets: usize,
}

/// An independent graph of nodes.
pub struct Graph {
    core: Arc<GraphCore>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    runtime: Mutex<Option<Runtime>>,
}

impl core::fmt::Debug for Graph {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Graph")
            .field("config", &self.core.config)
            .field("running", &self.core.is_running())
            .finish_non_exhaustive()
    }
}

impl Graph {
    /// Creates a graph with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(GraphConfig::default())
    }

    /// Creates a graph and starts its workers and timer runtime.
    pub fn with_config(config: GraphConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ngraph-timer")
            .enable_time()
            .build()
            .map_err(|err| {
                warn!(%err, "could not start the timer runtime");
                NgError::OutOfMemory
            })?;
        let core = Arc::new(GraphCore {
            types: TypeRegistry::default(),
            registries: Registries::new(config.initial_buckets()),
            topology: RwLock::new(()),
            dispatcher: Dispatcher::new(config.workers()),
            stats: DispatchStats::default(),
            pool: Arc::new(ItemPool::new(config.max_items())),
            tokens: AtomicU32::new(0),
            timer: runtime.handle().clone(),
            running: AtomicBool::new(true),
            config,
        });
        let workers = match core.dispatcher.spawn_workers("ngraph-worker") {
            Ok(workers) => workers,
            Err(err) => {
                core.dispatcher.close();
                runtime.shutdown_background();
                return Err(err);
            }
        };
        info!(
            workers = core.dispatcher.workers(),
            max_items = core.config.max_items(),
            "graph started"
        );
        Ok(Self {
            core,
            workers: Mutex::new(workers),
            runtime: Mutex::new(Some(runtime)),
        })
    }

    /// The configuration the graph was built with.
    #[must_use]
    pub fn config(&self) -> &GraphConfig {
        &self.core.config
    }

    // ─────────────────────────────────────────────────────────────────────
    // Types
    // ─────────────────────────────────────────────────────────────────────

    /// Registers a node type.
    ///
    /// Fails with `VersionMismatch` for a foreign ABI version,
    /// `InvalidArgument` for a bad name and `AlreadyExists` for a taken one.
    pub fn register_type(&self, ty: Arc<dyn NodeType>) -> Result<()> {
        self.core.types.register(ty)
    }

    /// Unregisters a type. Fails with `Busy` while nodes of it are alive.
    pub fn unregister_type(&self, name: &str) -> Result<()> {
        self.core.types.unregister(name)
    }

    /// Looks up a registered type.
    #[must_use]
    pub fn find_type(&self, name: &str) -> Option<Arc<dyn NodeType>> {
        let entry = self.core.types.find(name)?;
        Some(entry.shared())
    }

    /// Every registered type with its live-node count.
    #[must_use]
    pub fn types(&self) -> Vec<TypeInfo> {
        self.core.types.snapshot()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Nodes
    // ─────────────────────────────────────────────────────────────────────

    /// Creates a node of `type_name` and runs its constructor.
    pub fn create_node(&self, type_name: &str) -> Result<Node> {
        self.core.create_node(type_name)
    }

    /// Registers a node without running a constructor, for types that
    /// create their own nodes.
    pub fn make_node(&self, type_name: &str) -> Result<Node> {
        self.core.make_node(type_name)
    }

    /// A valid node by ID.
    #[must_use]
    pub fn node_by_id(&self, id: NodeId) -> Option<Node> {
        self.core.registries.find_id(id)
    }

    /// A valid node by name.
    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<Node> {
        self.core.registries.find_name(name)
    }

    /// Resolves an absolute path.
    pub fn resolve(&self, path: &str) -> Result<Resolved> {
        path::resolve(&self.core, None, path)
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.core.registries.id_count()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────

    /// Sends a control message from outside the graph.
    ///
    /// The returned handle yields the response, an error response, or an
    /// empty acknowledgement for a request the node accepted silently.
    pub fn send_msg(&self, to: impl Into<Address>, msg: Message) -> Result<PendingReply> {
        let (ret, pending) = ReturnAddr::channel();
        dispatch::send_msg(&self.core, None, &to.into(), msg, Some(ret))?;
        Ok(pending)
    }

    /// Blocks until every queued item, and everything it queued in turn,
    /// has been applied. Does nothing when called from a worker.
    pub fn wait_idle(&self) {
        self.core.dispatcher.wait_idle();
    }

    /// Current accounting.
    #[must_use]
    pub fn stats(&self) -> GraphStats {
        let core = &self.core;
        GraphStats {
            items_created: core.pool.created(),
            items_freed: core.pool.freed(),
            items_outstanding: core.pool.outstanding(),
            submitted: core.stats.submitted.load(Ordering::Relaxed),
            applied: core.stats.applied.load(Ordering::Relaxed),
            nodes: core.registries.id_count(),
            named_nodes: core.registries.name_count(),
            types: core.types.len(),
            id_buckets: core.registries.id_buckets(),
            name_buckets: core.registries.name_buckets(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────

    /// Shuts every node down, ignoring persistence, then stops the
    /// workers and the timer runtime. Idempotent.
    pub fn shutdown(&self) {
        if !self.core.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let nodes = self.core.registries.all_nodes();
        debug!(nodes = nodes.len(), "graph shutting down");
        for node in &nodes {
            node.set_really_die();
            if let Err(err) = node.remove_self() {
                warn!(node = %node.id(), %err, "could not queue node shutdown");
            }
        }
        drop(nodes);
        self.core.dispatcher.wait_idle();
        self.core.dispatcher.close();
        for worker in self.workers.lock().drain(..) {
            if worker.join().is_err() {
                error!("dispatcher worker panicked");
            }
        }
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
        info!("graph stopped");
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.shutdown();
    }
}
