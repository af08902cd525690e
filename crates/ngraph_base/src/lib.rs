//! Core of ngraph, a typed directed-graph message-passing framework.
//!
//! Nodes are instances of registered node types. They are wired together
//! through named hooks and exchange three kinds of work items: data
//! buffers, control messages and deferred function calls. Items are
//! applied by a pool of dispatcher workers under a per-node reader/writer
//! lock, so node-type code never has to lock its own state.
//!
//! Everything lives inside a [`Graph`], which owns the type registry, the
//! ID and Name tables, the item pool and the workers.
//!
//! # Quick start
//!
//! ```ignore
//! use ngraph_base::prelude::*;
//! use std::sync::Arc;
//!
//! let graph = Graph::new()?;
//! graph.register_type(Arc::new(Echo))?;
//! let e1 = graph.create_node("echo")?;
//! graph.send_msg(&e1, Message::mkpeer("echo", "out", "in"))?.wait()?;
//! ```

/// Message text conversion.
pub mod codec;

/// Graph tunables.
pub mod config;

/// Error type and result alias.
pub mod error;

/// Graph vertices.
pub mod node;

/// Graph edge endpoints.
pub mod hook;

/// Work items.
pub mod item;

/// Control messages.
pub mod message;

/// Responses and reply channels.
pub mod reply;

/// Item dispatch.
pub mod dispatch;

/// Delayed function items.
pub mod callout;

/// Path addressing.
pub mod path;

/// Node types.
pub mod types;

/// The graph context.
pub mod graph;

mod generic;
mod registry;

pub use callout::Callout;
pub use config::GraphConfig;
pub use dispatch::Address;
pub use error::{NgError, Result};
pub use graph::{Graph, GraphStats};
pub use hook::Hook;
pub use item::Item;
pub use message::{Body, GenericCmd, Message};
pub use node::{Node, NodeId};
pub use reply::{PendingReply, Responder};
pub use types::{Capabilities, NodeType};

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::callout::*;
    pub use crate::codec::*;
    pub use crate::config::*;
    pub use crate::dispatch::Address;
    pub use crate::error::*;
    pub use crate::graph::*;
    pub use crate::hook::*;
    pub use crate::item::*;
    pub use crate::message::*;
    pub use crate::node::*;
    pub use crate::path::*;
    pub use crate::reply::*;
    pub use crate::types::*;
}
