//! A typed, directed-graph message-passing framework.
//!
//! Nodes are wired together through hooks and exchange data, control
//! messages and deferred function calls dispatched under per-node
//! reader/writer locks. See [`ngraph_base`] for the full API.

pub use ngraph_base::*;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use ngraph_base::prelude::*;
}
