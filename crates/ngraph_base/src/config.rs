//! Graph configuration.
//!
//! # Example
//!
//! ```ignore
//! use ngraph_base::{Graph, GraphConfig};
//!
//! let graph = Graph::with_config(
//!     GraphConfig::new()
//!         .with_workers(1)
//!         .with_max_items(256),
//! )?;
//! ```

use tracing::warn;

/// Default size of the item pool.
pub const DEFAULT_MAX_ITEMS: usize = 4096;

/// Default starting bucket count of the ID and Name tables.
pub const DEFAULT_INITIAL_BUCKETS: usize = 16;

/// Environment variable overriding the worker count.
pub const ENV_WORKERS: &str = "NGRAPH_WORKERS";

/// Environment variable overriding the item pool size.
pub const ENV_MAX_ITEMS: &str = "NGRAPH_MAX_ITEMS";

/// Tunables for a [`Graph`](crate::Graph).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    workers: usize,
    max_items: usize,
    initial_buckets: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism().map_or(1, usize::from);
        Self {
            workers,
            max_items: DEFAULT_MAX_ITEMS,
            initial_buckets: DEFAULT_INITIAL_BUCKETS,
        }
    }
}

impl GraphConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a default configuration, then applies `NGRAPH_WORKERS` and
    /// `NGRAPH_MAX_ITEMS` if they are set and parse.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(workers) = read_env(ENV_WORKERS) {
            config = config.with_workers(workers);
        }
        if let Some(max_items) = read_env(ENV_MAX_ITEMS) {
            config = config.with_max_items(max_items);
        }
        config
    }

    /// Sets the number of dispatcher workers. Zero is raised to one.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the item pool size. Zero is raised to one.
    #[must_use]
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items.max(1);
        self
    }

    /// Sets the starting bucket count of the node tables, rounded up to a
    /// power of two.
    #[must_use]
    pub fn with_initial_buckets(mut self, buckets: usize) -> Self {
        self.initial_buckets = buckets.max(1).next_power_of_two();
        self
    }

    /// Number of dispatcher workers.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Item pool size.
    #[must_use]
    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Starting bucket count of the node tables.
    #[must_use]
    pub fn initial_buckets(&self) -> usize {
        self.initial_buckets
    }
}

fn read_env(key: &str) -> Option<usize> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable configuration override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = GraphConfig::new();
        assert!(config.workers() >= 1);
        assert_eq!(config.max_items(), DEFAULT_MAX_ITEMS);
        assert_eq!(config.initial_buckets(), DEFAULT_INITIAL_BUCKETS);
    }

    #[test]
    fn builder_clamps_values() {
        let config = GraphConfig::new()
            .with_workers(0)
            .with_max_items(0)
            .with_initial_buckets(10);
        assert_eq!(config.workers(), 1);
        assert_eq!(config.max_items(), 1);
        assert_eq!(config.initial_buckets(), 16);
    }
}
