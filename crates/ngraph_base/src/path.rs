//! Path addressing.
//!
//! Grammar: `[NODESPEC ":"] PATH`, where `NODESPEC` is `.` (the sending
//! node), a node name, or `[hexid]`, and `PATH` is a dot-separated list of
//! hook names. Each hook name in the path is followed to its peer's node.
//!
//! ```text
//! ether0:            the node named ether0
//! [1f]:lower.upper   from node 0x1f, through hook lower, then upper
//! out                from the sending node, through hook out
//! ```
//!
//! No lock is held across the walk. A segment torn down concurrently
//! yields `NotFound`; there is no atomicity across the whole path.

use crate::error::{NgError, Result};
use crate::graph::GraphCore;
use crate::hook::Hook;
use crate::node::{Node, NodeId};
use std::sync::Arc;

/// Addresses must be strictly shorter than this.
pub const PATH_MAX: usize = 512;

/// A syntactically checked address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedPath<'a> {
    /// The node spec, if the address is absolute.
    pub node: Option<&'a str>,
    /// The hook path, without degenerate leading or trailing dots.
    pub path: Option<&'a str>,
    /// The path itself when it is a single hook name.
    pub hook: Option<&'a str>,
}

/// Splits and checks an address.
///
/// Fails with `InvalidArgument` for an empty node spec, a dotted node
/// name, a `:` in the path, or an empty (`..`) segment.
pub fn parse(addr: &str) -> Result<ParsedPath<'_>> {
    if addr.len() >= PATH_MAX {
        return Err(NgError::InvalidArgument);
    }
    let (node, path) = match addr.split_once(':') {
        Some((node, path)) => (Some(node), path),
        None => (None, addr),
    };
    if let Some(node) = node
        && (node.is_empty() || (node != "." && node.contains('.')))
    {
        return Err(NgError::InvalidArgument);
    }
    if path.contains(':') || path.contains("..") {
        return Err(NgError::InvalidArgument);
    }
    let path = path.strip_prefix('.').unwrap_or(path);
    let path = path.strip_suffix('.').unwrap_or(path);
    if path.is_empty() {
        return Ok(ParsedPath {
            node,
            path: None,
            hook: None,
        });
    }
    Ok(ParsedPath {
        node,
        path: Some(path),
        hook: (!path.contains('.')).then_some(path),
    })
}

/// Outcome of a path walk.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Destination node.
    pub node: Node,
    /// The hook on `node` through which the walk arrived.
    pub last_hook: Option<Hook>,
}

/// Looks up a node spec: `.`, `[hexid]` or a name.
pub(crate) fn lookup_node(core: &GraphCore, here: Option<&Node>, spec: &str) -> Option<Node> {
    if spec == "." {
        return here.filter(|n| n.is_valid()).cloned();
    }
    if let Some(id) = NodeId::decode(spec) {
        return core.registries().find_id(id);
    }
    core.registries().find_name(spec)
}

/// Resolves `addr` relative to `here`.
pub(crate) fn resolve(core: &Arc<GraphCore>, here: Option<&Node>, addr: &str) -> Result<Resolved> {
    let parsed = parse(addr)?;
    let mut node = match parsed.node {
        Some(spec) => lookup_node(core, here, spec).ok_or(NgError::NotFound)?,
        None => here.cloned().ok_or(NgError::InvalidArgument)?,
    };
    let mut last_hook = None;
    for segment in parsed.path.unwrap_or_default().split('.') {
        if segment.is_empty() {
            continue;
        }
        let hook = node.find_hook(segment).ok_or(NgError::NotFound)?;
        let peer = hook.peer();
        if !hook.is_valid() || !peer.is_valid() {
            return Err(NgError::NotFound);
        }
        let next = peer.node();
        if !next.is_valid() {
            return Err(NgError::NotFound);
        }
        node = next;
        last_hook = Some(peer);
    }
    Ok(Resolved { node, last_hook })
}
