//! Three small node types: a reflector, a sink and a splitter.

use ngraph_base::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Registers [`Echo`], [`Hole`] and [`Tee`] with `graph`.
pub fn register_all(graph: &Graph) -> Result<()> {
    graph.register_type(Arc::new(Echo))?;
    graph.register_type(Arc::new(Hole))?;
    graph.register_type(Arc::new(Tee))
}

// ─────────────────────────────────────────────────────────────────────────────
// Echo
// ─────────────────────────────────────────────────────────────────────────────

/// Sends every data item back out the hook it arrived on.
#[derive(Debug, Default)]
pub struct Echo;

impl NodeType for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::CONSTRUCTOR | Capabilities::RCVDATA
    }

    fn rcvdata(&self, hook: &Hook, item: Item) -> Result<()> {
        hook.forward(item)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hole
// ─────────────────────────────────────────────────────────────────────────────

/// Counters kept by a [`Hole`] node.
#[derive(Debug, Default)]
pub struct HoleStats {
    items: AtomicU64,
    bytes: AtomicU64,
}

impl HoleStats {
    /// The counters of `node`, if it is a hole.
    #[must_use]
    pub fn of(node: &Node) -> Option<Arc<Self>> {
        node.private::<Self>()
    }

    /// Items swallowed so far.
    #[must_use]
    pub fn items(&self) -> u64 {
        self.items.load(Ordering::Relaxed)
    }

    /// Bytes swallowed so far.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Discards data, counting it. `textstatus` reports the counts.
#[derive(Debug, Default)]
pub struct Hole;

impl NodeType for Hole {
    fn name(&self) -> &str {
        "hole"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::CONSTRUCTOR | Capabilities::RCVDATA | Capabilities::RCVMSG
    }

    fn constructor(&self, node: &Node) -> Result<()> {
        node.set_private(HoleStats::default());
        Ok(())
    }

    fn rcvdata(&self, hook: &Hook, item: Item) -> Result<()> {
        let stats = HoleStats::of(&hook.node()).ok_or(NgError::Invalid)?;
        stats.items.fetch_add(1, Ordering::Relaxed);
        let len = item.data().map_or(0, <[u8]>::len);
        stats.bytes.fetch_add(len as u64, Ordering::Relaxed);
        Ok(())
    }

    fn rcvmsg(
        &self,
        node: &Node,
        msg: Message,
        reply: &mut Responder,
        _lasthook: Option<&Hook>,
    ) -> Result<()> {
        match msg.generic_cmd() {
            Some(GenericCmd::TextStatus) => {
                let stats = HoleStats::of(node).ok_or(NgError::Invalid)?;
                reply.respond(Body::Text(format!(
                    "items={} bytes={}",
                    stats.items(),
                    stats.bytes()
                )))
            }
            _ => Err(NgError::InvalidArgument),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tee
// ─────────────────────────────────────────────────────────────────────────────

/// Passes data between `left` and `right`, sending a copy of everything
/// out through `copy`. Other hook names are refused.
#[derive(Debug, Default)]
pub struct Tee;

impl Tee {
    const LEFT: &'static str = "left";
    const RIGHT: &'static str = "right";
    const COPY: &'static str = "copy";
}

impl NodeType for Tee {
    fn name(&self) -> &str {
        "tee"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::CONSTRUCTOR | Capabilities::NEWHOOK | Capabilities::RCVDATA
    }

    fn new_hook(&self, node: &Node, _hook: &Hook, name: &str) -> Result<()> {
        if [Self::LEFT, Self::RIGHT, Self::COPY].contains(&name) {
            Ok(())
        } else {
            debug!(node = %node.id(), hook = name, "tee refuses hook");
            Err(NgError::InvalidArgument)
        }
    }

    fn rcvdata(&self, hook: &Hook, item: Item) -> Result<()> {
        let out = match hook.name() {
            Self::LEFT => Self::RIGHT,
            Self::RIGHT => Self::LEFT,
            // Nothing flows back from the copy side.
            _ => return Ok(()),
        };
        let node = hook.node();
        if let (Some(copy), Some(data)) = (node.find_hook(Self::COPY), item.data())
            && let Err(err) = copy.send_data(data.to_vec())
        {
            debug!(node = %node.id(), %err, "tee copy dropped");
        }
        match node.find_hook(out) {
            Some(out) => out.forward(item),
            None => Ok(()),
        }
    }
}
