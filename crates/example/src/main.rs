//! Demo pipeline.
//!
//! Builds `source -> tee -> echo` with a `sink` on the tee's copy hook,
//! pushes a few buffers through, then logs what each node saw and the
//! graph's node list.
//!
//! # Usage
//!
//! ```bash
//! ngdemo [count] [pretty|compact|json]
//! NGRAPH_WORKERS=1 ngdemo 10
//! ```
//!
//! `NGRAPH_WORKERS` and `NGRAPH_MAX_ITEMS` size the graph.

use example::{HoleStats, TracingConfig, TracingFormat, register_all};
use ngraph_base::prelude::*;
use tracing::{error, info};

const DEFAULT_COUNT: usize = 4;

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let count = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_COUNT);
    let format = args
        .next()
        .and_then(|s| TracingFormat::parse(&s))
        .unwrap_or_default();

    TracingConfig::new()
        .with_format(format)
        .with_env_filter("info,ngraph_base=debug")
        .init();

    let graph = match Graph::with_config(GraphConfig::from_env()) {
        Ok(graph) => graph,
        Err(err) => {
            error!(%err, "graph setup failed");
            std::process::exit(1);
        }
    };
    let outcome = run(&graph, count).await;
    // Shutdown blocks on the workers; keep it off the async executor.
    tokio::task::block_in_place(|| graph.shutdown());
    if let Err(err) = outcome {
        error!(%err, "demo failed");
        std::process::exit(1);
    }
}

async fn run(graph: &Graph, count: usize) -> Result<()> {
    register_all(graph)?;

    let source = graph.create_node("hole")?;
    source.set_name("source")?;
    graph
        .send_msg("source:", Message::mkpeer("tee", "out", "left"))?
        .await?;
    graph
        .send_msg("source:out", Message::name("tee"))?
        .await?;
    graph
        .send_msg("tee:", Message::mkpeer("echo", "right", "in"))?
        .await?;
    graph
        .send_msg("tee:", Message::mkpeer("hole", "copy", "in"))?
        .await?;
    graph.send_msg("tee:copy", Message::name("sink"))?.await?;

    let out = source.find_hook("out").ok_or(NgError::NotFound)?;
    for i in 0..count {
        out.send_data(format!("packet {i}").into_bytes())?;
    }
    tokio::task::block_in_place(|| graph.wait_idle());

    for name in ["source", "sink"] {
        let status = graph.send_msg(format!("{name}:").as_str(), Message::text_status())?;
        if let Body::Text(text) = status.await?.body {
            info!(node = name, status = %text, "hole status");
        }
    }
    if let Some(stats) = graph.node_by_name("sink").as_ref().and_then(HoleStats::of) {
        info!(items = stats.items(), bytes = stats.bytes(), "sink counters");
    }

    if let Body::NameList(list) = graph.send_msg(&source, Message::list_nodes())?.await?.body {
        for node in list.nodes {
            info!(
                id = %node.id,
                name = node.name.as_deref().unwrap_or("-"),
                type_name = %node.type_name,
                hooks = node.hooks,
                "node"
            );
        }
    }

    let stats = graph.stats();
    info!(
        items_created = stats.items_created,
        items_freed = stats.items_freed,
        applied = stats.applied,
        "dispatch totals"
    );
    Ok(())
}
