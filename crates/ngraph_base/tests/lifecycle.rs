//! Type registration, node creation, naming and shutdown.


use ngraph_base::prelude::*;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use test_utils::{Fixture, fixture, request};

// ═══════════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn find_type_is_stable_until_unregistered() {
    let Fixture { graph, .. } = fixture();
    let first = graph.find_type("echo").unwrap();
    let second = graph.find_type("echo").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.name(), "echo");

    graph.unregister_type("echo").unwrap();
    assert!(graph.find_type("echo").is_none());
    assert_eq!(graph.unregister_type("echo"), Err(NgError::NotFound));
}

#[test]
fn unregister_waits_for_the_last_node() {
    let Fixture { graph, .. } = fixture();
    let node = graph.create_node("echo").unwrap();
    assert_eq!(graph.unregister_type("echo"), Err(NgError::Busy));

    request(&graph, &node, Message::shutdown()).unwrap();
    graph.wait_idle();
    // Our handle still pins the node.
    assert_eq!(graph.unregister_type("echo"), Err(NgError::Busy));

    drop(node);
    graph.wait_idle();
    assert_eq!(graph.node_count(), 0);
    graph.unregister_type("echo").unwrap();
}

#[test]
fn duplicate_type_names_are_refused() {
    let Fixture { graph, .. } = fixture();
    assert_eq!(
        graph.register_type(Arc::new(test_utils::NoCtor)),
        Err(NgError::AlreadyExists)
    );
    let names: Vec<_> = graph.types().into_iter().map(|t| t.type_name).collect();
    assert_eq!(names, ["echo", "recorder", "veto", "persistent", "noctor"]);
}

// ═══════════════════════════════════════════════════════════════════════════════
// CREATION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn create_node_requires_a_known_type_with_a_constructor() {
    let Fixture { graph, .. } = fixture();
    assert_eq!(graph.create_node("nosuch").unwrap_err(), NgError::NotFound);
    assert_eq!(
        graph.create_node("noctor").unwrap_err(),
        NgError::InvalidArgument
    );
    // Types that build their own nodes use make_node.
    let raw = graph.make_node("noctor").unwrap();
    assert!(raw.is_valid());
    assert_eq!(raw.type_name(), "noctor");
}

#[test]
fn failed_constructor_leaves_nothing_behind() {
    let Fixture { graph, veto, .. } = fixture();
    veto.constructor
        .store(true, std::sync::atomic::Ordering::SeqCst);
    assert_eq!(
        graph.create_node("veto").unwrap_err(),
        NgError::PermissionDenied
    );
    assert_eq!(graph.node_count(), 0);
    graph.unregister_type("veto").unwrap();
}

#[test]
fn node_ids_are_unique_and_resolvable() {
    let Fixture { graph, .. } = fixture();
    let nodes: Vec<Node> = (0..200)
        .map(|_| graph.create_node("echo").unwrap())
        .collect();
    let ids: HashSet<NodeId> = nodes.iter().map(Node::id).collect();
    assert_eq!(ids.len(), nodes.len());
    for node in &nodes {
        assert_eq!(graph.node_by_id(node.id()).as_ref(), Some(node));
    }
    let stats = graph.stats();
    assert_eq!(stats.nodes, 200);
    // 200 entries never sit more than two to a bucket.
    assert!(stats.id_buckets * 2 >= 200);
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAMES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn names_are_unique_among_live_nodes() {
    let Fixture { graph, .. } = fixture();
    let a = graph.create_node("echo").unwrap();
    let b = graph.create_node("echo").unwrap();
    a.set_name("alpha").unwrap();
    assert_eq!(b.set_name("alpha"), Err(NgError::AlreadyExists));
    assert_eq!(graph.node_by_name("alpha").as_ref(), Some(&a));

    // Renaming frees the old name.
    a.set_name("beta").unwrap();
    assert!(graph.node_by_name("alpha").is_none());
    b.set_name("alpha").unwrap();
    assert_eq!(graph.node_by_name("alpha").as_ref(), Some(&b));
    assert_eq!(graph.stats().named_nodes, 2);
}

#[test]
fn reserved_and_malformed_names_are_rejected() {
    let Fixture { graph, .. } = fixture();
    let node = graph.create_node("echo").unwrap();
    for bad in ["", "a.b", "a:b", "[1f]", "0123456789012345678901234567890123"] {
        assert_eq!(node.set_name(bad), Err(NgError::InvalidArgument), "{bad}");
    }
    assert!(node.name().is_none());
}

#[test]
fn a_dead_node_releases_its_name() {
    let Fixture { graph, .. } = fixture();
    let old = graph.create_node("echo").unwrap();
    old.set_name("svc").unwrap();
    request(&graph, &old, Message::shutdown()).unwrap();
    graph.wait_idle();

    // The old node is still referenced but no longer valid.
    let new = graph.create_node("echo").unwrap();
    new.set_name("svc").unwrap();
    assert_eq!(graph.node_by_name("svc").as_ref(), Some(&new));
    drop(old);
    assert_eq!(graph.node_by_name("svc").as_ref(), Some(&new));
}

#[derive(Debug, Clone)]
enum Op {
    Create,
    Remove(usize),
    Name(usize, u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Create),
        any::<usize>().prop_map(Op::Remove),
        (any::<usize>(), 0u8..4).prop_map(|(i, n)| Op::Name(i, n)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn ids_and_names_stay_unique(ops in prop::collection::vec(op(), 1..40)) {
        let graph = Graph::with_config(GraphConfig::new().with_workers(1)).unwrap();
        graph.register_type(Arc::new(test_utils::NoCtor)).unwrap();
        let mut live: Vec<Node> = Vec::new();
        let mut owners: HashMap<String, NodeId> = HashMap::new();

        for op in ops {
            match op {
                Op::Create => live.push(graph.make_node("noctor").unwrap()),
                Op::Remove(i) if !live.is_empty() => {
                    let node = live.remove(i % live.len());
                    if let Some(name) = node.name() {
                        owners.remove(&*name);
                    }
                    node.shutdown();
                }
                Op::Name(i, n) if !live.is_empty() => {
                    let node = &live[i % live.len()];
                    let name = format!("n{n}");
                    let result = node.set_name(&name);
                    match owners.get(&name) {
                        Some(owner) if *owner != node.id() => {
                            prop_assert_eq!(result, Err(NgError::AlreadyExists));
                        }
                        _ => {
                            prop_assert_eq!(result, Ok(()));
                            owners.retain(|_, id| *id != node.id());
                            owners.insert(name, node.id());
                        }
                    }
                }
                _ => {}
            }

            let ids: HashSet<NodeId> = live.iter().map(Node::id).collect();
            prop_assert_eq!(ids.len(), live.len());
            for (name, id) in &owners {
                let found = graph.node_by_name(name).map(|n| n.id());
                prop_assert_eq!(found, Some(*id));
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHUTDOWN
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn shutdown_removes_hooks_and_unregisters() {
    let Fixture { graph, .. } = fixture();
    let (a, b) = test_utils::pair(&graph, "echo", "echo");
    let b_id = b.id();
    drop(b);

    request(&graph, &a, Message::shutdown()).unwrap();
    graph.wait_idle();
    assert!(!a.is_valid());
    assert_eq!(a.num_hooks(), 0);
    // The peer lost its only hook but lives on until told otherwise.
    let b = graph.node_by_id(b_id).unwrap();
    assert_eq!(b.num_hooks(), 0);

    let a_id = a.id();
    drop(a);
    assert!(graph.node_by_id(a_id).is_none());
}

#[test]
fn repeated_shutdown_is_a_no_op() {
    let Fixture { graph, log, .. } = fixture();
    let node = graph.create_node("persistent").unwrap();
    node.set_really_die();
    node.shutdown();
    node.shutdown();
    assert_eq!(log.shutdowns(), 1);
    assert!(node.is_closing());
}

#[test]
fn persistent_nodes_survive_until_forced() {
    let Fixture { graph, log, .. } = fixture();
    let node = graph.create_node("persistent").unwrap();
    let id = node.id();
    node.add_hook("spare").unwrap();
    drop(node);

    request(&graph, id, Message::shutdown()).unwrap();
    graph.wait_idle();
    let node = graph.node_by_id(id).expect("revived node stays registered");
    assert!(node.is_valid());
    assert_eq!(node.num_hooks(), 0);
    assert_eq!(log.shutdowns(), 1);
    drop(node);

    graph.shutdown();
    assert_eq!(log.shutdowns(), 2);
    assert_eq!(graph.node_count(), 0);
}

#[test]
fn graph_shutdown_frees_every_item() {
    let Fixture { graph, .. } = fixture();
    for _ in 0..4 {
        let (a, _) = test_utils::pair(&graph, "echo", "recorder");
        a.find_hook("out").unwrap().send_data(vec![1, 2, 3]).unwrap();
    }
    graph.shutdown();
    let stats = graph.stats();
    assert_eq!(stats.items_outstanding, 0);
    assert_eq!(stats.items_created, stats.items_freed);
    assert_eq!(stats.nodes, 0);
    assert_eq!(graph.create_node("echo").unwrap_err(), NgError::Unreachable);
    // Idempotent.
    graph.shutdown();
}
