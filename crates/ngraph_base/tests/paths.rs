//! Address resolution against a live graph.


use ngraph_base::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;
use test_utils::{Fixture, fixture, pair, request};

/// `a.out <-> b.in`, `b.out <-> c.in`, with `a` named `head`.
fn chain(graph: &Graph) -> (Node, Node, Node) {
    let (a, b) = pair(graph, "echo", "echo");
    request(graph, &b, Message::mkpeer("echo", "out", "in")).unwrap();
    let c = b.find_hook("out").unwrap().peer_node();
    a.set_name("head").unwrap();
    (a, b, c)
}

#[test]
fn names_and_ids_resolve_to_nodes() {
    let Fixture { graph, .. } = fixture();
    let (a, _, _) = chain(&graph);

    let by_name = graph.resolve("head:").unwrap();
    assert_eq!(by_name.node, a);
    assert!(by_name.last_hook.is_none());

    let by_id = graph.resolve(&format!("{}:", a.id())).unwrap();
    assert_eq!(by_id.node, a);
}

#[test]
fn hook_chains_walk_to_the_far_node() {
    let Fixture { graph, .. } = fixture();
    let (a, b, c) = chain(&graph);

    let one = graph.resolve("head:out").unwrap();
    assert_eq!(one.node, b);
    assert_eq!(one.last_hook.as_ref().map(Hook::name), Some("in"));

    let two = graph.resolve("head:out.out").unwrap();
    assert_eq!(two.node, c);
    assert_eq!(two.last_hook.map(|h| h.node()), Some(c.clone()));

    // Relative to a node, with and without the explicit `.` spec.
    assert_eq!(a.resolve("out.out").unwrap().node, c);
    assert_eq!(a.resolve(".:out").unwrap().node, b);
    assert_eq!(b.resolve(".").unwrap().node, b);
    assert_eq!(c.resolve("in.in").unwrap().node, a);
}

#[test]
fn resolution_is_stable() {
    let Fixture { graph, .. } = fixture();
    let (_, _, c) = chain(&graph);
    for _ in 0..50 {
        assert_eq!(graph.resolve("head:out.out").unwrap().node, c);
    }
}

#[test]
fn broken_paths_are_not_found() {
    let Fixture { graph, .. } = fixture();
    let (a, b, _) = chain(&graph);
    assert_eq!(graph.resolve("nosuch:").unwrap_err(), NgError::NotFound);
    assert_eq!(graph.resolve("head:nosuch").unwrap_err(), NgError::NotFound);
    assert_eq!(graph.resolve("[fffffff0]:").unwrap_err(), NgError::NotFound);

    request(&graph, &b, Message::shutdown()).unwrap();
    graph.wait_idle();
    assert_eq!(graph.resolve("head:out").unwrap_err(), NgError::NotFound);
    assert_eq!(a.resolve("out.out").unwrap_err(), NgError::NotFound);
    assert_eq!(
        graph.resolve(&format!("{}:", b.id())).unwrap_err(),
        NgError::NotFound
    );
}

#[test]
fn relative_paths_need_a_starting_node() {
    let Fixture { graph, .. } = fixture();
    chain(&graph);
    assert_eq!(graph.resolve("out").unwrap_err(), NgError::InvalidArgument);
    assert_eq!(graph.resolve(".:out").unwrap_err(), NgError::NotFound);
    assert_eq!(
        graph.resolve("head:out..out").unwrap_err(),
        NgError::InvalidArgument
    );
}

#[test]
fn concurrent_resolve_sees_the_node_or_nothing() {
    let Fixture { graph, .. } = fixture();
    let (_, b, _) = chain(&graph);
    let graph = Arc::new(graph);
    let barrier = Arc::new(Barrier::new(5));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let graph = Arc::clone(&graph);
            let barrier = Arc::clone(&barrier);
            let expected = b.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..500 {
                    match graph.resolve("head:out") {
                        Ok(found) => assert_eq!(found.node, expected),
                        Err(err) => assert_eq!(err, NgError::NotFound),
                    }
                }
            })
        })
        .collect();

    barrier.wait();
    b.remove_self().unwrap();
    for reader in readers {
        reader.join().expect("Thread panicked");
    }
    graph.wait_idle();
    assert_eq!(graph.resolve("head:out").unwrap_err(), NgError::NotFound);
}
