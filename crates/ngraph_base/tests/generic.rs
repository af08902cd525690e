//! The generic control verbs.


use ngraph_base::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use test_utils::{Fixture, fixture, fixture_with, hook_names, pair, request};

/// Waits out queued teardown, then returns the hook names of both nodes.
fn settled(graph: &Graph, a: &Node, b: &Node) -> (Vec<String>, Vec<String>) {
    graph.wait_idle();
    (hook_names(a), hook_names(b))
}

// ═══════════════════════════════════════════════════════════════════════════════
// MKPEER
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn mkpeer_creates_and_wires_a_peer() {
    let Fixture { graph, .. } = fixture();
    let a = graph.create_node("echo").unwrap();
    request(&graph, &a, Message::mkpeer("recorder", "out", "in")).unwrap();
    assert_eq!(graph.node_count(), 2);

    let reply = request(&graph, &a, Message::list_hooks()).unwrap();
    let Body::HookList(list) = reply.body else {
        panic!("unexpected body {:?}", reply.body);
    };
    assert_eq!(list.node.id, a.id());
    assert_eq!(list.node.hooks, 1);
    assert_eq!(list.links.len(), 1);
    let link = &list.links[0];
    assert_eq!(link.ourhook, "out");
    assert_eq!(link.peerhook, "in");
    assert_eq!(link.node.type_name, "recorder");
    assert_eq!(link.node.hooks, 1);
}

#[test]
fn failed_mkpeer_leaves_no_trace() {
    let Fixture { graph, veto, .. } = fixture();
    let a = graph.create_node("echo").unwrap();
    a.add_hook("taken").unwrap();

    let cases: [(&str, &str, Option<&AtomicBool>, NgError); 6] = [
        ("nosuch", "out", None, NgError::NotFound),
        ("noctor", "out", None, NgError::InvalidArgument),
        ("echo", "taken", None, NgError::AlreadyExists),
        ("veto", "out", Some(&veto.constructor), NgError::PermissionDenied),
        ("veto", "out", Some(&veto.newhook), NgError::PermissionDenied),
        ("veto", "out", Some(&veto.connect), NgError::PermissionDenied),
    ];
    for (type_name, ourhook, flag, expected) in cases {
        if let Some(flag) = flag {
            flag.store(true, Ordering::SeqCst);
        }
        let result = request(&graph, &a, Message::mkpeer(type_name, ourhook, "in"));
        assert_eq!(result, Err(expected), "{type_name}/{ourhook}");
        if let Some(flag) = flag {
            flag.store(false, Ordering::SeqCst);
        }
        graph.wait_idle();
        assert_eq!(graph.node_count(), 1, "{type_name}/{ourhook}");
        assert_eq!(hook_names(&a), ["taken"], "{type_name}/{ourhook}");
    }
}

#[test]
fn mkpeer_rejects_malformed_hook_names() {
    let Fixture { graph, .. } = fixture();
    let a = graph.create_node("echo").unwrap();
    assert_eq!(
        request(&graph, &a, Message::mkpeer("echo", "a.b", "in")),
        Err(NgError::InvalidArgument)
    );
    assert_eq!(
        request(&graph, &a, Message::mkpeer("echo", "out", "")),
        Err(NgError::InvalidArgument)
    );
    assert_eq!(graph.node_count(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONNECT
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn connect_by_name_links_both_nodes() {
    let Fixture { graph, .. } = fixture();
    let a = graph.create_node("echo").unwrap();
    let b = graph.create_node("echo").unwrap();
    b.set_name("b").unwrap();

    request(&graph, &a, Message::connect("b:", "out", "in")).unwrap();
    // Answered only once both ends are live.
    let ours = a.find_hook("out").unwrap();
    let theirs = b.find_hook("in").unwrap();
    assert_eq!(ours.peer(), theirs);
    assert_eq!(theirs.peer(), ours);
    assert!(ours.is_valid() && theirs.is_valid());
}

#[test]
fn connect_follows_relative_paths() {
    let Fixture { graph, .. } = fixture();
    let (a, b) = pair(&graph, "echo", "echo");
    request(&graph, &a, Message::connect("out", "loop", "back")).unwrap();
    assert_eq!(hook_names(&a), ["loop", "out"]);
    assert_eq!(hook_names(&b), ["back", "in"]);
    assert_eq!(a.find_hook("loop").unwrap().peer_node(), b);
}

#[test]
fn failed_connect_tears_both_ends_down() {
    let Fixture { graph, veto, .. } = fixture();

    // Path does not resolve.
    let a = graph.create_node("echo").unwrap();
    assert_eq!(
        request(&graph, &a, Message::connect("nosuch:", "out", "in")),
        Err(NgError::NotFound)
    );
    assert!(hook_names(&a).is_empty());

    // Remote already has the hook, even unconnected.
    let b = graph.create_node("echo").unwrap();
    b.set_name("b").unwrap();
    b.add_hook("in").unwrap();
    assert_eq!(
        request(&graph, &a, Message::connect("b:", "out", "in")),
        Err(NgError::AlreadyExists)
    );
    assert_eq!(settled(&graph, &a, &b), (vec![], vec!["in".to_string()]));

    // Remote vetoes the hook, then the connection.
    let r = graph.create_node("veto").unwrap();
    r.set_name("r").unwrap();
    for flag in [&veto.newhook, &veto.connect] {
        flag.store(true, Ordering::SeqCst);
        assert_eq!(
            request(&graph, &a, Message::connect("r:", "out", "in")),
            Err(NgError::PermissionDenied)
        );
        flag.store(false, Ordering::SeqCst);
        assert_eq!(settled(&graph, &a, &r), (vec![], vec![]));
    }

    // We veto the connection in the last step.
    let l = graph.create_node("veto").unwrap();
    veto.connect.store(true, Ordering::SeqCst);
    assert_eq!(
        request(&graph, &l, Message::connect("b:", "out", "other")),
        Err(NgError::PermissionDenied)
    );
    veto.connect.store(false, Ordering::SeqCst);
    assert_eq!(settled(&graph, &l, &b), (vec![], vec!["in".to_string()]));

    // Nothing leaked along the way.
    assert_eq!(graph.stats().items_outstanding, 0);
    assert!(a.is_valid() && b.is_valid() && r.is_valid() && l.is_valid());
}

/// While armed, tears a hook down from inside its own `connect` callback:
/// the far end, or the hook itself when `own_end` is set.
#[derive(Default)]
struct Sever {
    armed: AtomicBool,
    own_end: AtomicBool,
}

impl NodeType for Sever {
    fn name(&self) -> &str {
        "sever"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::CONSTRUCTOR | Capabilities::CONNECT
    }

    fn connect(&self, hook: &Hook) -> Result<()> {
        if self.armed.load(Ordering::SeqCst) {
            if self.own_end.load(Ordering::SeqCst) {
                hook.destroy();
            } else {
                hook.peer().destroy();
            }
        }
        Ok(())
    }
}

#[test]
fn connect_unwinds_when_an_end_goes_mid_handshake() {
    let Fixture { graph, .. } = fixture();
    let sever = Arc::new(Sever::default());
    graph
        .register_type(Arc::clone(&sever) as Arc<dyn NodeType>)
        .unwrap();
    let a = graph.create_node("echo").unwrap();
    let s = graph.create_node("sever").unwrap();
    s.set_name("s").unwrap();

    sever.armed.store(true, Ordering::SeqCst);
    for own_end in [false, true] {
        sever.own_end.store(own_end, Ordering::SeqCst);
        assert_eq!(
            request(&graph, &a, Message::connect("s:", "out", "in")),
            Err(NgError::NotFound),
            "own_end = {own_end}"
        );
        assert_eq!(settled(&graph, &a, &s), (vec![], vec![]), "own_end = {own_end}");
    }

    // The names are free again.
    sever.armed.store(false, Ordering::SeqCst);
    request(&graph, &a, Message::connect("s:", "out", "in")).unwrap();
    assert_eq!(
        settled(&graph, &a, &s),
        (vec!["out".to_string()], vec!["in".to_string()])
    );
    assert_eq!(graph.stats().items_outstanding, 0);
}

#[test]
fn connect_unwinds_when_our_end_goes_before_the_remote_step() {
    let Fixture { graph, .. } = fixture_with(GraphConfig::new().with_workers(1));
    let a = graph.create_node("echo").unwrap();
    let b = graph.create_node("echo").unwrap();
    b.set_name("b").unwrap();

    // Hold the only worker so the next items queue up in order.
    let (started_tx, started_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    a.send_fn(None, move |_, _| {
        started_tx.send(()).unwrap();
        gate_rx.recv().unwrap();
    })
    .unwrap();
    started_rx.recv().unwrap();

    let pending = graph
        .send_msg(&a, Message::connect("b:", "out", "in"))
        .unwrap();
    // Runs after the first step and before the remote one.
    a.send_fn(None, |node, _| {
        for hook in node.hooks() {
            hook.destroy();
        }
    })
    .unwrap();
    gate_tx.send(()).unwrap();

    assert_eq!(pending.wait(), Err(NgError::NotFound));
    assert_eq!(settled(&graph, &a, &b), (vec![], vec![]));
    assert_eq!(graph.stats().items_outstanding, 0);

    request(&graph, &a, Message::connect("b:", "out", "in")).unwrap();
    assert_eq!(hook_names(&b), ["in"]);
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAME AND RMHOOK
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn name_verb_names_the_node() {
    let Fixture { graph, .. } = fixture();
    let a = graph.create_node("echo").unwrap();
    let b = graph.create_node("echo").unwrap();
    request(&graph, &a, Message::name("alpha")).unwrap();
    assert_eq!(a.name().as_deref(), Some("alpha"));
    assert_eq!(
        request(&graph, &b, Message::name("alpha")),
        Err(NgError::AlreadyExists)
    );
    assert_eq!(
        request(&graph, &b, Message::name("bad.name")),
        Err(NgError::InvalidArgument)
    );
    assert!(b.name().is_none());
}

#[test]
fn rmhook_of_a_missing_hook_is_accepted() {
    let Fixture { graph, .. } = fixture();
    let a = graph.create_node("echo").unwrap();
    let ack = request(&graph, &a, Message::rmhook("nosuch")).unwrap();
    assert_eq!(ack.body, Body::Empty);
}

#[test]
fn rmhook_removes_unconnected_hooks_too() {
    let Fixture { graph, .. } = fixture();
    let a = graph.create_node("echo").unwrap();
    a.add_hook("dangling").unwrap();
    request(&graph, &a, Message::rmhook("dangling")).unwrap();
    assert_eq!(a.num_hooks(), 0);
}

// ═══════════════════════════════════════════════════════════════════════════════
// SNAPSHOTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn nodeinfo_describes_the_node() {
    let Fixture { graph, .. } = fixture();
    let (a, _) = pair(&graph, "echo", "echo");
    a.set_name("head").unwrap();
    let reply = request(&graph, "head:", Message::node_info()).unwrap();
    assert_eq!(
        reply.body,
        Body::NodeInfo(NodeInfo {
            name: Some("head".into()),
            type_name: "echo".into(),
            id: a.id(),
            hooks: 1,
        })
    );
}

#[test]
fn listnodes_skips_nodes_that_are_going_away() {
    let Fixture { graph, .. } = fixture();
    let nodes: Vec<Node> = (0..6).map(|_| graph.create_node("echo").unwrap()).collect();
    for node in &nodes[..2] {
        request(&graph, node, Message::shutdown()).unwrap();
    }
    graph.wait_idle();
    // Still registered, since we hold them, but no longer valid.
    assert_eq!(graph.node_count(), 6);

    let reply = request(&graph, &nodes[2], Message::list_nodes()).unwrap();
    let Body::NameList(list) = reply.body else {
        panic!("unexpected body {:?}", reply.body);
    };
    let listed: HashSet<NodeId> = list.nodes.iter().map(|n| n.id).collect();
    let valid: HashSet<NodeId> = nodes[2..].iter().map(Node::id).collect();
    assert_eq!(listed, valid);
}

#[test]
fn listnames_lists_only_named_nodes() {
    let Fixture { graph, .. } = fixture();
    let nodes: Vec<Node> = (0..4).map(|_| graph.create_node("echo").unwrap()).collect();
    nodes[1].set_name("one").unwrap();
    nodes[3].set_name("three").unwrap();

    let reply = request(&graph, &nodes[0], Message::list_names()).unwrap();
    let Body::NameList(list) = reply.body else {
        panic!("unexpected body {:?}", reply.body);
    };
    let mut names: Vec<String> = list.nodes.into_iter().filter_map(|n| n.name).collect();
    names.sort();
    assert_eq!(names, ["one", "three"]);
}

#[test]
fn listtypes_counts_live_nodes() {
    let Fixture { graph, .. } = fixture();
    let (a, _) = pair(&graph, "echo", "recorder");
    let _extra = graph.create_node("echo").unwrap();

    let reply = request(&graph, &a, Message::list_types()).unwrap();
    let Body::TypeList(list) = reply.body else {
        panic!("unexpected body {:?}", reply.body);
    };
    let count = |name: &str| {
        list.types
            .iter()
            .find(|t| t.type_name == name)
            .map(|t| t.num_nodes)
    };
    assert_eq!(list.types.len(), 5);
    assert_eq!(count("echo"), Some(2));
    assert_eq!(count("recorder"), Some(1));
    assert_eq!(count("veto"), Some(0));
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEXT CONFIG AND STATUS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn text_verbs_go_to_the_type() {
    let Fixture { graph, .. } = fixture();
    let rec = graph.create_node("recorder").unwrap();
    let echo = graph.create_node("echo").unwrap();

    let status = request(&graph, &rec, Message::text_status()).unwrap();
    assert_eq!(status.body, Body::Text(format!("{} ok", rec.id())));
    let config = request(&graph, &rec, Message::text_config("rate=3")).unwrap();
    assert_eq!(config.body, Body::Text("rate=3".into()));

    assert_eq!(
        request(&graph, &echo, Message::text_status()),
        Err(NgError::InvalidArgument)
    );
    assert_eq!(
        request(&graph, &echo, Message::text_config("x")),
        Err(NgError::InvalidArgument)
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEXT CONVERSION
// ═══════════════════════════════════════════════════════════════════════════════

const METER_COOKIE: u32 = 0x4d45_5452;
const SET_RATE: u32 = 1;
const GET_RATE: u32 = 2 | READONLY;

static METER_COMMANDS: [CommandInfo; 2] = [
    CommandInfo::new(METER_COOKIE, SET_RATE, "setrate", ArgType::Json, ArgType::None),
    CommandInfo::new(METER_COOKIE, GET_RATE, "getrate", ArgType::None, ArgType::Json),
];

/// Stores a rate set through its own command namespace.
struct Meter;

impl NodeType for Meter {
    fn name(&self) -> &str {
        "meter"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::CONSTRUCTOR | Capabilities::RCVMSG
    }

    fn rcvmsg(
        &self,
        node: &Node,
        msg: Message,
        reply: &mut Responder,
        _lasthook: Option<&Hook>,
    ) -> Result<()> {
        match (msg.header.typecookie, msg.header.cmd, msg.body) {
            (METER_COOKIE, SET_RATE, Body::Json(value)) => {
                node.set_private(value);
                Ok(())
            }
            (METER_COOKIE, GET_RATE, _) => {
                let value = node
                    .private::<serde_json::Value>()
                    .map(|v| (*v).clone())
                    .unwrap_or_default();
                reply.respond(Body::Json(value))
            }
            _ => Err(NgError::InvalidArgument),
        }
    }

    fn commands(&self) -> &[CommandInfo] {
        &METER_COMMANDS
    }
}

fn converted(reply: Message) -> Message {
    match reply.body {
        Body::Message(inner) => *inner,
        other => panic!("unexpected body {other:?}"),
    }
}

#[test]
fn ascii2binary_parses_generic_verbs() {
    let Fixture { graph, .. } = fixture();
    let a = graph.create_node("echo").unwrap();
    let reply = request(
        &graph,
        &a,
        Message::ascii2binary("mkpeer", r#"{"type":"echo","ourhook":"x","peerhook":"y"}"#),
    )
    .unwrap();
    let binary = converted(reply);
    assert_eq!(binary, Message::mkpeer("echo", "x", "y"));

    // The parsed message is ready to send.
    request(&graph, &a, binary).unwrap();
    assert_eq!(hook_names(&a), ["x"]);
}

#[test]
fn binary2ascii_renders_requests_and_responses() {
    let Fixture { graph, .. } = fixture();
    let a = graph.create_node("echo").unwrap();

    let ascii = converted(request(&graph, &a, Message::binary2ascii(Message::name("foo"))).unwrap());
    assert_eq!(ascii.header.cmdstr, "name");
    assert_eq!(ascii.body, Body::Text(r#"{"name":"foo"}"#.into()));

    let info = request(&graph, &a, Message::node_info()).unwrap();
    let ascii = converted(request(&graph, &a, Message::binary2ascii(info)).unwrap());
    assert!(ascii.is_response());
    let Body::Text(text) = ascii.body else {
        panic!("unexpected body {:?}", ascii.body);
    };
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["type"], "echo");
    assert_eq!(parsed["hooks"], 0);
}

#[test]
fn type_commands_use_the_type_table() {
    let Fixture { graph, .. } = fixture();
    graph.register_type(Arc::new(Meter)).unwrap();
    let m = graph.create_node("meter").unwrap();

    let set = converted(
        request(&graph, &m, Message::ascii2binary("setrate", r#"{"rate":5}"#)).unwrap(),
    );
    assert_eq!(set.header.typecookie, METER_COOKIE);
    assert_eq!(set.header.cmd, SET_RATE);
    assert_eq!(set.body, Body::Json(json!({"rate": 5})));
    request(&graph, &m, set).unwrap();

    let get = converted(request(&graph, &m, Message::ascii2binary("getrate", "")).unwrap());
    assert!(get.is_readonly());
    let rate = request(&graph, &m, get).unwrap();
    assert_eq!(rate.body, Body::Json(json!({"rate": 5})));

    let text = converted(request(&graph, &m, Message::binary2ascii(rate)).unwrap());
    assert_eq!(text.header.cmdstr, "getrate");
    assert_eq!(text.body, Body::Text(r#"{"rate":5}"#.into()));

    // Other types do not know the meter's commands.
    let echo = graph.create_node("echo").unwrap();
    assert_eq!(
        request(&graph, &echo, Message::ascii2binary("setrate", "{}")),
        Err(NgError::Unsupported)
    );
}

#[test]
fn conversion_rejects_unknown_or_malformed_input() {
    let Fixture { graph, .. } = fixture();
    let a = graph.create_node("echo").unwrap();
    assert_eq!(
        request(&graph, &a, Message::ascii2binary("frobnicate", "")),
        Err(NgError::Unsupported)
    );
    assert_eq!(
        request(&graph, &a, Message::ascii2binary("name", "not json")),
        Err(NgError::InvalidArgument)
    );
    assert_eq!(
        request(
            &graph,
            &a,
            Message::binary2ascii(Message::new(0x1234, 1, Body::Empty))
        ),
        Err(NgError::Unsupported)
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// MALFORMED REQUESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn malformed_generic_requests_are_rejected() {
    let Fixture { graph, .. } = fixture();
    let a = graph.create_node("echo").unwrap();
    for msg in [
        Message::generic(GenericCmd::MkPeer, Body::Empty),
        Message::generic(GenericCmd::Connect, Body::Text("b:".into())),
        Message::generic(GenericCmd::Name, Body::Empty),
        Message::generic(GenericCmd::RmHook, Body::Empty),
        Message::generic(GenericCmd::Binary2Ascii, Body::Empty),
        Message::new(GENERIC_COOKIE, 99, Body::Empty),
    ] {
        let cmd = msg.header.cmd;
        assert_eq!(request(&graph, &a, msg), Err(NgError::InvalidArgument), "{cmd}");
    }
    assert_eq!(a.num_hooks(), 0);
    assert!(a.is_valid());
}

#[test]
fn generic_verbs_to_an_invalid_node_fail() {
    let Fixture { graph, .. } = fixture();
    let a = graph.create_node("echo").unwrap();
    a.set_name("gone").unwrap();
    request(&graph, &a, Message::shutdown()).unwrap();
    graph.wait_idle();
    for msg in [Message::node_info(), Message::mkpeer("echo", "o", "i")] {
        assert_eq!(request(&graph, &a, msg), Err(NgError::Invalid));
    }
    // And the name no longer resolves.
    assert_eq!(
        request(&graph, "gone:", Message::node_info()),
        Err(NgError::NotFound)
    );
}
