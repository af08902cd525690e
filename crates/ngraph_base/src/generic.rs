//! Type-independent control verbs.
//!
//! Every message in the generic namespace that is not a response lands
//! here, under the receiving node's lock. Read-only verbs run under the
//! reader lock and only take snapshots; the others run as writers.
//!
//! `connect` is the one verb that touches two nodes. It runs as a chain
//! of three steps, each on its own node and under that node's writer lock
//! only:
//!
//! 1. here: resolve the path, add our hook, pair it with a detached hook
//!    for the remote end;
//! 2. remote: adopt the detached hook and run the remote `connect` veto;
//! 3. here: run our `connect` veto and mark both hooks valid.
//!
//! Each step first checks that the other end has not been torn down in
//! the meantime. The caller is answered once the chain is over, and any
//! failure tears both hooks down again.

use crate::codec::{self, CommandInfo, GENERIC_COMMANDS, JsonCodec, MessageCodec};
use crate::dispatch;
use crate::error::{NgError, Result};
use crate::hook::{Hook, validate_hook_name};
use crate::item::{Item, Payload};
use crate::message::{
    Body, Connect, GenericCmd, HookList, LinkInfo, Message, MessageHeader, MkPeer, NameList,
    TypeList,
};
use crate::node::Node;
use crate::path;
use crate::reply::Responder;
use crate::types::Capabilities;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

static JSON: JsonCodec = JsonCodec;

/// Handles one generic request addressed to `node`.
pub(crate) fn handle(
    node: &Node,
    msg: Message,
    reply: &mut Responder,
    lasthook: Option<&Hook>,
) -> Result<()> {
    let Some(cmd) = msg.generic_cmd() else {
        debug!(node = %node.id(), cmd = msg.header.cmd, "unknown generic command");
        return Err(NgError::InvalidArgument);
    };
    trace!(node = %node.id(), cmd = cmd.name(), "generic command");
    match cmd {
        GenericCmd::Shutdown => {
            node.shutdown();
            Ok(())
        }
        GenericCmd::MkPeer => {
            let Body::MkPeer(args) = msg.body else {
                return Err(NgError::InvalidArgument);
            };
            mkpeer(node, &args)
        }
        GenericCmd::Connect => {
            let Body::Connect(args) = msg.body else {
                return Err(NgError::InvalidArgument);
            };
            connect(node, &args, reply)
        }
        GenericCmd::Name => {
            let Body::Name(args) = msg.body else {
                return Err(NgError::InvalidArgument);
            };
            node.set_name(&args.name)
        }
        GenericCmd::RmHook => {
            let Body::RmHook(args) = msg.body else {
                return Err(NgError::InvalidArgument);
            };
            if let Some(hook) = node
                .find_hook(&args.ourhook)
                .or_else(|| node.hook_named(&args.ourhook))
            {
                hook.destroy();
            }
            Ok(())
        }
        GenericCmd::NodeInfo => reply.respond(Body::NodeInfo(node.info())),
        GenericCmd::ListHooks => reply.respond(Body::HookList(list_hooks(node))),
        GenericCmd::ListNames => reply.respond(Body::NameList(list_nodes(node, true)?)),
        GenericCmd::ListNodes => reply.respond(Body::NameList(list_nodes(node, false)?)),
        GenericCmd::ListTypes => {
            let types = node.core()?.types().snapshot();
            reply.respond(Body::TypeList(TypeList { types }))
        }
        GenericCmd::TextConfig | GenericCmd::TextStatus => {
            let ty = Arc::clone(node.type_entry());
            if !ty.has(Capabilities::RCVMSG) {
                return Err(NgError::InvalidArgument);
            }
            ty.ops().rcvmsg(node, msg, reply, lasthook)
        }
        GenericCmd::Binary2Ascii => {
            let Body::Message(binary) = msg.body else {
                return Err(NgError::InvalidArgument);
            };
            let ascii = binary2ascii(node, *binary)?;
            reply.respond(Body::Message(Box::new(ascii)))
        }
        GenericCmd::Ascii2Binary => {
            let Body::Message(ascii) = msg.body else {
                return Err(NgError::InvalidArgument);
            };
            let binary = ascii2binary(node, *ascii)?;
            reply.respond(Body::Message(Box::new(binary)))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// mkpeer
// ─────────────────────────────────────────────────────────────────────────────

/// Shuts down a node created by a failed `mkpeer`, ignoring persistence.
fn discard(node: &Node) {
    node.set_really_die();
    node.shutdown();
}

fn mkpeer(here: &Node, args: &MkPeer) -> Result<()> {
    let core = Arc::clone(here.core()?);
    validate_hook_name(&args.ourhook)?;
    validate_hook_name(&args.peerhook)?;
    let peer = core.create_node(&args.type_name)?;

    let ours = match here.add_hook(&args.ourhook) {
        Ok(hook) => hook,
        Err(err) => {
            discard(&peer);
            return Err(err);
        }
    };
    let theirs = match peer.add_hook(&args.peerhook) {
        Ok(hook) => hook,
        Err(err) => {
            ours.destroy();
            discard(&peer);
            return Err(err);
        }
    };
    if let Err(err) = ours.connect(&theirs) {
        discard(&peer);
        return Err(err);
    }
    debug!(
        node = %here.id(), hook = %args.ourhook,
        peer_node = %peer.id(), peer = %args.peerhook,
        type_name = %args.type_name, "peer created"
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// connect
// ─────────────────────────────────────────────────────────────────────────────

fn connect(here: &Node, args: &Connect, reply: &mut Responder) -> Result<()> {
    let core = Arc::clone(here.core()?);
    validate_hook_name(&args.ourhook)?;
    validate_hook_name(&args.peerhook)?;
    let remote = path::resolve(&core, Some(here), &args.path)?.node;
    if remote.hook_named(&args.peerhook).is_some() {
        return Err(NgError::AlreadyExists);
    }

    let ours = here.add_hook(&args.ourhook)?;
    let theirs = Hook::new_detached(&core, &args.peerhook);
    let mut item = match ours
        .link(&theirs)
        .and_then(|()| Item::new(&core, Payload::Reuse(Box::new(connect_remote))))
    {
        Ok(item) => item,
        Err(err) => {
            ours.destroy();
            return Err(err);
        }
    };

    let responder = reply.take();
    let unwind = [ours.clone(), theirs.clone()];
    item.on_complete(move |result| {
        if result.is_err() {
            for hook in &unwind {
                if let Err(err) = hook.remove_self() {
                    warn!(hook = hook.name(), %err, "could not queue connect unwind");
                    hook.destroy();
                }
            }
        }
        responder.finish(&result);
    });
    dispatch::submit(item.addressed(remote, Some(theirs)))
}

/// Second step, on the remote node: adopt the detached hook.
fn connect_remote(remote: &Node, item: Item, theirs: Option<Hook>) -> Result<()> {
    let theirs = theirs.ok_or(NgError::InvalidArgument)?;
    let Some(ours) = theirs.peer_opt() else {
        // Our end was torn down before we got here.
        return Err(NgError::NotFound);
    };
    theirs.attach_node(remote.clone());
    if let Err(err) = remote.accept_hook(&theirs).and_then(|()| theirs.run_connect()) {
        theirs.destroy();
        return Err(err);
    }
    // Our end may have gone while the hook was still detached; its
    // teardown could not reach the remote then.
    let home = ours.node();
    if home.is_dead() || !theirs.is_paired_with(&ours) {
        theirs.destroy();
        return Err(NgError::NotFound);
    }
    if let Err(err) = item.continue_with(&home, Some(&ours), connect_finish) {
        theirs.destroy();
        return Err(err);
    }
    Ok(())
}

/// Last step, back on the originating node.
fn connect_finish(here: &Node, item: Item, ours: Option<Hook>) -> Result<()> {
    let ours = ours.ok_or(NgError::InvalidArgument)?;
    let Some(theirs) = ours.peer_opt().filter(|_| !ours.node().is_dead()) else {
        ours.destroy();
        return Err(NgError::NotFound);
    };
    if let Err(err) = ours.run_connect().and_then(|()| ours.validate_pair(&theirs)) {
        ours.destroy();
        return Err(err);
    }
    debug!(
        node = %here.id(), hook = ours.name(),
        peer_node = %theirs.node().id(), peer = theirs.name(),
        "nodes connected"
    );
    drop(item);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshots
// ─────────────────────────────────────────────────────────────────────────────

fn list_hooks(node: &Node) -> HookList {
    let expected = node.num_hooks();
    let hooks = node.hooks();
    if hooks.len() > expected {
        error!(node = %node.id(), expected, found = hooks.len(), "hook count changed during listhooks");
    }
    let links = hooks
        .iter()
        .take(expected)
        .filter(|hook| hook.is_valid())
        .filter_map(|hook| {
            let peer = hook.peer();
            let peer_node = peer.node();
            (peer.is_valid() && peer_node.is_valid()).then(|| LinkInfo {
                ourhook: hook.name().to_string(),
                peerhook: peer.name().to_string(),
                node: peer_node.info(),
            })
        })
        .collect();
    HookList {
        node: node.info(),
        links,
    }
}

fn list_nodes(node: &Node, named_only: bool) -> Result<NameList> {
    let registries = node.core()?.registries();
    let limit = if named_only {
        registries.name_count()
    } else {
        registries.id_count()
    };
    let nodes = registries
        .snapshot(limit, named_only)
        .iter()
        .map(Node::info)
        .collect();
    Ok(NameList { nodes })
}

// ─────────────────────────────────────────────────────────────────────────────
// Text conversion
// ─────────────────────────────────────────────────────────────────────────────

/// The command and codec for a message: the node type's own commands
/// first, then the generic verbs.
fn lookup<'a>(
    node: &'a Node,
    find: impl Fn(&'a [CommandInfo]) -> Option<&'a CommandInfo>,
) -> Result<(CommandInfo, &'a dyn MessageCodec)> {
    let json: &dyn MessageCodec = &JSON;
    let ty = node.node_type();
    if let Some(info) = find(ty.commands()) {
        return Ok((*info, ty.codec().unwrap_or(json)));
    }
    if let Some(info) = find(GENERIC_COMMANDS.as_slice()) {
        return Ok((*info, json));
    }
    Err(NgError::Unsupported)
}

fn binary2ascii(node: &Node, binary: Message) -> Result<Message> {
    let (cookie, cmd) = (binary.header.typecookie, binary.header.cmd);
    let (info, codec) = lookup(node, |list| codec::find_command(list, cookie, cmd))?;
    let text = codec.unparse(info.arg_type(binary.is_response()), &binary.body)?;
    let mut header = binary.header;
    header.cmdstr = info.name.to_string();
    Ok(Message {
        header,
        body: Body::Text(text),
    })
}

fn ascii2binary(node: &Node, ascii: Message) -> Result<Message> {
    let args = match &ascii.body {
        Body::Text(text) => text.as_str(),
        Body::Empty => "",
        _ => return Err(NgError::InvalidArgument),
    };
    let name = ascii.header.cmdstr.as_str();
    let (info, codec) = lookup(node, |list| codec::find_command_named(list, name))?;
    let body = codec.parse(info.mesg_type, args)?;
    Ok(Message {
        header: MessageHeader {
            typecookie: info.cookie,
            cmd: info.cmd,
            cmdstr: info.name.to_string(),
            flags: ascii.header.flags,
            token: ascii.header.token,
        },
        body,
    })
}
