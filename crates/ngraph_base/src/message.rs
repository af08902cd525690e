//! Control-message envelope.
//!
//! A [`Message`] is a header (verb namespace cookie, command number and
//! name, flags, token) plus a typed [`Body`]. Responses mirror the request
//! header with [`MessageFlags::RESP`] set. Commands carrying
//! [`READONLY`] are applied under the reader lock; everything else takes
//! the writer lock.

use crate::error::NgError;
use crate::node::NodeId;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Cookie of the generic, type-independent verbs.
pub const GENERIC_COOKIE: u32 = 1_137_070_366;

/// Command bit selecting reader scheduling.
pub const READONLY: u32 = 0x1000_0000;

bitflags! {
    /// Message flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MessageFlags: u32 {
        /// This message is a response.
        const RESP = 1 << 0;
    }
}

/// The generic verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GenericCmd {
    /// Shut the node down.
    Shutdown = 1,
    /// Create a peer node and connect to it.
    MkPeer = 2,
    /// Connect to an existing node.
    Connect = 3,
    /// Name the node.
    Name = 4,
    /// Remove one hook.
    RmHook = 5,
    /// Describe the node.
    NodeInfo = 6 | READONLY,
    /// Describe the node and its hooks.
    ListHooks = 7 | READONLY,
    /// Describe every named node.
    ListNames = 8 | READONLY,
    /// Describe every node.
    ListNodes = 9 | READONLY,
    /// Describe every type.
    ListTypes = 10 | READONLY,
    /// Ask the node type for a status report.
    TextStatus = 11 | READONLY,
    /// Convert a binary message to its text form.
    Binary2Ascii = 12 | READONLY,
    /// Convert a text message to its binary form.
    Ascii2Binary = 13 | READONLY,
    /// Hand a configuration string to the node type.
    TextConfig = 14,
}

impl GenericCmd {
    const ALL: [Self; 14] = [
        Self::Shutdown,
        Self::MkPeer,
        Self::Connect,
        Self::Name,
        Self::RmHook,
        Self::NodeInfo,
        Self::ListHooks,
        Self::ListNames,
        Self::ListNodes,
        Self::ListTypes,
        Self::TextStatus,
        Self::Binary2Ascii,
        Self::Ascii2Binary,
        Self::TextConfig,
    ];

    /// Command number, including the read-only bit.
    #[must_use]
    pub fn number(self) -> u32 {
        self as u32
    }

    /// Decodes a command number.
    #[must_use]
    pub fn from_number(cmd: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.number() == cmd)
    }

    /// Command name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::MkPeer => "mkpeer",
            Self::Connect => "connect",
            Self::Name => "name",
            Self::RmHook => "rmhook",
            Self::NodeInfo => "nodeinfo",
            Self::ListHooks => "listhooks",
            Self::ListNames => "listnames",
            Self::ListNodes => "listnodes",
            Self::ListTypes => "listtypes",
            Self::TextStatus => "textstatus",
            Self::Binary2Ascii => "binary2ascii",
            Self::Ascii2Binary => "ascii2binary",
            Self::TextConfig => "textconfig",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arguments and snapshots
// ─────────────────────────────────────────────────────────────────────────────

/// Arguments of `mkpeer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkPeer {
    /// Type of the node to create.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Hook to add on the receiving node.
    pub ourhook: String,
    /// Hook to add on the new node.
    pub peerhook: String,
}

/// Arguments of `connect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connect {
    /// Path to the node to connect to, relative to the receiving node.
    pub path: String,
    /// Hook to add on the receiving node.
    pub ourhook: String,
    /// Hook to add on the remote node.
    pub peerhook: String,
}

/// Arguments of `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetName {
    /// New node name.
    pub name: String,
}

/// Arguments of `rmhook`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmHook {
    /// Hook to remove.
    pub ourhook: String,
}

/// Description of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node name, if named.
    pub name: Option<String>,
    /// Type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Node ID.
    pub id: NodeId,
    /// Number of hooks.
    pub hooks: u32,
}

/// Description of one edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfo {
    /// Local hook name.
    pub ourhook: String,
    /// Peer hook name.
    pub peerhook: String,
    /// The peer node.
    pub node: NodeInfo,
}

/// Response of `listhooks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookList {
    /// The node itself.
    pub node: NodeInfo,
    /// Its connected hooks.
    pub links: Vec<LinkInfo>,
}

/// Response of `listnodes` and `listnames`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameList {
    /// The nodes.
    pub nodes: Vec<NodeInfo>,
}

/// Description of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    /// Type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Number of live nodes of this type.
    pub num_nodes: u32,
}

/// Response of `listtypes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeList {
    /// The types.
    pub types: Vec<TypeInfo>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Message payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Body {
    /// No payload.
    #[default]
    Empty,
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// Text, used for text config/status and for the ASCII form of a message.
    Text(String),
    /// Structured payload of a type-specific command.
    Json(serde_json::Value),
    /// `mkpeer` arguments.
    MkPeer(MkPeer),
    /// `connect` arguments.
    Connect(Connect),
    /// `name` arguments.
    Name(SetName),
    /// `rmhook` arguments.
    RmHook(RmHook),
    /// `nodeinfo` response.
    NodeInfo(NodeInfo),
    /// `listhooks` response.
    HookList(HookList),
    /// `listnodes`/`listnames` response.
    NameList(NameList),
    /// `listtypes` response.
    TypeList(TypeList),
    /// A nested message (`ascii2binary`, `binary2ascii`).
    Message(Box<Message>),
    /// Error result delivered to a return address.
    Error(NgError),
}

/// Message header.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Verb namespace.
    pub typecookie: u32,
    /// Command number, including [`READONLY`] where it applies.
    pub cmd: u32,
    /// Command name, used by the text form.
    pub cmdstr: String,
    /// Flags.
    pub flags: MessageFlags,
    /// Sender-chosen token, copied into the response.
    pub token: u32,
}

/// A control message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Header.
    pub header: MessageHeader,
    /// Payload.
    pub body: Body,
}

impl Message {
    /// Creates a request in the given namespace.
    #[must_use]
    pub fn new(typecookie: u32, cmd: u32, body: Body) -> Self {
        Self {
            header: MessageHeader {
                typecookie,
                cmd,
                ..MessageHeader::default()
            },
            body,
        }
    }

    /// Creates a generic request.
    #[must_use]
    pub fn generic(cmd: GenericCmd, body: Body) -> Self {
        let mut msg = Self::new(GENERIC_COOKIE, cmd.number(), body);
        msg.header.cmdstr = cmd.name().to_string();
        msg
    }

    /// Builds the response to `request`.
    #[must_use]
    pub fn response_to(request: &MessageHeader, body: Body) -> Self {
        let mut header = request.clone();
        header.flags |= MessageFlags::RESP;
        Self { header, body }
    }

    /// Sets the token.
    #[must_use]
    pub fn with_token(mut self, token: u32) -> Self {
        self.header.token = token;
        self
    }

    /// Returns `true` for the generic namespace.
    #[must_use]
    pub fn is_generic(&self) -> bool {
        self.header.typecookie == GENERIC_COOKIE
    }

    /// Returns `true` for a response.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.header.flags.contains(MessageFlags::RESP)
    }

    /// Returns `true` if the command only reads node state.
    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.header.cmd & READONLY != 0
    }

    /// The generic verb, if this is a generic message.
    #[must_use]
    pub fn generic_cmd(&self) -> Option<GenericCmd> {
        if !self.is_generic() {
            return None;
        }
        GenericCmd::from_number(self.header.cmd)
    }

    /// The error carried by an error response.
    #[must_use]
    pub fn error(&self) -> Option<NgError> {
        match self.body {
            Body::Error(err) => Some(err),
            _ => None,
        }
    }

    /// `shutdown`.
    #[must_use]
    pub fn shutdown() -> Self {
        Self::generic(GenericCmd::Shutdown, Body::Empty)
    }

    /// `mkpeer`.
    #[must_use]
    pub fn mkpeer(type_name: &str, ourhook: &str, peerhook: &str) -> Self {
        Self::generic(
            GenericCmd::MkPeer,
            Body::MkPeer(MkPeer {
                type_name: type_name.to_string(),
                ourhook: ourhook.to_string(),
                peerhook: peerhook.to_string(),
            }),
        )
    }

    /// `connect`.
    #[must_use]
    pub fn connect(path: &str, ourhook: &str, peerhook: &str) -> Self {
        Self::generic(
            GenericCmd::Connect,
            Body::Connect(Connect {
                path: path.to_string(),
                ourhook: ourhook.to_string(),
                peerhook: peerhook.to_string(),
            }),
        )
    }

    /// `name`.
    #[must_use]
    pub fn name(name: &str) -> Self {
        Self::generic(
            GenericCmd::Name,
            Body::Name(SetName {
                name: name.to_string(),
            }),
        )
    }

    /// `rmhook`.
    #[must_use]
    pub fn rmhook(ourhook: &str) -> Self {
        Self::generic(
            GenericCmd::RmHook,
            Body::RmHook(RmHook {
                ourhook: ourhook.to_string(),
            }),
        )
    }

    /// `nodeinfo`.
    #[must_use]
    pub fn node_info() -> Self {
        Self::generic(GenericCmd::NodeInfo, Body::Empty)
    }

    /// `listhooks`.
    #[must_use]
    pub fn list_hooks() -> Self {
        Self::generic(GenericCmd::ListHooks, Body::Empty)
    }

    /// `listnodes`.
    #[must_use]
    pub fn list_nodes() -> Self {
        Self::generic(GenericCmd::ListNodes, Body::Empty)
    }

    /// `listnames`.
    #[must_use]
    pub fn list_names() -> Self {
        Self::generic(GenericCmd::ListNames, Body::Empty)
    }

    /// `listtypes`.
    #[must_use]
    pub fn list_types() -> Self {
        Self::generic(GenericCmd::ListTypes, Body::Empty)
    }

    /// `textstatus`.
    #[must_use]
    pub fn text_status() -> Self {
        Self::generic(GenericCmd::TextStatus, Body::Empty)
    }

    /// `textconfig`.
    #[must_use]
    pub fn text_config(config: &str) -> Self {
        Self::generic(GenericCmd::TextConfig, Body::Text(config.to_string()))
    }

    /// `binary2ascii` of `msg`.
    #[must_use]
    pub fn binary2ascii(msg: Message) -> Self {
        Self::generic(GenericCmd::Binary2Ascii, Body::Message(Box::new(msg)))
    }

    /// `ascii2binary` of command `cmdstr` with text arguments `args`.
    #[must_use]
    pub fn ascii2binary(cmdstr: &str, args: &str) -> Self {
        let mut inner = Self::new(0, 0, Body::Text(args.to_string()));
        inner.header.cmdstr = cmdstr.to_string();
        Self::generic(GenericCmd::Ascii2Binary, Body::Message(Box::new(inner)))
    }
}
