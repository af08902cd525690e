//! Text form of control messages.
//!
//! Each command is described by a [`CommandInfo`]: its namespace cookie,
//! number, name and the shape of its request and response bodies. Node
//! types publish their own lists through [`NodeType::commands`]; the
//! generic verbs are listed in [`GENERIC_COMMANDS`]. A [`MessageCodec`]
//! turns a body of a given [`ArgType`] into text and back. Types that do
//! not supply one get [`JsonCodec`].
//!
//! [`NodeType::commands`]: crate::types::NodeType::commands

use crate::error::{NgError, Result};
use crate::message::{
    Body, Connect, GENERIC_COOKIE, GenericCmd, HookList, MkPeer, NameList, NodeInfo, RmHook,
    SetName, TypeList,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Shape of a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgType {
    /// No body.
    None,
    /// Free text.
    Text,
    /// Opaque bytes.
    Bytes,
    /// Arbitrary structured data.
    Json,
    /// `mkpeer` arguments.
    MkPeer,
    /// `connect` arguments.
    Connect,
    /// `name` arguments.
    Name,
    /// `rmhook` arguments.
    RmHook,
    /// A node description.
    NodeInfo,
    /// A node and its links.
    HookList,
    /// A list of nodes.
    NameList,
    /// A list of types.
    TypeList,
}

/// Description of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandInfo {
    /// Namespace cookie.
    pub cookie: u32,
    /// Command number.
    pub cmd: u32,
    /// Command name.
    pub name: &'static str,
    /// Body of a request.
    pub mesg_type: ArgType,
    /// Body of a response.
    pub resp_type: ArgType,
}

impl CommandInfo {
    /// Describes a command.
    #[must_use]
    pub const fn new(
        cookie: u32,
        cmd: u32,
        name: &'static str,
        mesg_type: ArgType,
        resp_type: ArgType,
    ) -> Self {
        Self {
            cookie,
            cmd,
            name,
            mesg_type,
            resp_type,
        }
    }

    /// Body shape of a request, or of a response when `response` is set.
    #[must_use]
    pub fn arg_type(&self, response: bool) -> ArgType {
        if response {
            self.resp_type
        } else {
            self.mesg_type
        }
    }
}

const fn generic(cmd: GenericCmd, name: &'static str, mesg: ArgType, resp: ArgType) -> CommandInfo {
    CommandInfo::new(GENERIC_COOKIE, cmd as u32, name, mesg, resp)
}

/// The generic verbs.
pub static GENERIC_COMMANDS: [CommandInfo; 14] = [
    generic(GenericCmd::Shutdown, "shutdown", ArgType::None, ArgType::None),
    generic(GenericCmd::MkPeer, "mkpeer", ArgType::MkPeer, ArgType::None),
    generic(GenericCmd::Connect, "connect", ArgType::Connect, ArgType::None),
    generic(GenericCmd::Name, "name", ArgType::Name, ArgType::None),
    generic(GenericCmd::RmHook, "rmhook", ArgType::RmHook, ArgType::None),
    generic(GenericCmd::NodeInfo, "nodeinfo", ArgType::None, ArgType::NodeInfo),
    generic(GenericCmd::ListHooks, "listhooks", ArgType::None, ArgType::HookList),
    generic(GenericCmd::ListNames, "listnames", ArgType::None, ArgType::NameList),
    generic(GenericCmd::ListNodes, "listnodes", ArgType::None, ArgType::NameList),
    generic(GenericCmd::ListTypes, "listtypes", ArgType::None, ArgType::TypeList),
    generic(GenericCmd::TextStatus, "textstatus", ArgType::None, ArgType::Text),
    generic(GenericCmd::Binary2Ascii, "binary2ascii", ArgType::None, ArgType::None),
    generic(GenericCmd::Ascii2Binary, "ascii2binary", ArgType::None, ArgType::None),
    generic(GenericCmd::TextConfig, "textconfig", ArgType::Text, ArgType::Text),
];

/// Finds a command by cookie and number.
#[must_use]
pub fn find_command(list: &[CommandInfo], cookie: u32, cmd: u32) -> Option<&CommandInfo> {
    list.iter().find(|c| c.cookie == cookie && c.cmd == cmd)
}

/// Finds a command by name.
#[must_use]
pub fn find_command_named<'a>(list: &'a [CommandInfo], name: &str) -> Option<&'a CommandInfo> {
    list.iter().find(|c| c.name == name)
}

// ─────────────────────────────────────────────────────────────────────────────
// Codecs
// ─────────────────────────────────────────────────────────────────────────────

/// Converts message bodies to and from text.
pub trait MessageCodec: Send + Sync {
    /// Parses the text form of a body of shape `ty`.
    fn parse(&self, ty: ArgType, text: &str) -> Result<Body>;

    /// Renders a body of shape `ty` as text.
    fn unparse(&self, ty: ArgType, body: &Body) -> Result<String>;
}

/// Text form as JSON, with `None` bodies as the empty string and `Text`
/// bodies verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|err| {
        debug!(%err, "malformed message text");
        NgError::InvalidArgument
    })
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|err| {
        debug!(%err, "message body could not be rendered");
        NgError::InvalidArgument
    })
}

impl MessageCodec for JsonCodec {
    fn parse(&self, ty: ArgType, text: &str) -> Result<Body> {
        Ok(match ty {
            ArgType::None if text.trim().is_empty() => Body::Empty,
            ArgType::None => return Err(NgError::InvalidArgument),
            ArgType::Text => Body::Text(text.to_string()),
            ArgType::Bytes => Body::Bytes(decode(text)?),
            ArgType::Json => Body::Json(decode(text)?),
            ArgType::MkPeer => Body::MkPeer(decode::<MkPeer>(text)?),
            ArgType::Connect => Body::Connect(decode::<Connect>(text)?),
            ArgType::Name => Body::Name(decode::<SetName>(text)?),
            ArgType::RmHook => Body::RmHook(decode::<RmHook>(text)?),
            ArgType::NodeInfo => Body::NodeInfo(decode::<NodeInfo>(text)?),
            ArgType::HookList => Body::HookList(decode::<HookList>(text)?),
            ArgType::NameList => Body::NameList(decode::<NameList>(text)?),
            ArgType::TypeList => Body::TypeList(decode::<TypeList>(text)?),
        })
    }

    fn unparse(&self, ty: ArgType, body: &Body) -> Result<String> {
        match (ty, body) {
            (ArgType::None, Body::Empty) => Ok(String::new()),
            (ArgType::Text, Body::Text(text)) => Ok(text.clone()),
            (ArgType::Bytes, Body::Bytes(bytes)) => encode(bytes),
            (ArgType::Json, Body::Json(value)) => encode(value),
            (ArgType::MkPeer, Body::MkPeer(args)) => encode(args),
            (ArgType::Connect, Body::Connect(args)) => encode(args),
            (ArgType::Name, Body::Name(args)) => encode(args),
            (ArgType::RmHook, Body::RmHook(args)) => encode(args),
            (ArgType::NodeInfo, Body::NodeInfo(info)) => encode(info),
            (ArgType::HookList, Body::HookList(list)) => encode(list),
            (ArgType::NameList, Body::NameList(list)) => encode(list),
            (ArgType::TypeList, Body::TypeList(list)) => encode(list),
            _ => Err(NgError::InvalidArgument),
        }
    }
}
