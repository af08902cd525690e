//! Return addresses and responses.
//!
//! A message's return address is either a node (responses arrive there as
//! messages with the response bit set) or a reply channel held by an
//! external caller. A [`Responder`] travels with each message through the
//! receiving callback; whatever the callback does not answer itself is
//! answered by the dispatcher once the callback returns.

use crate::dispatch::{self, Address};
use crate::error::{NgError, Result};
use crate::message::{Body, Message, MessageHeader};
use crate::node::{Node, NodeId};
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{trace, warn};

/// Where responses to a message go.
#[derive(Debug)]
pub enum ReturnAddr {
    /// A node, by ID.
    Node(NodeId),
    /// A reply channel held by an external caller.
    Reply(oneshot::Sender<Result<Message>>),
}

impl ReturnAddr {
    /// Creates a reply channel.
    #[must_use]
    pub fn channel() -> (Self, PendingReply) {
        let (tx, rx) = oneshot::channel();
        (Self::Reply(tx), PendingReply { rx })
    }
}

/// Answers one message.
#[derive(Debug)]
pub struct Responder {
    origin: Node,
    header: MessageHeader,
    addr: Option<ReturnAddr>,
}

impl Responder {
    pub(crate) fn new(origin: Node, header: MessageHeader, addr: Option<ReturnAddr>) -> Self {
        Self {
            origin,
            header,
            addr,
        }
    }

    /// Returns `true` while nobody has answered and someone is listening.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.addr.is_some()
    }

    /// Header of the message being answered.
    #[must_use]
    pub fn request(&self) -> &MessageHeader {
        &self.header
    }

    /// Moves the obligation to answer out of this responder, so the answer
    /// can be sent later from another item.
    #[must_use]
    pub fn take(&mut self) -> Responder {
        Responder {
            origin: self.origin.clone(),
            header: self.header.clone(),
            addr: self.addr.take(),
        }
    }

    /// Sends `body` as the response. Does nothing if already answered.
    pub fn respond(&mut self, body: Body) -> Result<()> {
        let Some(addr) = self.addr.take() else {
            return Ok(());
        };
        let response = Message::response_to(&self.header, body);
        match addr {
            ReturnAddr::Reply(tx) => {
                // The caller may have stopped waiting.
                let _ = tx.send(Ok(response));
                Ok(())
            }
            ReturnAddr::Node(id) => {
                let core = self.origin.core()?;
                dispatch::send_msg(core, Some(&self.origin), &Address::Id(id), response, None)
            }
        }
    }

    /// Sends `err` as the response. Does nothing if already answered.
    pub fn respond_error(&mut self, err: NgError) -> Result<()> {
        match self.addr.take() {
            Some(ReturnAddr::Reply(tx)) => {
                let _ = tx.send(Err(err));
                Ok(())
            }
            Some(addr @ ReturnAddr::Node(_)) => {
                self.addr = Some(addr);
                self.respond(Body::Error(err))
            }
            None => Ok(()),
        }
    }

    /// Answers whatever the callback left unanswered: errors go back to
    /// the sender, and an external caller gets an empty acknowledgement.
    pub(crate) fn finish(mut self, result: &Result<()>) {
        let pending = self.addr.is_some();
        let external = matches!(self.addr, Some(ReturnAddr::Reply(_)));
        let outcome = match result {
            Err(err) if pending => self.respond_error(*err),
            Ok(()) if external => self.respond(Body::Empty),
            _ => Ok(()),
        };
        if let Err(err) = outcome {
            warn!(node = %self.origin.id(), %err, "response could not be delivered");
        } else {
            trace!(node = %self.origin.id(), cmd = self.header.cmd, "message finished");
        }
    }
}

/// The caller's end of a reply channel.
///
/// Await it from async code, or call [`wait`](Self::wait) from a plain
/// thread. Never wait from inside a node callback.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Result<Message>>,
}

impl PendingReply {
    /// Blocks until the response arrives.
    ///
    /// Fails with `Unreachable` if the message was dropped unanswered.
    /// Panics if called from within an async runtime.
    pub fn wait(self) -> Result<Message> {
        self.rx.blocking_recv().unwrap_or(Err(NgError::Unreachable))
    }

    /// Returns the response if it has already arrived.
    pub fn try_wait(&mut self) -> Option<Result<Message>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(NgError::Unreachable)),
        }
    }
}

impl Future for PendingReply {
    type Output = Result<Message>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(NgError::Unreachable)))
    }
}
