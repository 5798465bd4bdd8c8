//! The message bus: an out-of-scope collaborator.
//!
//! The pool manager, the router registration step, and the memoizing
//! example method all talk to a message bus that delivers framed messages
//! between named resources. This module defines only the shape of that
//! contract (`Message`, `BusClient`) and a small in-process fake used by
//! tests; the real wire protocol and broker are outside this core.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::Result;

/// Routing metadata attached to control messages such as router
/// registration. `action` names the operation (`"register"`); `class`
/// names the application the action concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingHeader {
    pub action: String,
    pub class: String,
}

/// One framed bus message.
#[derive(Debug, Clone)]
pub struct Message {
    /// `resource@domain` or `resource@domain/router` address of the recipient.
    pub to: String,
    /// Address of the sender, filled in by the client on send.
    pub from: Option<String>,
    /// Conversation/session identifier. A fresh session allocates a new one.
    pub thread: Option<Uuid>,
    pub routing: Option<RoutingHeader>,
    pub body: Vec<u8>,
}

impl Message {
    /// Build an empty-body control message, e.g. a router registration.
    pub fn control(to: impl Into<String>, action: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            from: None,
            thread: None,
            routing: Some(RoutingHeader {
                action: action.into(),
                class: class.into(),
            }),
            body: Vec::new(),
        }
    }

    /// Build a data-carrying message addressed to `to`.
    pub fn data(to: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            to: to.into(),
            from: None,
            thread: None,
            routing: None,
            body,
        }
    }
}

/// The on-the-wire shape of a [`Message`] as it travels down a worker's
/// request pipe: just enough to reconstruct a `Message` on the other side.
/// The pool manager encodes this (plus a trailing NUL) when it dispatches
/// to a worker; the worker decodes it in its serving loop.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireMessage {
    pub to: String,
    pub body: Vec<u8>,
}

impl WireMessage {
    pub(crate) fn from_message(message: &Message) -> Self {
        Self {
            to: message.to.clone(),
            body: message.body.clone(),
        }
    }

    pub(crate) fn into_message(self) -> Message {
        Message::data(self.to, self.body)
    }
}

/// A connection to the message bus, scoped to one resource name.
///
/// Implementations own the underlying transport (typically a persistent
/// XMPP or Redis connection). The pool manager's dispatch loop treats
/// `recv_blocking` as its sole suspension point while idle.
pub trait BusClient: Send {
    /// Connect under `resource`, e.g. `"opensrf.math_listener"`.
    fn connect(resource: &str) -> Result<Self>
    where
        Self: Sized;

    /// Send one message. Used for both data dispatch and control
    /// (router-registration) traffic.
    fn send(&mut self, message: &Message) -> Result<()>;

    /// Block until one message arrives.
    fn recv_blocking(&mut self) -> Result<Message>;

    /// Wait up to `timeout` for one message; `Ok(None)` on timeout.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Message>>;

    /// Release the connection. Idempotent.
    fn disconnect(&mut self) -> Result<()>;
}

/// A line-oriented, JSON-per-line transport over stdin/stdout.
///
/// The real message bus (an XMPP or Redis broker) is an out-of-scope
/// external collaborator. This transport exists so `osrf-listener` is
/// runnable and testable end-to-end without one: each line on stdin is one
/// inbound [`Message`], each outbound
/// message (data or router-registration control traffic) is written as one
/// line of JSON on stdout. It has no notion of addressing beyond the `to`
/// field riding along in the JSON, and `recv_timeout` degenerates to a
/// blocking read, so it is meant for local smoke-testing, not production.
pub struct StdioBus {
    resource: String,
    stdin: std::io::BufReader<std::io::Stdin>,
}

#[derive(Serialize, Deserialize)]
struct StdioFrame {
    to: String,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    thread: Option<Uuid>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    body: Vec<u8>,
}

impl StdioFrame {
    fn from_message(message: &Message) -> Self {
        Self {
            to: message.to.clone(),
            from: message.from.clone(),
            thread: message.thread,
            action: message.routing.as_ref().map(|r| r.action.clone()),
            class: message.routing.as_ref().map(|r| r.class.clone()),
            body: message.body.clone(),
        }
    }

    fn into_message(self) -> Message {
        Message {
            to: self.to,
            from: self.from,
            thread: self.thread,
            routing: match (self.action, self.class) {
                (Some(action), Some(class)) => Some(RoutingHeader { action, class }),
                _ => None,
            },
            body: self.body,
        }
    }
}

impl BusClient for StdioBus {
    fn connect(resource: &str) -> Result<Self> {
        tracing::info!(%resource, "stdio bus connected");
        Ok(Self {
            resource: resource.to_string(),
            stdin: std::io::BufReader::new(std::io::stdin()),
        })
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        use std::io::Write;
        let frame = StdioFrame::from_message(message);
        let line = serde_json::to_string(&frame).map_err(|e| crate::errors::PreforkError::Other(e.into()))?;
        let mut stdout = std::io::stdout();
        writeln!(stdout, "{line}").map_err(crate::errors::PreforkError::from)?;
        stdout.flush().map_err(crate::errors::PreforkError::from)
    }

    fn recv_blocking(&mut self) -> Result<Message> {
        use std::io::BufRead;
        let mut line = String::new();
        let bytes_read = self.stdin.read_line(&mut line).map_err(crate::errors::PreforkError::from)?;
        if bytes_read == 0 {
            return Err(crate::errors::PreforkError::Bus(format!(
                "{}: stdin closed",
                self.resource
            )));
        }
        let frame: StdioFrame =
            serde_json::from_str(line.trim_end()).map_err(|e| crate::errors::PreforkError::Other(e.into()))?;
        Ok(frame.into_message())
    }

    fn recv_timeout(&mut self, _timeout: Duration) -> Result<Option<Message>> {
        self.recv_blocking().map(Some)
    }

    fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}
