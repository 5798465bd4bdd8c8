//! The session layer: an out-of-scope collaborator.
//!
//! A worker hands each inbound message to the session layer, which decides
//! whether the call is stateless (one message, one reply, nothing to track)
//! or belongs to a stateful, already-connected session that should keep
//! reading further requests within the keepalive window. This module
//! defines only that contract; application request handling lives outside
//! this core.

use std::time::Duration;

use crate::bus::Message;
use crate::errors::Result;

/// Outcome of one session-layer queue wait during the keepalive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A request arrived.
    Received,
    /// The wait elapsed with nothing to read.
    Empty,
    /// The session layer reported a failure; the worker must stop waiting.
    Failed,
}

/// A status a worker can report back through the session before exiting
/// the keepalive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Sent when the keepalive window elapses with no further request.
    Timeout,
}

/// One in-progress call, as handed back to the worker by the session layer.
///
/// Stateless calls never produce a session; the worker dispatches the
/// message and moves straight to readiness-signaling.
pub trait Session {
    /// Whether this session is a stateful, already-connected conversation
    /// that should keep the worker waiting for more requests.
    fn is_stateful(&self) -> bool;

    /// Whether the session is still connected from the session layer's
    /// point of view. Checked on every iteration of the keepalive loop.
    fn is_connected(&self) -> bool;

    /// Wait up to `timeout` for the next request in this session.
    fn wait_for_request(&mut self, timeout: Duration) -> Result<WaitOutcome>;

    /// Send a session-level status, e.g. [`SessionStatus::Timeout`].
    fn send_status(&mut self, status: SessionStatus) -> Result<()>;
}

/// Dispatches one inbound message to application request handling.
pub trait SessionLayer: Send {
    /// Hand `message` to the application. Returns `Some(session)` when the
    /// call should keep the worker in the keepalive loop, `None` when the
    /// call was stateless and fully handled.
    fn dispatch(&self, message: Message) -> Result<Option<Box<dyn Session>>>;
}


#[cfg(test)]
mod tests {
    use super::fake::ScriptedSession;
    use super::*;

    #[test]
    fn scripted_session_reports_configured_statefulness() {
        let session = ScriptedSession {
            stateful: true,
            outcomes: Default::default(),
            connected: true,
            statuses_sent: Vec::new(),
        };
        assert!(session.is_stateful());
        assert!(session.is_connected());
    }

    #[test]
    fn scripted_session_exhausts_to_failed() {
        let mut session = ScriptedSession {
            stateful: true,
            outcomes: vec![WaitOutcome::Received].into(),
            connected: true,
            statuses_sent: Vec::new(),
        };
        assert_eq!(session.wait_for_request(Duration::from_secs(1)).unwrap(), WaitOutcome::Received);
        assert_eq!(session.wait_for_request(Duration::from_secs(1)).unwrap(), WaitOutcome::Failed);
    }
}
