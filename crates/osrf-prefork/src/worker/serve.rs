//! The worker's own state machine: init → serving → ready-signaling →
//! … → terminated.

use std::os::fd::{AsFd, BorrowedFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::unistd;

use crate::bus::BusClient;
use crate::config::PoolConfig;
use crate::errors::{PreforkError, Result};
use crate::session::{SessionLayer, SessionStatus, WaitOutcome};
use crate::worker::record::WorkerPipes;

const READY_TOKEN: &[u8] = b"available";

/// Application-provided hooks run around the serving loop. A real
/// application supplies its own per-process init and exit behavior; tests
/// use no-op closures.
pub trait WorkerHooks {
    /// Runs once, after the cache and bus connections are established but
    /// before the first request is read.
    fn on_init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Runs once, after the serving loop exits for any reason, before the
    /// process terminates.
    fn on_exit(&mut self) {}
}

/// A no-op [`WorkerHooks`] for tests and minimal applications.
pub struct NoopHooks;
impl WorkerHooks for NoopHooks {}

/// Run the worker's full lifecycle: hooks, then up to `config.max_requests`
/// serving iterations, then the exit hook. Returns once the loop ends for
/// any reason (budget exhausted, parent gone, session layer error).
///
/// `session_layer` is consulted once per request to decide whether the
/// call is stateless (handled in full by `dispatch`) or should keep this
/// worker parked on the session's queue for up to `keepalive_seconds`.
pub fn run(
    pipes: WorkerPipes,
    config: &PoolConfig,
    session_layer: &dyn SessionLayer,
    bus: &mut dyn BusClient,
    hooks: &mut dyn WorkerHooks,
) -> Result<()> {
    hooks.on_init()?;

    for iteration in 0..config.max_requests {
        let Some(frame) = read_frame(pipes.request_read_fd.as_fd())? else {
            // Parent closed its end: nothing left to serve.
            break;
        };

        let message = parse_frame(&frame, bus)?;
        if let Some(mut session) = session_layer.dispatch(message)? {
            if session.is_stateful() {
                run_keepalive_loop(session.as_mut(), config.keepalive_seconds);
            }
        }

        let is_last_iteration = iteration + 1 == config.max_requests;
        if !is_last_iteration {
            write_ready_token(pipes.status_write_fd.as_fd())?;
        }
    }

    hooks.on_exit();
    Ok(())
}

fn run_keepalive_loop(session: &mut dyn crate::session::Session, keepalive_seconds: u64) {
    let timeout = Duration::from_secs(keepalive_seconds);
    loop {
        if !session.is_connected() {
            return;
        }
        let started = Instant::now();
        match session.wait_for_request(timeout) {
            Ok(WaitOutcome::Received) => continue,
            Ok(WaitOutcome::Failed) | Err(_) => return,
            Ok(WaitOutcome::Empty) => {
                if started.elapsed() >= timeout {
                    let _ = session.send_status(SessionStatus::Timeout);
                    return;
                }
                // Spurious early wakeup: the wall-clock check above is what
                // actually gates the timeout, so just wait again.
            }
        }
    }
}

/// Read one NUL-terminated frame. The very first byte is read blocking;
/// once a byte has arrived, the rest of the pipe buffer is drained
/// non-blocking, since the parent wrote the whole frame in one call and it
/// is almost certainly already buffered. If draining runs dry before a NUL
/// is seen, fall back to a single blocking read for the next byte and
/// resume draining — this only matters for frames larger than the pipe's
/// buffer, or a parent whose write was itself split across syscalls.
/// Returns `Ok(None)` on a broken pipe (the parent is gone).
fn read_frame(fd: BorrowedFd<'_>) -> Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let mut nonblocking = false;

    loop {
        let mut byte = [0u8; 1];
        match unistd::read(fd, &mut byte) {
            Ok(0) => {
                if nonblocking {
                    crate::worker::pipes::set_nonblocking(&fd, false)?;
                }
                return Ok(None);
            }
            Ok(_) => {
                if !nonblocking {
                    crate::worker::pipes::set_nonblocking(&fd, true)?;
                    nonblocking = true;
                }
                if byte[0] == 0 {
                    crate::worker::pipes::set_nonblocking(&fd, false)?;
                    return Ok(Some(buf));
                }
                buf.push(byte[0]);
            }
            Err(Errno::EAGAIN) if nonblocking => {
                crate::worker::pipes::set_nonblocking(&fd, false)?;
                nonblocking = false;
            }
            Err(Errno::EINTR) => continue,
            Err(err) => {
                if nonblocking {
                    let _ = crate::worker::pipes::set_nonblocking(&fd, false);
                }
                return Err(PreforkError::Transport(err.to_string()));
            }
        }
    }
}

fn parse_frame(frame: &[u8], _bus: &mut dyn BusClient) -> Result<crate::bus::Message> {
    serde_json::from_slice::<crate::bus::WireMessage>(frame)
        .map(crate::bus::WireMessage::into_message)
        .map_err(|e| PreforkError::Transport(format!("malformed request frame: {e}")))
}

fn write_ready_token(fd: BorrowedFd<'_>) -> Result<()> {
    let mut remaining = READY_TOKEN;
    while !remaining.is_empty() {
        match unistd::write(fd, remaining) {
            Ok(0) => return Err(PreforkError::Transport("status pipe closed".to_string())),
            Ok(n) => remaining = &remaining[n..],
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(PreforkError::Transport(err.to_string())),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::fake::FakeBus;
    use crate::bus::{Message, WireMessage};
    use crate::session::fake::ScriptedSession;
    use crate::session::Session;
    use crate::worker::pipes;
    use std::io::{Read, Write};
    use std::os::fd::{AsRawFd, FromRawFd};

    #[test]
    fn ready_token_is_nine_bytes() {
        assert_eq!(READY_TOKEN.len(), 9);
        assert_eq!(READY_TOKEN, b"available");
    }

    #[test]
    fn last_iteration_never_signals_ready() {
        // Encodes the invariant directly: a worker with max_requests=3
        // signals ready after iterations 0 and 1, not after iteration 2.
        let max_requests = 3u32;
        let signals: Vec<bool> = (0..max_requests).map(|i| i + 1 != max_requests).collect();
        assert_eq!(signals, vec![true, true, false]);
    }

    fn encode_frame(message: &Message) -> Vec<u8> {
        let wire = WireMessage::from_message(message);
        let mut frame = serde_json::to_vec(&wire).unwrap();
        frame.push(0);
        frame
    }

    /// Sends exactly one frame on a fresh request pipe, then closes the
    /// write end so the worker's next `read_frame` sees EOF.
    fn one_shot_request_pipes(message: &Message) -> (WorkerPipes, std::fs::File) {
        let request_pair = pipes::new_pair().unwrap();
        let status_pair = pipes::new_pair().unwrap();

        let mut request_writer = unsafe { std::fs::File::from_raw_fd(request_pair.write.as_raw_fd()) };
        std::mem::forget(request_pair.write);
        request_writer.write_all(&encode_frame(message)).unwrap();
        drop(request_writer);

        let status_reader = unsafe { std::fs::File::from_raw_fd(status_pair.read.as_raw_fd()) };
        std::mem::forget(status_pair.read);

        let worker_pipes = WorkerPipes {
            request_read_fd: request_pair.read,
            status_write_fd: status_pair.write,
        };
        (worker_pipes, status_reader)
    }

    struct StatelessLayer;
    impl SessionLayer for StatelessLayer {
        fn dispatch(&self, _message: Message) -> Result<Option<Box<dyn Session>>> {
            Ok(None)
        }
    }

    #[test]
    fn run_serves_one_frame_then_exits_on_parent_hangup() {
        let (worker_pipes, mut status_reader) =
            one_shot_request_pipes(&Message::data("opensrf.math", vec![1, 2, 3]));

        let config = PoolConfig {
            max_requests: 5,
            min_children: 0,
            max_children: 1,
            keepalive_seconds: 1,
        };
        let mut bus = FakeBus::connect("test_drone").unwrap();
        let mut hooks = NoopHooks;

        run(worker_pipes, &config, &StatelessLayer, &mut bus, &mut hooks).unwrap();

        let mut status_buf = [0u8; 9];
        status_reader.read_exact(&mut status_buf).unwrap();
        assert_eq!(&status_buf, READY_TOKEN);
    }

    struct KeepaliveLayer;
    impl SessionLayer for KeepaliveLayer {
        fn dispatch(&self, _message: Message) -> Result<Option<Box<dyn Session>>> {
            Ok(Some(Box::new(ScriptedSession {
                stateful: true,
                outcomes: vec![WaitOutcome::Received, WaitOutcome::Failed].into(),
                connected: true,
                statuses_sent: Vec::new(),
            })))
        }
    }

    #[test]
    fn run_drives_the_keepalive_loop_until_the_session_fails() {
        let (worker_pipes, mut status_reader) =
            one_shot_request_pipes(&Message::data("opensrf.math", vec![9]));

        let config = PoolConfig {
            max_requests: 5,
            min_children: 0,
            max_children: 1,
            keepalive_seconds: 1,
        };
        let mut bus = FakeBus::connect("test_drone").unwrap();
        let mut hooks = NoopHooks;

        run(worker_pipes, &config, &KeepaliveLayer, &mut bus, &mut hooks).unwrap();

        // The dispatched call kept the worker in the keepalive loop across
        // one `Received` outcome before `Failed` ended it; the worker still
        // signals ready afterward since it wasn't the last iteration.
        let mut status_buf = [0u8; 9];
        status_reader.read_exact(&mut status_buf).unwrap();
        assert_eq!(&status_buf, READY_TOKEN);
    }
}
