//! A spawned worker's bookkeeping, as held by the parent.

use std::os::fd::OwnedFd;

use nix::unistd::Pid;

use crate::pool::lists::WorkerId;

/// One spawned worker, as tracked by the parent.
///
/// All four of the worker's pipe endpoints are retained here for the
/// worker's entire life, including the two the parent never reads or
/// writes through. None of them are closed individually as soon as they go
/// unused after fork; they are dropped together, in one place, only when
/// the record is reaped and returned to the free list (see
/// [`crate::pool::manager`]).
pub struct WorkerRecord {
    pub pid: Pid,
    /// Parent writes request frames here; the child reads its end.
    pub request_write_fd: OwnedFd,
    /// The child's read end of the request pipe, as duplicated into the
    /// parent's own fd table by `fork()`. The parent never reads through
    /// it; it is kept open until reap rather than closed the moment
    /// `spawn_one` returns.
    pub request_read_fd: OwnedFd,
    /// Parent reads readiness tokens here; the child writes its end.
    pub status_read_fd: OwnedFd,
    /// The child's write end of the status pipe, as duplicated into the
    /// parent's own fd table by `fork()`. Kept open for the same reason as
    /// `request_read_fd`.
    pub status_write_fd: OwnedFd,
    pub app_name: String,
    pub max_requests: u32,
    pub keepalive_seconds: u64,
    /// Doubly-linked active-ring neighbors; `None` while idle or free.
    pub(crate) next: Option<WorkerId>,
    pub(crate) prev: Option<WorkerId>,
}

impl WorkerRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pid: Pid,
        request_write_fd: OwnedFd,
        request_read_fd: OwnedFd,
        status_read_fd: OwnedFd,
        status_write_fd: OwnedFd,
        app_name: String,
        max_requests: u32,
        keepalive_seconds: u64,
    ) -> Self {
        Self {
            pid,
            request_write_fd,
            request_read_fd,
            status_read_fd,
            status_write_fd,
            app_name,
            max_requests,
            keepalive_seconds,
            next: None,
            prev: None,
        }
    }
}

/// The child-side counterpart of a spawned worker's pipes, kept only long
/// enough to hand to [`crate::worker::serve::run`] after `fork()` returns
/// in the child.
pub struct WorkerPipes {
    /// Child reads request frames here.
    pub request_read_fd: OwnedFd,
    /// Child writes readiness tokens here.
    pub status_write_fd: OwnedFd,
}
