//! Pipe-pair creation and non-blocking toggling for the worker protocol.

use std::os::fd::{AsFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::pipe;

use crate::errors::{Result, SpawnError};

/// One parent/child pipe pair: `read` is the receiving end, `write` the
/// sending end. Two of these make up a worker's full protocol: one for
/// request data (parent writes, child reads), one for readiness status
/// (child writes, parent reads).
pub struct PipePair {
    pub read: OwnedFd,
    pub write: OwnedFd,
}

/// Create a new pipe pair, mapping any OS failure to [`SpawnError::Pipe`].
pub fn new_pair() -> Result<PipePair> {
    let (read, write) = pipe().map_err(SpawnError::Pipe)?;
    Ok(PipePair {
        read: read.into(),
        write: write.into(),
    })
}

/// Toggle `O_NONBLOCK` on `fd`. Used by the worker to drain the remainder
/// of a frame without blocking once the first byte has arrived.
pub fn set_nonblocking(fd: &impl AsFd, nonblocking: bool) -> Result<()> {
    let raw = fd.as_fd();
    let current = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL).map_err(SpawnError::Pipe)?);
    let updated = if nonblocking {
        current | OFlag::O_NONBLOCK
    } else {
        current & !OFlag::O_NONBLOCK
    };
    fcntl(raw, FcntlArg::F_SETFL(updated)).map_err(SpawnError::Pipe)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::fd::AsRawFd;
    use std::os::unix::io::FromRawFd;

    #[test]
    fn new_pair_is_connected() {
        let pair = new_pair().unwrap();
        let mut writer = unsafe { std::fs::File::from_raw_fd(pair.write.as_raw_fd()) };
        std::mem::forget(pair.write);
        writer.write_all(b"hi").unwrap();
        drop(writer);

        let mut reader = unsafe { std::fs::File::from_raw_fd(pair.read.as_raw_fd()) };
        std::mem::forget(pair.read);
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn set_nonblocking_round_trips() {
        let pair = new_pair().unwrap();
        set_nonblocking(&pair.read, true).unwrap();
        let flags = OFlag::from_bits_truncate(fcntl(&pair.read, FcntlArg::F_GETFL).unwrap());
        assert!(flags.contains(OFlag::O_NONBLOCK));

        set_nonblocking(&pair.read, false).unwrap();
        let flags = OFlag::from_bits_truncate(fcntl(&pair.read, FcntlArg::F_GETFL).unwrap());
        assert!(!flags.contains(OFlag::O_NONBLOCK));
    }
}
