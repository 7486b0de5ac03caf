//! Descriptor receiving
//!
//! Counterpart of the broker's `send_handle`: reads the one status byte and
//! whatever descriptor rides along with it.

use nix::sys::socket::{ControlMessageOwned, MsgFlags, recvmsg};
use std::io::{self, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tokio::io::Interest;
use tokio::net::UnixStream;

/// A status byte and the descriptor attached to it, if any
#[derive(Debug)]
pub struct Received {
    pub status: u8,
    pub fd: Option<OwnedFd>,
}

fn recv_once(stream: &UnixStream) -> io::Result<Option<Received>> {
    let mut buf = [0u8; 1];
    let mut cmsg = nix::cmsg_space!([RawFd; 1]);

    let (bytes, fds) = {
        let mut iov = [IoSliceMut::new(&mut buf)];
        let msg = recvmsg::<()>(
            stream.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg),
            MsgFlags::MSG_CMSG_CLOEXEC,
        )
        .map_err(io::Error::from)?;

        let mut fds = Vec::new();
        for cmsg in msg.cmsgs().map_err(io::Error::from)? {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                fds.extend(received);
            }
        }
        (msg.bytes, fds)
    };

    // Take ownership of everything that arrived so extras get closed
    let mut owned = fds
        .into_iter()
        .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) })
        .collect::<Vec<_>>();

    if bytes == 0 {
        return Ok(None);
    }
    Ok(Some(Received {
        status: buf[0],
        fd: if owned.is_empty() {
            None
        } else {
            Some(owned.swap_remove(0))
        },
    }))
}

/// Wait for the broker's answer; `None` means it closed without one
pub async fn recv_handle(stream: &UnixStream) -> io::Result<Option<Received>> {
    loop {
        stream.readable().await?;
        match stream.try_io(Interest::READABLE, || recv_once(stream)) {
            Ok(received) => return Ok(received),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}
