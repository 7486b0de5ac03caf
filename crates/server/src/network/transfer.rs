//! Descriptor passing
//!
//! A granted device is handed to the client as `SCM_RIGHTS` ancillary data
//! riding on the single status byte, so the client either gets both or
//! neither.

use nix::sys::socket::{ControlMessage, MsgFlags, sendmsg};
use std::io::{self, IoSlice};
use std::os::fd::{AsRawFd, BorrowedFd};
use tokio::io::Interest;
use tokio::net::UnixStream;

/// Write `status` with `fd` attached
pub async fn send_handle(stream: &UnixStream, fd: BorrowedFd<'_>, status: u8) -> io::Result<()> {
    let fds = [fd.as_raw_fd()];
    let payload = [status];

    loop {
        stream.writable().await?;

        let sent = stream.try_io(Interest::WRITABLE, || {
            let iov = [IoSlice::new(&payload)];
            let cmsgs = [ControlMessage::ScmRights(&fds)];
            sendmsg::<()>(
                stream.as_raw_fd(),
                &iov,
                &cmsgs,
                MsgFlags::MSG_NOSIGNAL,
                None,
            )
            .map_err(io::Error::from)
        });

        match sent {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::socket::{ControlMessageOwned, recvmsg};
    use std::io::{IoSliceMut, Read, Write};
    use std::os::fd::{AsFd, FromRawFd, OwnedFd, RawFd};

    #[tokio::test]
    async fn test_status_and_descriptor_arrive_together() {
        let (broker, client) = UnixStream::pair().unwrap();
        let (device, mut device_peer) = std::os::unix::net::UnixStream::pair().unwrap();

        send_handle(&broker, device.as_fd(), 0).await.unwrap();
        drop(device);

        let client = client.into_std().unwrap();
        client.set_nonblocking(false).unwrap();

        let mut buf = [0u8; 4];
        let mut cmsg = nix::cmsg_space!([RawFd; 1]);
        let (bytes, received) = {
            let mut iov = [IoSliceMut::new(&mut buf)];
            let msg = recvmsg::<()>(client.as_raw_fd(), &mut iov, Some(&mut cmsg), MsgFlags::empty())
                .unwrap();
            let mut received = None;
            for cmsg in msg.cmsgs().unwrap() {
                if let ControlMessageOwned::ScmRights(fds) = cmsg {
                    received = fds.first().copied();
                }
            }
            (msg.bytes, received)
        };
        assert_eq!(bytes, 1);
        assert_eq!(buf[0], 0);

        // The received descriptor reaches the same device
        let fd = unsafe { OwnedFd::from_raw_fd(received.expect("descriptor attached")) };
        let mut forwarded = std::os::unix::net::UnixStream::from(fd);
        forwarded.write_all(b"ok").unwrap();
        drop(forwarded);

        let mut echoed = Vec::new();
        device_peer.read_to_end(&mut echoed).unwrap();
        assert_eq!(echoed, b"ok");
    }

    #[tokio::test]
    async fn test_send_to_closed_peer_fails() {
        let (broker, client) = UnixStream::pair().unwrap();
        let (device, _peer) = std::os::unix::net::UnixStream::pair().unwrap();
        drop(client);

        let err = send_handle(&broker, device.as_fd(), 0).await.unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
        ));
    }
}
