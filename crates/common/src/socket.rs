//! Local socket addressing
//!
//! The broker listens either in the Linux abstract namespace (the default,
//! matching what libusb's Android backend connects to) or on a filesystem
//! path, which is what tests and unprivileged setups use.

use std::fmt;
use std::io;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixListener, UnixStream};
use std::path::{Path, PathBuf};

/// Where the broker socket lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketName {
    /// Abstract namespace name, without the leading NUL
    Abstract(String),
    /// Filesystem socket
    Path(PathBuf),
}

impl SocketName {
    pub fn abstract_name(name: impl Into<String>) -> Self {
        Self::Abstract(name.into())
    }

    pub fn path(path: impl AsRef<Path>) -> Self {
        Self::Path(path.as_ref().to_path_buf())
    }

    /// Name used to derive the permission action id
    pub fn name(&self) -> String {
        match self {
            Self::Abstract(name) => name.clone(),
            Self::Path(path) => path.display().to_string(),
        }
    }

    fn address(&self) -> io::Result<SocketAddr> {
        match self {
            Self::Abstract(name) => SocketAddr::from_abstract_name(name.as_bytes()),
            Self::Path(path) => SocketAddr::from_pathname(path),
        }
    }

    /// Bind a blocking listener
    ///
    /// A stale socket file left behind by a previous run is removed first. A
    /// file that still accepts connections belongs to a running broker and
    /// fails the bind with `AddrInUse`.
    pub fn bind(&self) -> io::Result<UnixListener> {
        if let Self::Path(path) = self {
            if path.exists() {
                match UnixStream::connect(path) {
                    Ok(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::AddrInUse,
                            format!("{} is served by a running process", path.display()),
                        ));
                    }
                    Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                        std::fs::remove_file(path)?;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            }
        }
        UnixListener::bind_addr(&self.address()?)
    }

    /// Connect a blocking stream
    pub fn connect(&self) -> io::Result<UnixStream> {
        UnixStream::connect_addr(&self.address()?)
    }

    /// Remove the socket file, if any
    pub fn cleanup(&self) {
        if let Self::Path(path) = self {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove socket {}: {}", path.display(), e);
                }
            }
        }
    }
}

impl fmt::Display for SocketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abstract(name) => write!(f, "@{}", name),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    #[test]
    fn test_path_socket_roundtrip() {
        let dir = TempDir::new().unwrap();
        let name = SocketName::path(dir.path().join("broker.sock"));

        let listener = name.bind().unwrap();
        let mut client = name.connect().unwrap();
        let (mut server, _) = listener.accept().unwrap();

        client.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        drop(listener);
        name.cleanup();
        assert!(!dir.path().join("broker.sock").exists());
    }

    #[test]
    fn test_bind_replaces_stale_socket() {
        let dir = TempDir::new().unwrap();
        let name = SocketName::path(dir.path().join("stale.sock"));

        drop(name.bind().unwrap());
        assert!(dir.path().join("stale.sock").exists());
        assert!(name.bind().is_ok());
    }

    #[test]
    fn test_bind_keeps_live_socket() {
        let dir = TempDir::new().unwrap();
        let name = SocketName::path(dir.path().join("live.sock"));

        let listener = name.bind().unwrap();
        let err = name.bind().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);

        // The first listener still owns the path; drain the liveness check
        let _ = listener.accept().unwrap();
        let _client = name.connect().unwrap();
        assert!(listener.accept().is_ok());
    }

    #[test]
    fn test_abstract_socket_connect() {
        let name = SocketName::abstract_name(format!("usb-broker-test.{}", std::process::id()));
        let listener = name.bind().unwrap();
        let client = name.connect();
        assert!(client.is_ok());
        drop(listener);
        // Nothing on disk to clean up
        name.cleanup();
    }

    #[test]
    fn test_display_and_name() {
        let name = SocketName::abstract_name("usb-broker.libusb");
        assert_eq!(name.to_string(), "@usb-broker.libusb");
        assert_eq!(name.name(), "usb-broker.libusb");

        let name = SocketName::path("/run/usb-broker.sock");
        assert_eq!(name.to_string(), "/run/usb-broker.sock");
        assert_eq!(name.name(), "/run/usb-broker.sock");
    }
}
