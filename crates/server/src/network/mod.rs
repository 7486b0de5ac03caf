//! Network subsystem
//!
//! Accepts local socket connections and runs one session per client.
//!
//! # Architecture
//!
//! ```text
//! BrokerServer
//!   ├─> accept connections
//!   └─> spawn ClientConnection per client (JoinSet)
//!         ├─> check peer credentials
//!         ├─> read one request string
//!         ├─> Acquire:   PermissionGate -> open -> send fd -> wait for close
//!         └─> Directory: DirectoryWorker (snapshot + live events), wait for close
//! ```

pub mod connection;
pub mod server;
pub mod streams;
pub mod transfer;

pub use connection::ClientConnection;
pub use server::{BrokerOptions, BrokerServer, Collaborators};
pub use transfer::send_handle;
