//! Peer admission policy
//!
//! Local clients are identified by the UID the kernel reports for the other end
//! of the socket (`SO_PEERCRED`). A peer is admitted when that UID is the
//! broker's own or appears in the configured allow-list.

use crate::error::{BrokerError, Result};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPolicy {
    owner_uid: u32,
    allowed_uids: HashSet<u32>,
}

impl PeerPolicy {
    pub fn new(owner_uid: u32, allowed_uids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            owner_uid,
            allowed_uids: allowed_uids.into_iter().collect(),
        }
    }

    /// Policy owned by the user this process runs as
    pub fn current_user(allowed_uids: impl IntoIterator<Item = u32>) -> Self {
        Self::new(nix::unistd::getuid().as_raw(), allowed_uids)
    }

    pub fn owner_uid(&self) -> u32 {
        self.owner_uid
    }

    pub fn is_allowed(&self, peer_uid: u32) -> bool {
        peer_uid == self.owner_uid || self.allowed_uids.contains(&peer_uid)
    }

    /// Admit or reject a peer
    pub fn authorize(&self, peer_uid: u32) -> Result<()> {
        if self.is_allowed(peer_uid) {
            debug!(peer_uid, "Peer admitted");
            Ok(())
        } else {
            Err(BrokerError::Security { peer_uid })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_is_always_allowed() {
        let policy = PeerPolicy::new(1000, []);
        assert!(policy.authorize(1000).is_ok());
        assert!(matches!(
            policy.authorize(1001),
            Err(BrokerError::Security { peer_uid: 1001 })
        ));
    }

    #[test]
    fn test_allow_list_extends_owner() {
        let policy = PeerPolicy::new(0, [1000, 1002]);
        assert!(policy.is_allowed(0));
        assert!(policy.is_allowed(1000));
        assert!(policy.is_allowed(1002));
        assert!(!policy.is_allowed(1001));
    }

    #[test]
    fn test_current_user() {
        let policy = PeerPolicy::current_user([]);
        assert_eq!(policy.owner_uid(), nix::unistd::getuid().as_raw());
    }
}
