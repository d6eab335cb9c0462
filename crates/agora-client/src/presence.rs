//! The client's local view of who else is reachable through the relay
//! it is currently registered with (§4.G presence).

use std::collections::{HashMap, HashSet};

/// One entry in the client's presence map.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub name: Option<String>,
    pub stored_for: bool,
}

/// The presence map plus the storage-peer set, kept in sync with
/// `registered`, `peer_online`, and `peer_offline` frames.
#[derive(Debug, Clone, Default)]
pub struct Presence {
    online: HashMap<String, PresenceEntry>,
    storage_peers: HashSet<String>,
}

impl Presence {
    pub fn reset(&mut self) {
        self.online.clear();
        self.storage_peers.clear();
    }

    pub fn mark_online(&mut self, public_key: String, name: Option<String>, stored_for: bool) {
        if stored_for {
            self.storage_peers.insert(public_key.clone());
        }
        self.online.insert(public_key, PresenceEntry { name, stored_for });
    }

    /// Removes a peer from the online map. Storage-peer membership
    /// outlives a `peer_offline`, per §4.G.
    pub fn mark_offline(&mut self, public_key: &str) {
        self.online.remove(public_key);
    }

    pub fn mark_storage_peer(&mut self, public_key: String) {
        self.storage_peers.insert(public_key);
    }

    /// True iff `public_key` is currently online, or is a known storage
    /// peer (which is reachable even while offline — messages to it are
    /// buffered by the relay).
    pub fn is_peer_online(&self, public_key: &str) -> bool {
        self.online.contains_key(public_key) || self.storage_peers.contains(public_key)
    }

    pub fn snapshot(&self) -> HashMap<String, PresenceEntry> {
        self.online.clone()
    }

    pub fn storage_peers(&self) -> HashSet<String> {
        self.storage_peers.clone()
    }
}
