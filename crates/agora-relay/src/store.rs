//! Per-recipient on-disk FIFO of buffered messages (§4.F, §6 directory
//! layout).
//!
//! Each stored envelope is its own file under
//! `{root}/{sanitized publicKey}/{timestamp-ms}-{uuid}.json`, so that
//! filename order is write order and a single write syscall per record
//! keeps enqueue atomic at entry granularity.

use std::path::{Path, PathBuf};

use agora_envelope::Envelope;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::agent::now_ms;

/// A single buffered message, persisted in FIFO order in the
/// recipient's on-disk queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEntry {
    pub from: String,
    #[serde(rename = "fromName", skip_serializing_if = "Option::is_none", default)]
    pub from_name: Option<String>,
    pub envelope: Envelope,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error accessing store directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize stored entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`, so a
/// public key is always a safe path component.
pub fn sanitize(public_key: &str) -> String {
    public_key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A store-and-forward directory rooted at a single path.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn recipient_dir(&self, recipient: &str) -> PathBuf {
        self.root.join(sanitize(recipient))
    }

    /// Appends `entry` to `recipient`'s queue. Writes to a temp file in
    /// the same directory then renames it into place, so a crash
    /// mid-write never leaves a partially-written entry for `load` to
    /// trip over.
    pub fn enqueue(&self, recipient: &str, entry: &StoredEntry) -> Result<(), StoreError> {
        let dir = self.recipient_dir(recipient);
        std::fs::create_dir_all(&dir)?;
        let filename = format!("{:020}-{}.json", now_ms(), Uuid::new_v4());
        let final_path = dir.join(&filename);
        let tmp_path = dir.join(format!(".{filename}.tmp"));
        let bytes = serde_json::to_vec(entry)?;
        std::fs::write(&tmp_path, &bytes)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Returns all queued entries for `recipient` in ascending filename
    /// (= enqueue) order. Malformed files are skipped, not surfaced as
    /// an error — the rest of the queue must still be deliverable.
    pub fn load(&self, recipient: &str) -> Result<Vec<StoredEntry>, StoreError> {
        let dir = self.recipient_dir(recipient);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut filenames: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".json") && !n.starts_with('.'))
            })
            .collect();
        filenames.sort();

        let mut entries = Vec::with_capacity(filenames.len());
        for path in filenames {
            match read_entry(&path) {
                Ok(entry) => entries.push(entry),
                Err(_) => {
                    tracing::warn!(path = %path.display(), "skipping malformed store-and-forward entry");
                }
            }
        }
        Ok(entries)
    }

    /// Removes all queued entries for `recipient` after delivery.
    pub fn clear(&self, recipient: &str) -> Result<(), StoreError> {
        let dir = self.recipient_dir(recipient);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

fn read_entry(path: &Path) -> Result<StoredEntry, ()> {
    let bytes = std::fs::read(path).map_err(|_| ())?;
    serde_json::from_slice(&bytes).map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_crypto::Keypair;
    use agora_types::MessageType;

    fn entry(from: &str, n: u32) -> StoredEntry {
        let kp = Keypair::generate();
        let envelope = agora_envelope::create(
            MessageType::Publish,
            &kp.public_hex(),
            &kp.private_hex(),
            serde_json::json!({"n": n}),
            None,
        )
        .unwrap();
        StoredEntry {
            from: from.to_string(),
            from_name: None,
            envelope,
        }
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize("abc/../123"), "abc___123");
        assert_eq!(sanitize("ok-key_123"), "ok-key_123");
    }

    #[test]
    fn load_returns_entries_in_enqueue_order_p6() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let x = entry("sender", 1);
        let y = entry("sender", 2);
        store.enqueue("recipient", &x).unwrap();
        store.enqueue("recipient", &y).unwrap();

        let loaded = store.load("recipient").unwrap();
        assert_eq!(loaded, vec![x, y]);
    }

    #[test]
    fn clear_empties_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        store.enqueue("recipient", &entry("sender", 1)).unwrap();
        store.clear("recipient").unwrap();
        assert!(store.load("recipient").unwrap().is_empty());
    }

    #[test]
    fn load_on_unknown_recipient_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        assert!(store.load("nobody").unwrap().is_empty());
    }

    #[test]
    fn malformed_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        store.enqueue("recipient", &entry("sender", 1)).unwrap();

        let recip_dir = dir.path().join(sanitize("recipient"));
        std::fs::write(recip_dir.join("00000000000000000000-bad.json"), b"not json").unwrap();

        let loaded = store.load("recipient").unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
