//! Loading, saving, and editing the local agent's configuration
//! document (§4.L): identity, known peers, and relay URL.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use agora_types::PublicKeyHex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[source] io::Error),

    #[error("failed to write config file: {0}")]
    FileWrite(#[source] io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid environment variable {name}: {reason}")]
    InvalidEnvVar { name: &'static str, reason: String },
}

/// This agent's identity, as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(rename = "publicKey")]
    pub public_key: PublicKeyHex,
    #[serde(rename = "privateKey")]
    pub private_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A known peer's display name and reachable addresses. An address
/// beginning `ws://`/`wss://` is a relay this peer can be reached
/// through; one beginning `http://`/`https://` is a webhook URL, paired
/// with `webhookToken` for the bearer auth `agora-webhook` sends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(rename = "webhookToken", default, skip_serializing_if = "Option::is_none")]
    pub webhook_token: Option<String>,
}

/// The known-peers table shape, shared by `agora-webhook`'s known-peer
/// check and the CLI's `peers` subcommands.
pub type PeerTable = BTreeMap<PublicKeyHex, PeerEntry>;

fn default_relay_url() -> String {
    "ws://127.0.0.1:8787".to_string()
}

/// The relay this agent connects to by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_url")]
    pub url: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
        }
    }
}

/// The full on-disk configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub identity: IdentityConfig,
    #[serde(default)]
    pub peers: PeerTable,
    #[serde(default)]
    pub relay: RelayConfig,
}

impl Config {
    /// Builds a fresh configuration around a freshly generated identity
    /// and an empty peer table, so `init` can create-or-load
    /// idempotently.
    pub fn fresh(public_key: PublicKeyHex, private_key: String, name: Option<String>) -> Self {
        Self {
            identity: IdentityConfig {
                public_key,
                private_key,
                name,
            },
            peers: BTreeMap::new(),
            relay: RelayConfig::default(),
        }
    }

    pub fn add_peer(&mut self, public_key: PublicKeyHex, entry: PeerEntry) {
        self.peers.insert(public_key, entry);
    }

    pub fn remove_peer(&mut self, public_key: &str) -> Option<PeerEntry> {
        self.peers.remove(public_key)
    }

    pub fn list_peers(&self) -> impl Iterator<Item = (&PublicKeyHex, &PeerEntry)> {
        self.peers.iter()
    }
}

fn parse_env_var<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => {
            let parsed = raw.parse::<T>().map_err(|err| ConfigError::InvalidEnvVar {
                name,
                reason: err.to_string(),
            })?;
            Ok(Some(parsed))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidEnvVar {
            name,
            reason: "value is not valid unicode".to_string(),
        }),
    }
}

/// Resolves the config document path: an explicit `path`, else
/// `AGORA_CONFIG_PATH`, else `~/.agora/config.json`.
pub fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(p) = path {
        return Ok(p.to_path_buf());
    }
    if let Some(from_env) = parse_env_var::<String>("AGORA_CONFIG_PATH")? {
        return Ok(PathBuf::from(from_env));
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Ok(PathBuf::from(home).join(".agora").join("config.json"))
}

/// Loads configuration from `path` (see [`resolve_path`]), falling back
/// to a fresh identity and empty peer table if the file does not exist.
///
/// Environment variable overrides:
/// - `AGORA_CONFIG_PATH` selects the config file when `path` is `None`.
/// - `AGORA_RELAY_URL` overrides `relay.url`.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let resolved = resolve_path(path)?;
    let mut config = match std::fs::read_to_string(&resolved) {
        Ok(contents) => serde_json::from_str(&contents)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::info!(path = %resolved.display(), "config file not found, generating fresh identity");
            let keypair = agora_crypto::Keypair::generate();
            Config::fresh(keypair.public_hex(), keypair.private_hex(), None)
        }
        Err(e) => return Err(ConfigError::FileRead(e)),
    };

    if let Some(url) = parse_env_var::<String>("AGORA_RELAY_URL")? {
        config.relay.url = url;
    }

    Ok(config)
}

/// Serializes `config` as pretty-printed JSON (for humans, not for
/// hashing — this is not the canonical form used elsewhere in the
/// workspace) and writes it atomically: a temp file in the same
/// directory, then a rename, so a crash mid-write never corrupts the
/// last-good config. On Unix the file is tightened to owner-read/write.
pub fn save(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(ConfigError::FileWrite)?;
        }
    }
    let contents = serde_json::to_string_pretty(config)?;

    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("config.json")
    ));
    // Guard against a stale temp file from a prior crash colliding with
    // this write; the rename below is still what makes the write atomic.
    if tmp_path == path {
        tmp_path = parent.join("config.json.tmp");
    }

    std::fs::write(&tmp_path, contents.as_bytes()).map_err(ConfigError::FileWrite)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&tmp_path, perms).map_err(ConfigError::FileWrite)?;
    }

    std::fs::rename(&tmp_path, path).map_err(ConfigError::FileWrite)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_env() {
        std::env::remove_var("AGORA_CONFIG_PATH");
        std::env::remove_var("AGORA_RELAY_URL");
    }

    #[test]
    fn load_generates_fresh_identity_when_file_missing() {
        let _guard = env_lock().lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.identity.public_key.len(), 64);
        assert!(config.peers.is_empty());
        assert_eq!(config.relay.url, default_relay_url());
    }

    #[test]
    fn save_then_load_round_trips() {
        let _guard = env_lock().lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = load(Some(&path)).unwrap();
        config.add_peer(
            "a".repeat(64),
            PeerEntry {
                name: Some("ally".to_string()),
                addresses: vec!["ws://127.0.0.1:9000".to_string()],
                webhook_token: None,
            },
        );
        save(&path, &config).unwrap();

        let reloaded = load(Some(&path)).unwrap();
        assert_eq!(reloaded, config);
        assert_eq!(reloaded.peers.len(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn save_tightens_file_permissions_on_unix() {
        use std::os::unix::fs::PermissionsExt;
        let _guard = env_lock().lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = load(Some(&path)).unwrap();
        save(&path, &config).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn relay_url_env_override_is_applied() {
        let _guard = env_lock().lock().unwrap();
        clear_env();
        std::env::set_var("AGORA_RELAY_URL", "ws://example.invalid:1234");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.relay.url, "ws://example.invalid:1234");

        clear_env();
    }

    #[test]
    fn add_then_remove_peer_round_trips() {
        let _guard = env_lock().lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let mut config = load(Some(&dir.path().join("config.json"))).unwrap();

        let key = "b".repeat(64);
        config.add_peer(key.clone(), PeerEntry::default());
        assert_eq!(config.list_peers().count(), 1);

        let removed = config.remove_peer(&key);
        assert!(removed.is_some());
        assert_eq!(config.list_peers().count(), 0);
    }

    #[test]
    fn config_path_resolution_prefers_explicit_over_env() {
        let _guard = env_lock().lock().unwrap();
        clear_env();
        std::env::set_var("AGORA_CONFIG_PATH", "/should/not/be/used.json");

        let explicit = PathBuf::from("/tmp/explicit-config.json");
        let resolved = resolve_path(Some(&explicit)).unwrap();
        assert_eq!(resolved, explicit);

        clear_env();
    }
}
