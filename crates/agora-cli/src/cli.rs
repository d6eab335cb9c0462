use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "agora", about = "Peer-to-peer messaging for autonomous agents", long_about = None)]
pub struct Cli {
    /// Path to the config document. Defaults to `AGORA_CONFIG_PATH` or
    /// `~/.agora/config.json`.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate or load an identity and write the config document.
    Init {
        /// Display name to store alongside the identity.
        #[arg(long)]
        name: Option<String>,
    },
    /// Print the local identity's public key and name.
    Whoami,
    /// Print identity, peer count, and relay URL.
    Status,
    /// Mutate or query the peer table.
    Peers {
        #[command(subcommand)]
        action: PeersAction,
    },
    /// Build, sign, and deliver an envelope.
    Send {
        /// Recipient public key.
        to: String,
        /// Envelope kind (e.g. "publish", "announce").
        #[arg(long = "type", default_value = "publish")]
        kind: String,
        /// Envelope payload, as a JSON string.
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Envelope id this message replies to.
        #[arg(long)]
        in_reply_to: Option<String>,
    },
    /// Parse a raw envelope JSON blob and print its verification result.
    Decode {
        /// Envelope JSON; reads stdin if omitted.
        envelope: Option<String>,
    },
    /// Send an `announce` envelope to every known peer.
    Announce {
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Run local checks: config readable, identity valid, relay reachable.
    Diagnose,
    /// Run the REST façade bound to a local port.
    Serve {
        #[arg(long, default_value_t = 8788)]
        port: u16,
    },
    /// Run the relay server bound to a local port.
    Relay {
        #[arg(long, default_value_t = 8787)]
        port: u16,
        /// Public keys of agents this relay stores undelivered messages for.
        #[arg(long = "storage-peer")]
        storage_peers: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum PeersAction {
    /// Add or update a peer.
    Add {
        public_key: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "address")]
        addresses: Vec<String>,
        #[arg(long)]
        webhook_token: Option<String>,
    },
    /// List known peers.
    List,
    /// Remove a peer.
    Remove { public_key: String },
    /// Ask the relay for its peer directory.
    Discover {
        /// The relay's own public key, so the request can be addressed
        /// to it specifically (per the relay's peer-directory gate).
        #[arg(long)]
        relay_identity: String,
    },
}
