mod cli;
mod commands;
mod error;

use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Command, PeersAction};
use error::CliError;
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value).unwrap());
            ExitCode::SUCCESS
        }
        Err(err) => {
            let body = json!({ "status": "failed", "reason": err.to_string() });
            println!("{}", serde_json::to_string_pretty(&body).unwrap());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Value, CliError> {
    let path = agora_config::resolve_path(cli.config.as_deref())?;

    match cli.command {
        Command::Init { name } => commands::init(&path, name).await,
        Command::Whoami => commands::whoami(&path).await,
        Command::Status => commands::status(&path).await,
        Command::Peers { action } => match action {
            PeersAction::Add {
                public_key,
                name,
                addresses,
                webhook_token,
            } => commands::peers_add(&path, public_key, name, addresses, webhook_token).await,
            PeersAction::List => commands::peers_list(&path).await,
            PeersAction::Remove { public_key } => commands::peers_remove(&path, public_key).await,
            PeersAction::Discover { relay_identity } => commands::peers_discover(&path, relay_identity).await,
        },
        Command::Send {
            to,
            kind,
            payload,
            in_reply_to,
        } => {
            let payload: Value = serde_json::from_str(&payload)?;
            commands::send(&path, to, kind, payload, in_reply_to).await
        }
        Command::Decode { envelope } => {
            let raw = match envelope {
                Some(raw) => raw,
                None => std::io::read_to_string(std::io::stdin())?,
            };
            commands::decode(raw).await
        }
        Command::Announce { payload } => {
            let payload: Value = serde_json::from_str(&payload)?;
            commands::announce(&path, payload).await
        }
        Command::Diagnose => commands::diagnose(&path).await,
        Command::Serve { port } => commands::serve(&path, port).await,
        Command::Relay { port, storage_peers } => commands::relay(&path, port, storage_peers).await,
    }
}
