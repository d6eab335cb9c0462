use serde::Serialize;

/// Which component published an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventDomain {
    /// The relay server: registrations, routing, presence, storage.
    Relay,
    /// The persistent relay client: connection lifecycle, presence.
    Client,
    /// The reputation ledger: appended records.
    Reputation,
}

impl std::fmt::Display for EventDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Relay => "relay",
            Self::Client => "client",
            Self::Reputation => "reputation",
        };
        f.write_str(s)
    }
}

/// Structured payloads published on an [`crate::EventBus`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventPayload {
    /// A new agent registered with the relay.
    PeerConnected { public_key: String },
    /// A previously connected agent registered or disconnected.
    PeerOnline { public_key: String },
    PeerOffline { public_key: String },
    /// A message was forwarded or enqueued for a recipient.
    MessageRelayed { from: String, to: String },
    /// A buffered store-and-forward queue was flushed to its recipient.
    StorageDelivered { recipient: String, count: usize },
    /// A per-frame error was reported back to a connection.
    RelayError { message: String },
    /// The relay client finished registering with a relay.
    Connected { public_key: String },
    /// The relay client's socket closed.
    Disconnected,
    /// The relay client scheduled a reconnect attempt.
    Reconnecting { attempt: u32 },
    /// A record was appended to the reputation log.
    RecordAppended { kind: &'static str, id: String },
}
