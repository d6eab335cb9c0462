use serde::{Deserialize, Serialize};

/// The closed set of envelope kinds the core recognizes.
///
/// An envelope carrying a kind outside this set is not an error: it is
/// represented as [`MessageType::Unknown`] and routed unchanged, since
/// routing never depends on parsing the payload (see the envelope
/// invariants in the core specification).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum MessageType {
    Announce,
    Discover,
    Request,
    Response,
    Publish,
    Subscribe,
    Verify,
    Ack,
    Error,
    PaperDiscovery,
    CapabilityAnnounce,
    CapabilityQuery,
    CapabilityResponse,
    PeerListRequest,
    PeerListResponse,
    PeerReferral,
    Commit,
    Reveal,
    Verification,
    Revocation,
    /// Any kind not in the closed set above. The core must still accept,
    /// verify, and route envelopes of unknown kind.
    Unknown(String),
}

impl MessageType {
    /// The wire string for this kind, as used in `id`/signature preimages
    /// and JSON serialization.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Announce => "announce",
            Self::Discover => "discover",
            Self::Request => "request",
            Self::Response => "response",
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
            Self::Verify => "verify",
            Self::Ack => "ack",
            Self::Error => "error",
            Self::PaperDiscovery => "paper_discovery",
            Self::CapabilityAnnounce => "capability_announce",
            Self::CapabilityQuery => "capability_query",
            Self::CapabilityResponse => "capability_response",
            Self::PeerListRequest => "peer_list_request",
            Self::PeerListResponse => "peer_list_response",
            Self::PeerReferral => "peer_referral",
            Self::Commit => "commit",
            Self::Reveal => "reveal",
            Self::Verification => "verification",
            Self::Revocation => "revocation",
            Self::Unknown(raw) => raw,
        }
    }
}

impl From<&str> for MessageType {
    fn from(raw: &str) -> Self {
        match raw {
            "announce" => Self::Announce,
            "discover" => Self::Discover,
            "request" => Self::Request,
            "response" => Self::Response,
            "publish" => Self::Publish,
            "subscribe" => Self::Subscribe,
            "verify" => Self::Verify,
            "ack" => Self::Ack,
            "error" => Self::Error,
            "paper_discovery" => Self::PaperDiscovery,
            "capability_announce" => Self::CapabilityAnnounce,
            "capability_query" => Self::CapabilityQuery,
            "capability_response" => Self::CapabilityResponse,
            "peer_list_request" => Self::PeerListRequest,
            "peer_list_response" => Self::PeerListResponse,
            "peer_referral" => Self::PeerReferral,
            "commit" => Self::Commit,
            "reveal" => Self::Reveal,
            "verification" => Self::Verification,
            "revocation" => Self::Revocation,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for MessageType {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
