use serde::{Deserialize, Serialize};

/// The outcome a verifier assigns to a target's output in a verification
/// record (see the reputation ledger's `Verification` record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Incorrect,
    Disputed,
}

impl Verdict {
    /// The directional weight this verdict contributes to a trust score:
    /// `+1` for `correct`, `-1` for `incorrect`, `0` for `disputed`.
    pub fn weight(self) -> f64 {
        match self {
            Self::Correct => 1.0,
            Self::Incorrect => -1.0,
            Self::Disputed => 0.0,
        }
    }
}
