//! Time-decayed trust scoring (§4.J). A pure function of the
//! verifications handed to it; it never reads the log itself.

use crate::record::VerificationRecord;

const MS_PER_DAY: f64 = 86_400_000.0;
/// Chosen so `decay(70 days) ≈ 0.5`.
const HALF_LIFE_DAYS: f64 = 70.0;
const DECAY_LAMBDA: f64 = std::f64::consts::LN_2 / HALF_LIFE_DAYS;

fn decay(delta_ms: i64) -> f64 {
    let days = delta_ms.max(0) as f64 / MS_PER_DAY;
    (-DECAY_LAMBDA * days).exp()
}

/// The result of scoring one agent in one domain at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub score: f64,
    pub verification_count: usize,
    pub last_verified: Option<i64>,
    /// Up to 5 verifier public keys, ranked by total contribution to the
    /// score, ties broken by first appearance in `verifications`.
    pub top_verifiers: Vec<String>,
}

const NEUTRAL_SCORE: f64 = 0.5;
const MAX_TOP_VERIFIERS: usize = 5;

/// Scores an agent from the (already filtered: target + domain +
/// non-revoked) verifications handed in. Verifications outside that
/// filter must be excluded by the caller — see
/// [`crate::log::ReputationLog::active_verifications_for`].
pub fn score(verifications: &[VerificationRecord], now: i64) -> Score {
    if verifications.is_empty() {
        return Score {
            score: NEUTRAL_SCORE,
            verification_count: 0,
            last_verified: None,
            top_verifiers: Vec::new(),
        };
    }

    let mut weighted_sum = 0.0;
    let mut last_verified = i64::MIN;
    let mut verifier_order: Vec<String> = Vec::new();
    let mut contribution_by_verifier: std::collections::HashMap<String, f64> = std::collections::HashMap::new();

    for v in verifications {
        let d = decay(now - v.timestamp);
        let signed_term = v.verdict.weight() * v.confidence * d;
        weighted_sum += signed_term;
        last_verified = last_verified.max(v.timestamp);

        if !contribution_by_verifier.contains_key(&v.verifier) {
            verifier_order.push(v.verifier.clone());
        }
        *contribution_by_verifier.entry(v.verifier.clone()).or_insert(0.0) += signed_term.abs();
    }

    let n = verifications.len() as f64;
    let raw = (weighted_sum / n.max(1.0) + 1.0) / 2.0;
    let clamped = raw.clamp(0.0, 1.0);

    let mut ranked: Vec<(String, f64)> = verifier_order
        .into_iter()
        .map(|key| {
            let contribution = contribution_by_verifier[&key];
            (key, contribution)
        })
        .collect();
    // `sort_by` is stable, so entries with equal contribution keep their
    // original (first-appearance) relative order.
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    Score {
        score: clamped,
        verification_count: verifications.len(),
        last_verified: Some(last_verified),
        top_verifiers: ranked.into_iter().take(MAX_TOP_VERIFIERS).map(|(k, _)| k).collect(),
    }
}
