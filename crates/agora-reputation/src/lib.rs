//! The reputation ledger: signed, content-addressed records (§4.H), an
//! append-only log store (§4.I), and time-decayed trust scoring (§4.J).

pub mod log;
pub mod record;
pub mod score;

pub use log::{LogError, ReputationLog};
pub use record::{
    create_commit, create_reveal, create_revocation, create_verification, validate_commit,
    validate_reveal, validate_revocation, validate_verification, verify_reveal_matches,
    CommitRecord, Record, RevealMismatch, RevealRecord, RevocationRecord, ValidationError,
    VerificationRecord,
};
pub use score::{score, Score};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use agora_crypto::Keypair;
    use agora_types::Verdict;

    #[test]
    fn commit_reveal_round_trip_feeds_into_an_unrelated_verification_score() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReputationLog::new(dir.path().join("reputation.log"));
        let predictor = Keypair::generate();
        let verifier = Keypair::generate();

        let commit = create_commit(&predictor.public_hex(), &predictor.private_hex(), "forecasting", "rain tomorrow", 9_999_999_999_999).unwrap();
        log.append(&Record::Commit(commit.clone())).unwrap();
        let reveal = create_reveal(&predictor.public_hex(), &predictor.private_hex(), &commit.id, "rain tomorrow", "correct", None).unwrap();
        log.append(&Record::Reveal(reveal.clone())).unwrap();
        assert_eq!(verify_reveal_matches(&commit, &reveal), Ok(()));

        let verification = create_verification(
            &verifier.public_hex(),
            &verifier.private_hex(),
            &predictor.public_hex(),
            "forecasting",
            Verdict::Correct,
            1.0,
            None,
        )
        .unwrap();
        log.append(&Record::Verification(verification)).unwrap();

        let active = log.active_verifications_for(&predictor.public_hex(), Some("forecasting")).unwrap();
        let result = score(&active, active[0].timestamp);
        assert_eq!(result.verification_count, 1);
        assert!(result.score > 0.5);
        assert_eq!(result.top_verifiers, vec![verifier.public_hex()]);
    }

    #[test]
    fn revoking_the_only_verification_returns_the_target_to_neutral() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReputationLog::new(dir.path().join("reputation.log"));
        let verifier = Keypair::generate();
        let target = "agent-x";

        let verification = create_verification(&verifier.public_hex(), &verifier.private_hex(), target, "coding", Verdict::Incorrect, 1.0, None).unwrap();
        let v_id = verification.id.clone();
        log.append(&Record::Verification(verification)).unwrap();

        let before = log.active_verifications_for(target, None).unwrap();
        assert_eq!(score(&before, 0).verification_count, 1);

        let revocation = create_revocation(&verifier.public_hex(), &verifier.private_hex(), &v_id, "mistaken", None).unwrap();
        log.append(&Record::Revocation(revocation)).unwrap();

        let after = log.active_verifications_for(target, None).unwrap();
        let result = score(&after, 0);
        assert_eq!(result.verification_count, 0);
        assert_eq!(result.score, 0.5);
    }
}
