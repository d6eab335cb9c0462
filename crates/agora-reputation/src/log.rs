//! The append-only reputation log (§4.I): a local, line-delimited file
//! of tagged records. The log is the sole source of truth; every index
//! below is rebuilt from it on each query.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::record::{CommitRecord, Record, RevealRecord, RevocationRecord, VerificationRecord};

#[derive(Debug, Error)]
pub enum LogError {
    #[error("I/O error accessing the reputation log: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize a reputation record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to canonicalize a reputation record: {0}")]
    Canon(#[from] agora_canon::CanonError),
}

/// An append-only line-delimited reputation log rooted at a single file.
#[derive(Debug, Clone)]
pub struct ReputationLog {
    path: PathBuf,
}

impl ReputationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Appends `record` as one canonical-JSON line. Writes the full line
    /// in a single `write_all` call so a concurrent reader never
    /// observes a half-written record.
    pub fn append(&self, record: &Record) -> Result<(), LogError> {
        let value = serde_json::to_value(record)?;
        let mut line = agora_canon::canonicalize(&value)?;
        line.push(b'\n');
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Reads every well-formed record in insertion order. Malformed
    /// lines are skipped, never rewritten.
    pub fn read_all(&self) -> Result<Vec<Record>, LogError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed reputation log line");
                }
            }
        }
        Ok(records)
    }

    fn revoked_ids(records: &[Record]) -> std::collections::HashSet<&str> {
        records
            .iter()
            .filter_map(|r| match r {
                Record::Revocation(rev) => Some(rev.verification_id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn verifications_for(&self, target: &str) -> Result<Vec<VerificationRecord>, LogError> {
        let records = self.read_all()?;
        Ok(records
            .into_iter()
            .filter_map(|r| match r {
                Record::Verification(v) if v.target == target => Some(v),
                _ => None,
            })
            .collect())
    }

    /// Verifications for `target` that have not been revoked, optionally
    /// restricted to `domain`. This is the set trust scoring consumes.
    pub fn active_verifications_for(
        &self,
        target: &str,
        domain: Option<&str>,
    ) -> Result<Vec<VerificationRecord>, LogError> {
        let records = self.read_all()?;
        let revoked = Self::revoked_ids(&records);
        Ok(records
            .iter()
            .filter_map(|r| match r {
                Record::Verification(v) if v.target == target => Some(v),
                _ => None,
            })
            .filter(|v| domain.map_or(true, |d| v.domain == d))
            .filter(|v| !revoked.contains(v.id.as_str()))
            .cloned()
            .collect())
    }

    pub fn verifications_by(
        &self,
        verifier: &str,
        domain: Option<&str>,
    ) -> Result<Vec<VerificationRecord>, LogError> {
        let records = self.read_all()?;
        Ok(records
            .into_iter()
            .filter_map(|r| match r {
                Record::Verification(v) if v.verifier == verifier => Some(v),
                _ => None,
            })
            .filter(|v| domain.map_or(true, |d| v.domain == d))
            .collect())
    }

    pub fn commit_by_id(&self, id: &str) -> Result<Option<CommitRecord>, LogError> {
        let records = self.read_all()?;
        Ok(records.into_iter().find_map(|r| match r {
            Record::Commit(c) if c.id == id => Some(c),
            _ => None,
        }))
    }

    pub fn reveal_for_commit(&self, commit_id: &str) -> Result<Option<RevealRecord>, LogError> {
        let records = self.read_all()?;
        Ok(records.into_iter().find_map(|r| match r {
            Record::Reveal(rv) if rv.commitment_id == commit_id => Some(rv),
            _ => None,
        }))
    }

    pub fn revocations_for(&self, verifier: &str) -> Result<Vec<RevocationRecord>, LogError> {
        let records = self.read_all()?;
        Ok(records
            .into_iter()
            .filter_map(|r| match r {
                Record::Revocation(rv) if rv.verifier == verifier => Some(rv),
                _ => None,
            })
            .collect())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use agora_crypto::Keypair;
    use agora_types::Verdict;

    fn verification(verifier: &Keypair, target: &str, verdict: Verdict) -> Record {
        Record::Verification(
            record::create_verification(&verifier.public_hex(), &verifier.private_hex(), target, "coding", verdict, 0.8, None)
                .unwrap(),
        )
    }

    #[test]
    fn append_then_read_all_preserves_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReputationLog::new(dir.path().join("reputation.log"));
        let verifier = Keypair::generate();

        let a = verification(&verifier, "agent-a", Verdict::Correct);
        let b = verification(&verifier, "agent-b", Verdict::Incorrect);
        log.append(&a).unwrap();
        log.append(&b).unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records, vec![a, b]);
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reputation.log");
        let log = ReputationLog::new(&path);
        let verifier = Keypair::generate();
        log.append(&verification(&verifier, "agent-a", Verdict::Correct)).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"not json\n").unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn revoked_verification_is_excluded_from_active_set() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReputationLog::new(dir.path().join("reputation.log"));
        let verifier = Keypair::generate();

        let v = record::create_verification(&verifier.public_hex(), &verifier.private_hex(), "agent-a", "coding", Verdict::Correct, 0.8, None).unwrap();
        let v_id = v.id.clone();
        log.append(&Record::Verification(v)).unwrap();

        assert_eq!(log.active_verifications_for("agent-a", None).unwrap().len(), 1);

        let revocation = record::create_revocation(&verifier.public_hex(), &verifier.private_hex(), &v_id, "retracted", None).unwrap();
        log.append(&Record::Revocation(revocation)).unwrap();

        assert_eq!(log.active_verifications_for("agent-a", None).unwrap().len(), 0);
        assert_eq!(log.verifications_for("agent-a").unwrap().len(), 1);
    }

    #[test]
    fn commit_and_reveal_are_indexed_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReputationLog::new(dir.path().join("reputation.log"));
        let agent = Keypair::generate();

        let commit = record::create_commit(&agent.public_hex(), &agent.private_hex(), "coding", "42", 9_999_999_999_999).unwrap();
        log.append(&Record::Commit(commit.clone())).unwrap();
        let reveal = record::create_reveal(&agent.public_hex(), &agent.private_hex(), &commit.id, "42", "correct", None).unwrap();
        log.append(&Record::Reveal(reveal.clone())).unwrap();

        assert_eq!(log.commit_by_id(&commit.id).unwrap(), Some(commit.clone()));
        assert_eq!(log.reveal_for_commit(&commit.id).unwrap(), Some(reveal));
    }
}
