//! Last-Known-Good policy store.
//!
//! Persists the most recently successfully-applied policy so the daemon can
//! fail open (install nothing) rather than fail closed when it cannot
//! determine what should currently be installed (spec.md §4.6).
//!
//! Writes are atomic (write to a temp file, `fsync`, `rename` over the
//! target) and the persisted envelope carries a SHA-256 checksum so a torn
//! write or disk corruption is detected rather than silently trusted.

use std::fs::{self, File};
use std::io::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use portcullis_shared::errors::{PortcullisError, PortcullisResult};

use crate::policy::Policy;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    checksum: String,
    policy: Policy,
}

fn checksum_of(policy: &Policy) -> PortcullisResult<String> {
    let bytes = serde_json::to_vec(policy)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Write `policy` to `path` atomically, alongside a SHA-256 checksum.
pub fn save(path: &Path, tmp_path: &Path, policy: &Policy) -> PortcullisResult<()> {
    let envelope = Envelope {
        checksum: checksum_of(policy)?,
        policy: policy.clone(),
    };
    let bytes = serde_json::to_vec_pretty(&envelope)?;

    let mut file = File::create(tmp_path)
        .map_err(|e| PortcullisError::IoError(format!("create LKG tmp file: {e}")))?;
    file.write_all(&bytes)
        .map_err(|e| PortcullisError::IoError(format!("write LKG tmp file: {e}")))?;
    file.sync_all()
        .map_err(|e| PortcullisError::IoError(format!("fsync LKG tmp file: {e}")))?;
    drop(file);

    fs::rename(tmp_path, path)
        .map_err(|e| PortcullisError::IoError(format!("rename LKG file into place: {e}")))?;
    Ok(())
}

/// Outcome of attempting to load the LKG store.
pub enum LoadOutcome {
    /// No LKG file exists yet -- a fresh install, not an error.
    Absent,
    /// A policy was loaded and its checksum matched.
    Present(Policy),
    /// A file exists but failed to parse or its checksum did not match.
    /// Callers must treat this the same as `Absent` for fail-open startup,
    /// while still surfacing the reason for diagnostics/audit.
    Corrupt(String),
}

/// Load the LKG policy, verifying its checksum.
pub fn load(path: &Path) -> LoadOutcome {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LoadOutcome::Absent,
        Err(e) => return LoadOutcome::Corrupt(format!("read LKG file: {e}")),
    };

    let envelope: Envelope = match serde_json::from_slice(&bytes) {
        Ok(e) => e,
        Err(e) => return LoadOutcome::Corrupt(format!("parse LKG file: {e}")),
    };

    let expected = match checksum_of(&envelope.policy) {
        Ok(c) => c,
        Err(e) => return LoadOutcome::Corrupt(format!("recompute checksum: {e}")),
    };
    if expected != envelope.checksum {
        return LoadOutcome::Corrupt("checksum mismatch".to_string());
    }

    LoadOutcome::Present(envelope.policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Action, Rule};
    use chrono::Utc;

    fn sample_policy() -> Policy {
        Policy {
            version: "1.0.0".into(),
            default_action: Action::Allow,
            updated_at: Utc::now(),
            rules: Vec::<Rule>::new(),
        }
    }

    #[test]
    fn roundtrips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lkg.json");
        let tmp = dir.path().join("lkg.json.tmp");

        let policy = sample_policy();
        save(&path, &tmp, &policy).unwrap();
        assert!(!tmp.exists(), "tmp file should be renamed away");

        match load(&path) {
            LoadOutcome::Present(loaded) => assert_eq!(loaded, policy),
            _ => panic!("expected Present"),
        }
    }

    #[test]
    fn missing_file_is_absent_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.json");
        assert!(matches!(load(&path), LoadOutcome::Absent));
    }

    #[test]
    fn tampered_checksum_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lkg.json");
        let tmp = dir.path().join("lkg.json.tmp");
        save(&path, &tmp, &sample_policy()).unwrap();

        let mut envelope: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        envelope["policy"]["version"] = serde_json::json!("tampered");
        fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();

        assert!(matches!(load(&path), LoadOutcome::Corrupt(_)));
    }
}
