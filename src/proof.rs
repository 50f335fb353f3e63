//! Content-addressed proof attachment storage
//!
//! Receipts photos and signed slips stay out of the queue database. They are
//! written here under their SHA256 hash and the queued record carries only the
//! [`ProofRef`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use crate::error::ProofError;

const PREFIX: &str = "sha256-";

/// Reference to a stored proof, `sha256-<64 hex chars>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProofRef(String);

impl ProofRef {
    /// Reference for the given bytes
    pub fn for_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(format!("{}{}", PREFIX, hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digest(&self) -> &str {
        &self.0[PREFIX.len()..]
    }
}

impl fmt::Display for ProofRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProofRef {
    type Err = ProofError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digest = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| ProofError::InvalidRef(s.to_string()))?;
        if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProofError::InvalidRef(s.to_string()));
        }
        Ok(Self(format!("{}{}", PREFIX, digest.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for ProofRef {
    type Error = ProofError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ProofRef> for String {
    fn from(r: ProofRef) -> Self {
        r.0
    }
}

/// Directory-backed proof store
pub struct ProofStore {
    root_dir: PathBuf,
}

impl ProofStore {
    pub async fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self, ProofError> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(&root_dir).await?;
        info!(path = %root_dir.display(), "Initialized proof store");
        Ok(Self { root_dir })
    }

    fn path_for(&self, proof: &ProofRef) -> PathBuf {
        let digest = proof.digest();
        self.root_dir.join(&digest[..2]).join(proof.as_str())
    }

    /// Store bytes, returning their reference. Storing the same bytes twice is a no-op.
    pub async fn put(&self, data: &[u8]) -> Result<ProofRef, ProofError> {
        let proof = ProofRef::for_bytes(data);
        let path = self.path_for(&proof);

        if fs::metadata(&path).await.is_ok() {
            debug!(proof = %proof, "Proof already stored");
            return Ok(proof);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write then rename so a crash never leaves a truncated file under the final name
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &path).await?;

        info!(proof = %proof, size = data.len(), "Stored proof");
        Ok(proof)
    }

    pub async fn get(&self, proof: &ProofRef) -> Result<Option<Vec<u8>>, ProofError> {
        match fs::read(self.path_for(proof)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn contains(&self, proof: &ProofRef) -> bool {
        fs::metadata(self.path_for(proof)).await.is_ok()
    }

    /// Delete a proof. Missing proofs are not an error.
    pub async fn remove(&self, proof: &ProofRef) -> Result<bool, ProofError> {
        match fs::remove_file(self.path_for(proof)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
