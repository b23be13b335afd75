//! Distributable artifacts produced by the build stage.
//!
//! An `ArtifactSet` is built once per run and shared read-only with every
//! later stage. The pipeline never inspects artifact contents beyond hashing
//! them for the audit manifest.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A single built file
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    filename: String,
    content: Vec<u8>,
}

impl Artifact {
    /// Create a new artifact from a file name and its bytes
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn size_bytes(&self) -> u64 {
        self.content.len() as u64
    }

    /// Hex-encoded SHA-256 of the content
    pub fn sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.content))
    }
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("filename", &self.filename)
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}

/// Rejected artifact sets
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactSetError {
    #[error("build produced no artifacts")]
    Empty,

    #[error("build produced duplicate artifact name: {0}")]
    DuplicateName(String),

    #[error("artifact has an empty file name")]
    EmptyName,
}

/// Ordered, non-empty collection of artifacts for one version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    artifacts: Vec<Artifact>,
}

impl ArtifactSet {
    /// Validate and wrap the builder's output, preserving its order
    pub fn new(artifacts: Vec<Artifact>) -> Result<Self, ArtifactSetError> {
        if artifacts.is_empty() {
            return Err(ArtifactSetError::Empty);
        }

        let mut seen = HashSet::new();
        for artifact in &artifacts {
            if artifact.filename.is_empty() {
                return Err(ArtifactSetError::EmptyName);
            }
            if !seen.insert(artifact.filename.as_str()) {
                return Err(ArtifactSetError::DuplicateName(artifact.filename.clone()));
            }
        }

        Ok(Self { artifacts })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn filenames(&self) -> Vec<&str> {
        self.artifacts.iter().map(|a| a.filename()).collect()
    }

    pub fn total_bytes(&self) -> u64 {
        self.artifacts.iter().map(Artifact::size_bytes).sum()
    }

    /// Digest over the ordered (name, content) pairs
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for artifact in &self.artifacts {
            hasher.update((artifact.filename.len() as u64).to_le_bytes());
            hasher.update(artifact.filename.as_bytes());
            hasher.update((artifact.content.len() as u64).to_le_bytes());
            hasher.update(&artifact.content);
        }
        hex::encode(hasher.finalize())
    }

    /// Content-free description for the audit trail
    pub fn manifest(&self) -> Vec<ManifestEntry> {
        self.artifacts
            .iter()
            .map(|a| ManifestEntry {
                filename: a.filename.clone(),
                size_bytes: a.size_bytes(),
                sha256: a.sha256(),
            })
            .collect()
    }
}

/// One line of the persisted artifact manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wheel() -> Artifact {
        Artifact::new("pkg-1.2.0-py3-none-any.whl", b"wheel bytes".to_vec())
    }

    fn sdist() -> Artifact {
        Artifact::new("pkg-1.2.0.tar.gz", b"sdist bytes".to_vec())
    }

    #[test]
    fn test_empty_set_rejected() {
        assert_eq!(ArtifactSet::new(vec![]), Err(ArtifactSetError::Empty));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ArtifactSet::new(vec![wheel(), wheel()]);
        assert!(matches!(result, Err(ArtifactSetError::DuplicateName(_))));
    }

    #[test]
    fn test_order_preserved() {
        let set = ArtifactSet::new(vec![sdist(), wheel()]).unwrap();
        assert_eq!(
            set.filenames(),
            vec!["pkg-1.2.0.tar.gz", "pkg-1.2.0-py3-none-any.whl"]
        );
        assert_eq!(set.total_bytes(), 22);
    }

    #[test]
    fn test_digest_is_deterministic_and_order_sensitive() {
        let a = ArtifactSet::new(vec![sdist(), wheel()]).unwrap();
        let b = ArtifactSet::new(vec![sdist(), wheel()]).unwrap();
        let c = ArtifactSet::new(vec![wheel(), sdist()]).unwrap();

        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_manifest_has_no_content() {
        let set = ArtifactSet::new(vec![wheel()]).unwrap();
        let manifest = set.manifest();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].size_bytes, 11);

        let json = serde_json::to_string(&manifest).unwrap();
        assert!(!json.contains("wheel bytes"));
    }
}
