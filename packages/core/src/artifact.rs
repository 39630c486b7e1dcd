//! Artifact identifiers: stored image payloads addressed by id.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub Ulid);

impl ArtifactId {
    /// Create a new unique artifact ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse an artifact ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which slot of a job an artifact fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// The uploaded photo.
    Original,
    /// The transform output.
    Staged,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Original => write!(f, "original"),
            ArtifactKind::Staged => write!(f, "staged"),
        }
    }
}
