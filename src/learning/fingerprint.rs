//! Fingerprints and repository identity
//!
//! A fingerprint identifies a learning regardless of which repository or
//! session produced it. Equivalence is exact match after normalisation; the
//! alias table is the only place synonyms collapse.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Hex characters kept from the SHA-256 digest
pub const FINGERPRINT_LEN: usize = 16;

/// Hex characters kept for repository identifiers
pub const REPO_ID_LEN: usize = 12;

/// Normalisation rules applied before hashing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Normalizer {
    #[serde(default = "default_true")]
    pub case_fold: bool,
    #[serde(default = "default_true")]
    pub collapse_whitespace: bool,
    /// Strip trailing `.,!?;:` from the whole text
    #[serde(default)]
    pub strip_punctuation: bool,
    /// Word-level substitutions applied after case folding (e.g. pip3 -> pip)
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            case_fold: true,
            collapse_whitespace: true,
            strip_punctuation: false,
            aliases: BTreeMap::new(),
        }
    }
}

impl Normalizer {
    /// Normalise text into the canonical form that gets hashed
    pub fn normalize(&self, text: &str) -> String {
        let mut out = if self.case_fold { text.to_lowercase() } else { text.to_string() };

        if self.collapse_whitespace {
            out = out.split_whitespace().collect::<Vec<_>>().join(" ");
        }

        if !self.aliases.is_empty() {
            // without collapsing, only single-space separated words are aliased
            out = out
                .split(' ')
                .map(|w| self.alias_for(w).unwrap_or(w))
                .collect::<Vec<_>>()
                .join(" ");
        }

        if self.strip_punctuation {
            out = out.trim_end_matches(['.', ',', '!', '?', ';', ':']).to_string();
        }
        out
    }

    fn alias_for(&self, word: &str) -> Option<&str> {
        let key = if self.case_fold { word.to_lowercase() } else { word.to_string() };
        self.aliases.get(&key).map(String::as_str)
    }

    /// Fingerprint of free text
    pub fn fingerprint(&self, text: &str) -> String {
        hash_hex(&self.normalize(text), FINGERPRINT_LEN)
    }
}

/// Fingerprint with the default normalisation rules
pub fn fingerprint(text: &str) -> String {
    Normalizer::default().fingerprint(text)
}

/// Canonical text for an old/new value pair.
///
/// Both values present renders "use NEW instead of OLD" so that a correction
/// typed as free text and one extracted from a transcript collapse together.
pub fn canonical_key(old: Option<&str>, new: Option<&str>, description: &str) -> String {
    match (old, new) {
        (Some(old), Some(new)) => format!("use {} instead of {}", new, old),
        (Some(old), None) => format!("never {}", old),
        (None, Some(new)) => format!("always {}", new),
        (None, None) => description.to_string(),
    }
}

fn hash_hex(text: &str, len: usize) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(len);
    hex
}

/// Stable identifier of the repository rooted at (or containing) `dir`.
///
/// Hashes the `origin` remote URL when git knows one, otherwise the
/// canonical directory path.
pub fn repo_id_for(dir: &Path) -> String {
    let remote = std::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["remote", "get-url", "origin"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|url| !url.is_empty());

    match remote {
        Some(url) => repo_id_from_remote(&url),
        None => {
            let canonical = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
            debug!("No git remote for {}, using path identity", canonical.display());
            hash_hex(&canonical.to_string_lossy(), REPO_ID_LEN)
        }
    }
}

/// Repository identifier derived from a remote URL
pub fn repo_id_from_remote(url: &str) -> String {
    hash_hex(url.trim(), REPO_ID_LEN)
}

/// Repository identifier of the current working directory
pub fn current_repo_id() -> String {
    let cwd = std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf());
    repo_id_for(&cwd)
}
