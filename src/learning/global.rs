//! Global instructions file - append-only target of promoted learnings
//!
//! Every promoted block ends with an attribution marker carrying its
//! fingerprint, which is how the file is checked for duplicates.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ReflectError, Result};

const MARKER_TAG: &str = "reflect:promoted";

static MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<!-- reflect:promoted fingerprint=([0-9a-f]+)\b[^>]*-->").expect("Valid promotion marker regex")
});

/// Content of one promoted block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotedBlock {
    pub fingerprint: String,
    pub skill: String,
    pub description: String,
    pub repo_count: usize,
    pub date: String,
}

impl PromotedBlock {
    pub fn new(fingerprint: &str, skill: &str, description: &str, repo_count: usize, at: DateTime<Utc>) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            skill: skill.to_string(),
            description: description.trim().to_string(),
            repo_count,
            date: at.format("%Y-%m-%d").to_string(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "## From {} (promoted)\n\n{}\n\n<!-- {} fingerprint={} skill={} repos={} date={} -->",
            self.skill,
            self.description,
            MARKER_TAG,
            self.fingerprint,
            self.skill.replace(' ', "-"),
            self.repo_count,
            self.date
        )
    }
}

/// The global file learnings are promoted into
#[derive(Debug, Clone)]
pub struct GlobalDocument {
    path: PathBuf,
}

impl GlobalDocument {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents, empty when the file does not exist yet
    pub fn read(&self) -> Result<String> {
        if !self.path.exists() {
            return Ok(String::new());
        }
        std::fs::read_to_string(&self.path).map_err(|e| ReflectError::io(&self.path, e))
    }

    /// Fingerprints of every promoted block, in file order
    pub fn promoted_fingerprints(&self) -> Result<Vec<String>> {
        Ok(marker_fingerprints(&self.read()?))
    }

    /// Number of blocks carrying `fingerprint`
    pub fn count_blocks(&self, fingerprint: &str) -> Result<usize> {
        Ok(self.promoted_fingerprints()?.iter().filter(|fp| *fp == fingerprint).count())
    }

    /// Append a block, creating the file with a header if needed
    pub fn append_block(&self, block: &PromotedBlock) -> Result<()> {
        let existing = self.read()?;
        let existing = if existing.trim().is_empty() { default_header() } else { existing };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ReflectError::io(parent, e))?;
        }
        let new_content = format!("{}\n\n{}\n", existing.trim_end(), block.render());
        std::fs::write(&self.path, new_content).map_err(|e| ReflectError::io(&self.path, e))?;
        debug!("Appended block {} to {}", block.fingerprint, self.path.display());
        Ok(())
    }
}

/// Header written when the global file is created
pub fn default_header() -> String {
    "# Global Instructions\n\n_Learnings promoted after being confirmed across repositories._\n".to_string()
}

pub fn marker_fingerprints(content: &str) -> Vec<String> {
    MARKER
        .captures_iter(content)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn block(fp: &str) -> PromotedBlock {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        PromotedBlock::new(fp, "python", "Use 'uv' instead of 'pip'", 2, at)
    }

    #[test]
    fn test_render_block() {
        let rendered = block("0123456789abcdef").render();
        assert!(rendered.starts_with("## From python (promoted)\n\nUse 'uv' instead of 'pip'\n\n"));
        assert!(rendered.ends_with(
            "<!-- reflect:promoted fingerprint=0123456789abcdef skill=python repos=2 date=2024-05-01 -->"
        ));
    }

    #[test]
    fn test_append_creates_file_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let doc = GlobalDocument::new(dir.path().join("CLAUDE.md"));
        doc.append_block(&block("0123456789abcdef")).unwrap();

        let content = doc.read().unwrap();
        assert!(content.starts_with("# Global Instructions"));
        assert_eq!(doc.count_blocks("0123456789abcdef").unwrap(), 1);
        assert_eq!(doc.count_blocks("fedcba9876543210").unwrap(), 0);
    }

    #[test]
    fn test_append_preserves_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CLAUDE.md");
        std::fs::write(&path, "# Mine\n\nKeep this.\n").unwrap();
        let doc = GlobalDocument::new(path);

        doc.append_block(&block("0123456789abcdef")).unwrap();
        doc.append_block(&block("fedcba9876543210")).unwrap();

        let content = doc.read().unwrap();
        assert!(content.starts_with("# Mine\n\nKeep this.\n\n## From python"));
        assert_eq!(
            doc.promoted_fingerprints().unwrap(),
            vec!["0123456789abcdef", "fedcba9876543210"]
        );
    }
}
