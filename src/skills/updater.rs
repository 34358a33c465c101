//! Skill update applier
//!
//! Turns accepted signals into bullet entries in a skill document. Writes
//! run under a [`MutationGuard`](crate::backup::MutationGuard): the file is
//! snapshotted, written, re-read and validated, and the snapshot is put
//! back if any of that fails.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::document::{section_for, SkillDocument};
use crate::backup::BackupManager;
use crate::diff::unified_diff;
use crate::error::{ReflectError, Result};
use crate::learning::detector::{Confidence, Signal};

/// Extra structural check run on the re-read document
pub type Validator = Box<dyn Fn(&SkillDocument) -> std::result::Result<(), String>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposedEntry {
    pub section: String,
    pub text: String,
    pub confidence: Confidence,
}

/// Entries proposed for one skill, highest confidence first
#[derive(Debug, Clone, Serialize)]
pub struct ProposedUpdate {
    pub skill: String,
    pub path: PathBuf,
    pub entries: Vec<ProposedEntry>,
    #[serde(skip)]
    pub signals: Vec<Signal>,
}

impl ProposedUpdate {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, confidence: Confidence) -> usize {
        self.entries.iter().filter(|e| e.confidence == confidence).count()
    }

    /// Replace the proposal with a single reviewer-written entry, filed
    /// where the strongest proposed entry would have gone
    pub fn with_replacement(&self, text: &str) -> Self {
        let mut replaced = self.clone();
        let confidence = self.entries.first().map(|e| e.confidence).unwrap_or(Confidence::High);
        replaced.entries = vec![ProposedEntry {
            section: section_for(confidence).to_string(),
            text: text.trim().to_string(),
            confidence,
        }];
        replaced
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    pub skill: String,
    pub path: PathBuf,
    pub added: usize,
    pub backup: Option<PathBuf>,
}

pub struct SkillUpdater {
    backups: BackupManager,
    validator: Option<Validator>,
}

impl SkillUpdater {
    pub fn new(backups: BackupManager) -> Self {
        Self { backups, validator: None }
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&SkillDocument) -> std::result::Result<(), String> + 'static,
    {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Entries the signals would add to `doc`, skipping ones already there
    pub fn propose(&self, skill: &str, path: &Path, doc: Option<&SkillDocument>, signals: &[Signal]) -> ProposedUpdate {
        let mut ordered: Vec<&Signal> = signals.iter().collect();
        ordered.sort_by(|a, b| b.confidence.cmp(&a.confidence));

        let mut entries: Vec<ProposedEntry> = Vec::new();
        for signal in ordered {
            let section = section_for(signal.confidence);
            let text = signal.description();
            let known = doc.map(|d| d.contains_entry(section, &text)).unwrap_or(false);
            let duplicate = entries.iter().any(|e| e.section == section && e.text.eq_ignore_ascii_case(&text));
            if known || duplicate {
                debug!("Skipping known entry for {}: {}", skill, text);
                continue;
            }
            entries.push(ProposedEntry { section: section.to_string(), text, confidence: signal.confidence });
        }

        ProposedUpdate {
            skill: skill.to_string(),
            path: path.to_path_buf(),
            entries,
            signals: signals.to_vec(),
        }
    }

    /// Load the current document (if any) and propose against it
    pub fn propose_for_file(&self, skill: &str, path: &Path, signals: &[Signal]) -> Result<ProposedUpdate> {
        let current = load_existing(path)?;
        Ok(self.propose(skill, path, current.as_ref(), signals))
    }

    /// Unified diff of the file as it is against the file as proposed
    pub fn render_diff(&self, proposal: &ProposedUpdate) -> Result<String> {
        let (current, updated, _) = self.proposed_document(proposal)?;
        let label = format!("{}/SKILL.md", proposal.skill);
        Ok(unified_diff(
            &current,
            &updated.to_markdown(),
            &format!("{} (current)", label),
            &format!("{} (proposed)", label),
            3,
        ))
    }

    /// Write the proposal to disk under a mutation guard
    pub fn apply(&self, proposal: &ProposedUpdate) -> Result<ApplyOutcome> {
        let path = proposal.path.as_path();
        let (_, updated, added) = self.proposed_document(proposal)?;
        if added == 0 {
            debug!("Nothing new to add to {}", path.display());
            return Ok(ApplyOutcome { skill: proposal.skill.clone(), path: path.to_path_buf(), added, backup: None });
        }

        let guard = self.backups.begin(path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ReflectError::io(parent, e))?;
        }
        std::fs::write(path, updated.to_markdown()).map_err(|e| ReflectError::io(path, e))?;

        // returning early drops the guard, which restores the snapshot
        let written = SkillDocument::load(path).map_err(|e| ReflectError::validation(path, e.to_string()))?;
        let required: Vec<&str> = proposal.entries.iter().map(|e| e.section.as_str()).collect();
        written
            .validate(&required)
            .map_err(|message| ReflectError::validation(path, message))?;
        if let Some(validator) = &self.validator {
            validator(&written).map_err(|message| ReflectError::validation(path, message))?;
        }

        let backup = guard.commit().map(|b| b.path);
        info!("Added {} entries to {}", added, path.display());
        Ok(ApplyOutcome { skill: proposal.skill.clone(), path: path.to_path_buf(), added, backup })
    }

    /// (current text, updated document, entries actually added)
    fn proposed_document(&self, proposal: &ProposedUpdate) -> Result<(String, SkillDocument, usize)> {
        let path = proposal.path.as_path();
        let (current_text, mut doc) = match load_existing(path)? {
            Some(doc) => (doc.to_markdown(), doc),
            None => (
                String::new(),
                SkillDocument::new(&proposal.skill, &format!("Learned conventions for {}", proposal.skill)),
            ),
        };

        let mut added = 0;
        for entry in &proposal.entries {
            if !doc.contains_entry(&entry.section, &entry.text) {
                doc.append_entry(&entry.section, &entry.text);
                added += 1;
            }
        }
        Ok((current_text, doc, added))
    }
}

fn load_existing(path: &Path) -> Result<Option<SkillDocument>> {
    if path.exists() {
        SkillDocument::load(path).map(Some)
    } else {
        Ok(None)
    }
}
