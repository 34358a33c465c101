//! Promotion Engine - promotes multi-repository learnings to the global file
//!
//! Learnings confirmed in enough repositories are appended to the global
//! instructions file as attributed blocks and marked promoted in the ledger.
//! Each promotion runs under a [`MutationGuard`](crate::backup::MutationGuard)
//! so a failed write or ledger update leaves the file as it was.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::global::{GlobalDocument, PromotedBlock};
use super::store::{Learning, LearningLedger, LearningStatus};
use crate::backup::BackupManager;
use crate::error::{ReflectError, Result};

/// What a promotion would write, computed without touching any file
#[derive(Debug, Clone, Serialize)]
pub struct PromotionPreview {
    pub fingerprint: String,
    pub description: String,
    pub skill: String,
    pub repo_count: usize,
    pub status: LearningStatus,
    pub target: PathBuf,
    pub block: String,
}

/// Result of a successful promotion
#[derive(Debug, Clone, Serialize)]
pub struct PromotionOutcome {
    pub fingerprint: String,
    pub block: String,
    /// Snapshot of the global file taken before the append
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromotionFailure {
    pub fingerprint: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PromotionReport {
    pub total: usize,
    pub promoted: Vec<String>,
    pub failed: Vec<PromotionFailure>,
    /// Blocks that would be written, filled only on dry runs
    pub previews: Vec<PromotionPreview>,
    pub dry_run: bool,
}

/// The promotion engine
pub struct PromotionEngine<'a> {
    ledger: &'a LearningLedger,
    global: GlobalDocument,
    backups: BackupManager,
    threshold: usize,
}

impl<'a> PromotionEngine<'a> {
    pub fn new(ledger: &'a LearningLedger, global: GlobalDocument, backups: BackupManager) -> Self {
        let threshold = ledger.threshold();
        Self { ledger, global, backups, threshold }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    pub fn global(&self) -> &GlobalDocument {
        &self.global
    }

    /// Render the block `promote` would append
    pub fn preview(&self, fingerprint: &str) -> Result<PromotionPreview> {
        let learning = self.load(fingerprint)?;
        Ok(self.preview_for(&learning, Utc::now()))
    }

    fn preview_for(&self, learning: &Learning, at: DateTime<Utc>) -> PromotionPreview {
        PromotionPreview {
            fingerprint: learning.fingerprint.clone(),
            description: learning.description.clone(),
            skill: learning.skill_or_general().to_string(),
            repo_count: learning.repo_count(),
            status: learning.status,
            target: self.global.path().to_path_buf(),
            block: render_block(learning, at).render(),
        }
    }

    /// Append a learning to the global file and mark it promoted
    pub fn promote(&self, fingerprint: &str) -> Result<PromotionOutcome> {
        let learning = self.load(fingerprint)?;
        self.check_eligible(&learning)?;
        let fingerprint = learning.fingerprint.as_str();
        let block = render_block(&learning, Utc::now());

        let guard = self.backups.begin(self.global.path())?;

        if self.global.count_blocks(fingerprint)? == 0 {
            self.global.append_block(&block)?;
        } else {
            // left behind by an interrupted promotion
            info!("Global file already holds {}, skipping append", fingerprint);
        }

        let count = self.global.count_blocks(fingerprint)?;
        if count != 1 {
            return Err(ReflectError::validation(
                self.global.path(),
                format!("expected one block for {}, found {}", fingerprint, count),
            ));
        }

        let target = self.global.path().display().to_string();
        let reason = format!("Seen in {} repos", learning.repo_count());
        self.ledger.mark_promoted(fingerprint, &target, &reason)?;

        let backup = guard.commit().map(|b| b.path);
        info!("Promoted {} to {} ({})", fingerprint, target, reason);

        Ok(PromotionOutcome { fingerprint: fingerprint.to_string(), block: block.render(), backup })
    }

    /// Promote every eligible learning. Failures are isolated per learning;
    /// only a ledger storage error aborts the pass.
    pub fn promote_all(&self, dry_run: bool) -> Result<PromotionReport> {
        let candidates = self.ledger.list_eligible(self.threshold)?;
        let mut report = PromotionReport { total: candidates.len(), dry_run, ..Default::default() };

        if candidates.is_empty() {
            debug!("No learnings eligible for promotion");
            return Ok(report);
        }

        let now = Utc::now();
        for learning in candidates {
            if dry_run {
                report.previews.push(self.preview_for(&learning, now));
                continue;
            }
            match self.promote(&learning.fingerprint) {
                Ok(outcome) => report.promoted.push(outcome.fingerprint),
                Err(e @ ReflectError::StoreIo(_)) => return Err(e),
                Err(e) => {
                    if e.is_precondition() {
                        debug!("Skipping {}: {}", learning.fingerprint, e);
                    } else {
                        warn!("Failed to promote {}: {}", learning.fingerprint, e);
                    }
                    report.failed.push(PromotionFailure {
                        fingerprint: learning.fingerprint.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Promotion pass complete: {} of {} promoted{}",
            report.promoted.len(),
            report.total,
            if dry_run { " (dry run)" } else { "" }
        );
        Ok(report)
    }

    fn load(&self, fingerprint: &str) -> Result<Learning> {
        let fingerprint = self.ledger.resolve(fingerprint)?;
        self.ledger
            .get(&fingerprint)?
            .ok_or(ReflectError::NotFound { fingerprint })
    }

    fn check_eligible(&self, learning: &Learning) -> Result<()> {
        match learning.status {
            LearningStatus::Promoted => Err(ReflectError::AlreadyPromoted {
                fingerprint: learning.fingerprint.clone(),
            }),
            LearningStatus::PromotionEligible => Ok(()),
            LearningStatus::Pending if learning.repo_count() >= self.threshold => Ok(()),
            LearningStatus::Pending => Err(ReflectError::NotEligible {
                fingerprint: learning.fingerprint.clone(),
                reason: format!("seen in {} of {} required repos", learning.repo_count(), self.threshold),
            }),
        }
    }
}

fn render_block(learning: &Learning, at: DateTime<Utc>) -> PromotedBlock {
    PromotedBlock::new(
        &learning.fingerprint,
        learning.skill_or_general(),
        &learning.description,
        learning.repo_count(),
        at,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::store::LearningCandidate;
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        global: PathBuf,
        backups: PathBuf,
        ledger: LearningLedger,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("CLAUDE.md");
        let backups = dir.path().join("backups");
        Fixture { global, backups, ledger: LearningLedger::open_in_memory(2).unwrap(), _dir: dir }
    }

    fn engine(f: &Fixture) -> PromotionEngine<'_> {
        PromotionEngine::new(
            &f.ledger,
            GlobalDocument::new(f.global.clone()),
            BackupManager::new(f.backups.clone(), 30),
        )
    }

    fn record_in(ledger: &LearningLedger, text: &str, repos: &[&str]) -> String {
        let c = LearningCandidate::from_text(text, Some("python"));
        let mut fp = String::new();
        for repo in repos {
            fp = ledger.record(&c, repo).unwrap().fingerprint;
        }
        fp
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap_or_default()
    }

    #[test]
    fn test_promote_then_already_promoted() {
        let f = fixture();
        let fp = record_in(&f.ledger, "Use uv instead of pip", &["A", "B"]);
        let engine = engine(&f);

        let outcome = engine.promote(&fp).unwrap();
        assert!(outcome.block.starts_with("## From python (promoted)"));
        assert_eq!(f.ledger.status_for(&fp).unwrap(), Some(LearningStatus::Promoted));

        let err = engine.promote(&fp).unwrap_err();
        assert!(matches!(err, ReflectError::AlreadyPromoted { .. }));
        assert_eq!(engine.global().count_blocks(&fp).unwrap(), 1);
    }

    #[test]
    fn test_preview_matches_promoted_block() {
        let f = fixture();
        let fp = record_in(&f.ledger, "Use uv instead of pip", &["A", "B"]);
        let engine = engine(&f);

        let preview = engine.preview(&fp[..8]).unwrap();
        assert_eq!(preview.fingerprint, fp);
        assert_eq!(preview.repo_count, 2);
        assert!(!f.global.exists());

        let outcome = engine.promote(&fp).unwrap();
        assert_eq!(outcome.block, preview.block);
        assert!(read(&f.global).contains(&preview.block));
    }

    #[test]
    fn test_pending_learning_not_eligible() {
        let f = fixture();
        std::fs::write(&f.global, "# Global\n").unwrap();
        let fp = record_in(&f.ledger, "Use uv instead of pip", &["A"]);

        let err = engine(&f).promote(&fp).unwrap_err();
        assert!(matches!(err, ReflectError::NotEligible { .. }));
        assert_eq!(read(&f.global), "# Global\n");
        assert_eq!(f.ledger.status_for(&fp).unwrap(), Some(LearningStatus::Pending));
    }

    #[test]
    fn test_unknown_fingerprint() {
        let f = fixture();
        assert!(matches!(engine(&f).promote("abcdef"), Err(ReflectError::NotFound { .. })));
    }

    #[test]
    fn test_existing_block_is_not_duplicated() {
        let f = fixture();
        let fp = record_in(&f.ledger, "Use uv instead of pip", &["A", "B"]);
        let engine = engine(&f);

        // block written by an earlier run that never reached the ledger
        engine.global().append_block(&render_block(&f.ledger.get(&fp).unwrap().unwrap(), Utc::now())).unwrap();

        engine.promote(&fp).unwrap();
        assert_eq!(engine.global().count_blocks(&fp).unwrap(), 1);
        assert_eq!(f.ledger.status_for(&fp).unwrap(), Some(LearningStatus::Promoted));
    }

    #[test]
    fn test_promote_backs_up_existing_file() {
        let f = fixture();
        std::fs::write(&f.global, "# Global\n").unwrap();
        let fp = record_in(&f.ledger, "Use uv instead of pip", &["A", "B"]);

        let outcome = engine(&f).promote(&fp).unwrap();
        let backup = outcome.backup.unwrap();
        assert_eq!(read(&backup), "# Global\n");
    }

    #[test]
    fn test_promote_all_dry_run_writes_nothing() {
        let f = fixture();
        record_in(&f.ledger, "Use uv instead of pip", &["A", "B"]);
        record_in(&f.ledger, "Use ruff instead of flake8", &["A", "B"]);

        let report = engine(&f).promote_all(true).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.total, 2);
        assert_eq!(report.previews.len(), 2);
        assert!(report.promoted.is_empty());
        assert!(!f.global.exists());
        assert_eq!(f.ledger.list_eligible(2).unwrap().len(), 2);
    }

    #[test]
    fn test_ledger_failure_restores_global_file() {
        let f = fixture();
        let db = f.backups.with_file_name("ledger.db");
        let writer = LearningLedger::open(&db, 2).unwrap();
        let fp = record_in(&writer, "Use uv instead of pip", &["A", "B"]);
        writer.close().unwrap();
        std::fs::write(&f.global, "# Global\n").unwrap();

        let ledger = LearningLedger::open_read_only(&db, 2).unwrap();
        let engine = PromotionEngine::new(
            &ledger,
            GlobalDocument::new(f.global.clone()),
            BackupManager::new(f.backups.clone(), 30),
        );
        let err = engine.promote(&fp).unwrap_err();
        assert!(matches!(err, ReflectError::StoreIo(_)));

        assert_eq!(read(&f.global), "# Global\n");
        assert_eq!(engine.global().count_blocks(&fp).unwrap(), 0);
        assert_eq!(ledger.status_for(&fp).unwrap(), Some(LearningStatus::PromotionEligible));
        assert!(ledger.promotions_for(&fp).unwrap().is_empty());
    }

    #[test]
    fn test_promote_all_isolates_failures() {
        let f = fixture();
        let ok = record_in(&f.ledger, "Use uv instead of pip", &["A", "B"]);
        let clashing = record_in(&f.ledger, "Use ruff instead of flake8", &["A", "B"]);

        // two copies of one block make that promotion fail validation
        let learning = f.ledger.get(&clashing).unwrap().unwrap();
        let doc = GlobalDocument::new(f.global.clone());
        doc.append_block(&render_block(&learning, Utc::now())).unwrap();
        doc.append_block(&render_block(&learning, Utc::now())).unwrap();
        let before = read(&f.global);

        let report = engine(&f).promote_all(false).unwrap();
        assert_eq!(report.promoted, vec![ok.clone()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].fingerprint, clashing);
        assert_eq!(f.ledger.status_for(&clashing).unwrap(), Some(LearningStatus::PromotionEligible));
        assert!(read(&f.global).starts_with(before.trim_end()));
        assert_eq!(doc.count_blocks(&ok).unwrap(), 1);
    }
}
