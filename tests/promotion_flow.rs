//! Corrections seen in two repositories end up in the global instructions file

use reflect::backup::BackupManager;
use reflect::learning::global::GlobalDocument;
use reflect::learning::store::LearningCandidate;
use reflect::learning::{parse_transcript, LearningLedger, LearningStatus, PromotionEngine, SignalExtractor, SignalKind};
use reflect::ReflectError;

const SESSION: &str = r#"{"role": "assistant", "content": "Installing with pip install requests", "tool_uses": [{"name": "Skill", "parameters": {"skill": "python"}}]}
{"role": "user", "content": "No, use uv instead of pip"}
not json at all
{"role": "assistant", "content": "Switched to uv."}
{"role": "user", "content": "Perfect!"}
"#;

/// Record every correction in a session the way `reflect scan` does
fn scan_into(ledger: &LearningLedger, jsonl: &str, repo: &str) -> Vec<String> {
    let transcript = parse_transcript(jsonl);
    let skill = transcript.skills_used.first().map(String::as_str);
    SignalExtractor::default()
        .signals(&transcript)
        .filter(|s| s.kind == SignalKind::Correction)
        .map(|s| ledger.record(&LearningCandidate::from_signal(&s, skill), repo).unwrap().fingerprint)
        .collect()
}

#[test]
fn test_two_repositories_promote_to_global() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let global_path = dir.path().join("CLAUDE.md");
    std::fs::write(&global_path, "# Global Instructions\n\nBe concise.\n")?;

    let ledger = LearningLedger::open(&dir.path().join("ledger.db"), 2)?;
    let first = scan_into(&ledger, SESSION, "github.com/acme/api");
    assert_eq!(first.len(), 1);
    assert_eq!(ledger.status_for(&first[0])?, Some(LearningStatus::Pending));

    let second = scan_into(&ledger, SESSION, "github.com/acme/web");
    assert_eq!(second, first);
    let fp = &first[0];
    assert_eq!(ledger.status_for(fp)?, Some(LearningStatus::PromotionEligible));

    let engine = PromotionEngine::new(
        &ledger,
        GlobalDocument::new(global_path.clone()),
        BackupManager::new(dir.path().join("backups"), 30),
    );

    let dry = engine.promote_all(true)?;
    assert_eq!(dry.total, 1);
    assert_eq!(dry.previews.len(), 1);
    assert_eq!(std::fs::read_to_string(&global_path)?, "# Global Instructions\n\nBe concise.\n");

    let report = engine.promote_all(false)?;
    assert_eq!(report.promoted, vec![fp.clone()]);
    assert!(report.failed.is_empty());

    let global = std::fs::read_to_string(&global_path)?;
    assert!(global.starts_with("# Global Instructions\n\nBe concise.\n"));
    assert!(global.contains("## From python (promoted)"));
    assert!(global.contains("Use 'uv' instead of 'pip'"));
    assert!(global.contains(&format!("fingerprint={}", fp)));
    assert_eq!(engine.global().count_blocks(fp)?, 1);

    let learning = ledger.get(fp)?.expect("learning exists");
    assert_eq!(learning.status, LearningStatus::Promoted);
    assert!(learning.promoted_at.is_some());
    assert_eq!(ledger.promotions_for(fp)?.len(), 1);

    // the pre-promotion file was kept
    let backups = BackupManager::new(dir.path().join("backups"), 30).list()?;
    assert_eq!(backups.len(), 1);
    assert_eq!(std::fs::read_to_string(&backups[0].path)?, "# Global Instructions\n\nBe concise.\n");

    // nothing left to do, and a direct retry is refused
    assert_eq!(engine.promote_all(false)?.total, 0);
    assert!(matches!(engine.promote(fp), Err(ReflectError::AlreadyPromoted { .. })));

    // a third repository only bumps the sighting counters
    scan_into(&ledger, SESSION, "github.com/acme/cli");
    assert_eq!(ledger.status_for(fp)?, Some(LearningStatus::Promoted));
    assert_eq!(engine.global().count_blocks(fp)?, 1);
    Ok(())
}

#[test]
fn test_ledger_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("ledger.db");

    let ledger = LearningLedger::open(&db, 2)?;
    let fp = scan_into(&ledger, SESSION, "repo-a").remove(0);
    ledger.close()?;

    let ledger = LearningLedger::open(&db, 2)?;
    scan_into(&ledger, SESSION, "repo-b");
    let learning = ledger.get(&fp)?.expect("learning exists");
    assert_eq!(learning.repo_count(), 2);
    assert_eq!(learning.occurrences, 2);
    assert_eq!(ledger.resolve(&fp[..6])?, fp);
    Ok(())
}

#[test]
fn test_manual_record_joins_scanned_learning() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let ledger = LearningLedger::open(&dir.path().join("ledger.db"), 2)?;

    let scanned = scan_into(&ledger, SESSION, "repo-a").remove(0);
    let manual = ledger.record(&LearningCandidate::from_text("Use uv instead of pip", Some("python")), "repo-b")?;
    assert_eq!(manual.fingerprint, scanned);
    assert_eq!(manual.status, LearningStatus::PromotionEligible);

    let eligible = ledger.list_eligible(2)?;
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].fingerprint, scanned);
    Ok(())
}
