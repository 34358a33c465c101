//! CLI interface for reflect

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::backup::BackupManager;
use crate::config::{self, Config};
use crate::learning::detector::{group_by_skill, Confidence, SignalExtractor, SignalKind};
use crate::learning::feedback::FeedbackLog;
use crate::learning::fingerprint::current_repo_id;
use crate::learning::global::GlobalDocument;
use crate::learning::promotion::PromotionEngine;
use crate::learning::scope::ScopeAnalyzer;
use crate::learning::store::{Learning, LearningCandidate, LearningLedger, RecordAction};
use crate::learning::transcript::{find_latest_transcript, load_transcript};
use crate::skills::review::{AutoApprove, ReviewSession, Reviewer, TerminalReviewer};
use crate::skills::updater::SkillUpdater;

#[derive(Parser)]
#[command(name = "reflect")]
#[command(about = "Learn from conversation feedback: update skills and promote cross-repo learnings", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: platform config dir, or $REFLECT_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG still applies)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON where supported
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show ledger statistics
    Stats,
    /// List learnings eligible for promotion
    List {
        /// Repository count that makes a learning eligible
        #[arg(short, long)]
        threshold: Option<usize>,
        /// List every learning instead
        #[arg(short, long)]
        all: bool,
    },
    /// Show the block that promoting a learning would append
    Preview {
        /// Fingerprint or unique prefix
        fingerprint: String,
    },
    /// Promote a learning to the global file
    Promote {
        /// Fingerprint or unique prefix
        fingerprint: String,
    },
    /// Promote every eligible learning
    All {
        /// Show what would be promoted without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete every learning from the ledger
    Reset {
        /// Required to actually delete
        #[arg(long)]
        confirm: bool,
    },
    /// Scan a transcript for signals and review skill updates
    Scan {
        /// Transcript file (default: $TRANSCRIPT_PATH or the newest session transcript)
        transcript: Option<PathBuf>,
        /// Apply proposals without asking
        #[arg(long)]
        auto: bool,
        /// Do not record corrections in the ledger
        #[arg(long)]
        no_record: bool,
        /// Skills directory override
        #[arg(long)]
        skill_dir: Option<PathBuf>,
        /// Repository identifier override
        #[arg(long)]
        repo: Option<String>,
    },
    /// Record a learning by hand
    Record {
        /// The learning, e.g. "Use uv instead of pip"
        content: String,
        /// Originating skill
        #[arg(short, long)]
        skill: Option<String>,
        /// Repository identifier override
        #[arg(short, long)]
        repo: Option<String>,
    },
    /// Search learnings
    Search {
        /// Search query
        query: String,
        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Recommend skill or global scope for a learning
    Analyze {
        /// The learning text
        content: String,
        /// Skill the learning came from
        #[arg(short, long, default_value = "general")]
        skill: String,
    },
    /// Show review acceptance rates per pattern tier
    Feedback {
        /// Also write pattern-scores.json
        #[arg(long)]
        save: bool,
    },
    /// List backups
    Backups {
        /// Delete backups past the retention window
        #[arg(long)]
        sweep: bool,
    },
    /// Show or initialise the configuration
    Config {
        /// Print the effective configuration (default)
        #[arg(long, conflicts_with = "init")]
        show: bool,
        /// Write a default configuration file
        #[arg(long)]
        init: bool,
    },
}

/// Resolved configuration plus constructors for the components it drives
struct App {
    config: Config,
    config_path: PathBuf,
    json: bool,
}

impl App {
    fn ledger(&self) -> Result<LearningLedger> {
        let path = &self.config.paths.ledger_db;
        let ledger = LearningLedger::open(path, self.config.promotion.threshold)
            .with_context(|| format!("Failed to open learning ledger at {}", path.display()))?;
        Ok(ledger.with_normalizer(self.config.fingerprint.clone()))
    }

    fn backups(&self) -> BackupManager {
        BackupManager::from_config(self.config.paths.backups_dir.clone(), &self.config.backup)
    }

    fn global(&self) -> GlobalDocument {
        GlobalDocument::new(self.config.paths.global_file.clone())
    }

    fn feedback(&self) -> FeedbackLog {
        FeedbackLog::new(self.config.paths.feedback_dir.clone())
    }

    fn print_json<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = match cli.config {
        Some(path) => path,
        None => config::config_path()?,
    };
    let config = Config::load_from(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    let app = App { config, config_path, json: cli.json };

    match cli.command {
        Commands::Stats => stats(&app),
        Commands::List { threshold, all } => list(&app, threshold, all),
        Commands::Preview { fingerprint } => preview(&app, &fingerprint),
        Commands::Promote { fingerprint } => promote(&app, &fingerprint),
        Commands::All { dry_run } => promote_all(&app, dry_run),
        Commands::Reset { confirm } => reset(&app, confirm),
        Commands::Scan { transcript, auto, no_record, skill_dir, repo } => {
            scan(&app, transcript, auto, no_record, skill_dir, repo)
        }
        Commands::Record { content, skill, repo } => record(&app, &content, skill.as_deref(), repo),
        Commands::Search { query, limit } => search(&app, &query, limit),
        Commands::Analyze { content, skill } => analyze(&app, &content, &skill),
        Commands::Feedback { save } => feedback(&app, save),
        Commands::Backups { sweep } => backups(&app, sweep),
        Commands::Config { init, .. } => config_command(&app, init),
    }
}

fn stats(app: &App) -> Result<()> {
    let ledger = app.ledger()?;
    let stats = ledger.stats()?;
    if app.json {
        return app.print_json(&stats);
    }

    println!("Learning Ledger");
    println!("===============");
    println!("Total learnings: {}", stats.total);
    for (status, count) in &stats.by_status {
        println!("  {}: {}", status, count);
    }
    println!("Seen in 2+ repos: {}", stats.multi_repo);
    println!("Eligible for promotion: {}", stats.promotion_eligible);
    println!("Promotions: {}", stats.total_promotions);
    if !stats.by_skill.is_empty() {
        println!();
        println!("By skill:");
        for (skill, count) in &stats.by_skill {
            println!("  {}: {}", skill, count);
        }
    }
    println!();
    println!("Ledger: {}", app.config.paths.ledger_db.display());
    ledger.close()?;
    Ok(())
}

fn print_learning(learning: &Learning) {
    println!(
        "  {} [{}] repos={} seen={} ({}) - {}",
        learning.fingerprint,
        learning.status,
        learning.repo_count(),
        learning.occurrences,
        learning.skill_or_general(),
        crate::types::truncate_chars(&learning.description, 80)
    );
}

fn print_learnings(app: &App, learnings: &[Learning], empty: &str) -> Result<()> {
    if app.json {
        return app.print_json(&learnings);
    }
    if learnings.is_empty() {
        println!("{}", empty);
    } else {
        println!("{} learnings:", learnings.len());
        for learning in learnings {
            print_learning(learning);
        }
    }
    Ok(())
}

fn list(app: &App, threshold: Option<usize>, all: bool) -> Result<()> {
    let ledger = app.ledger()?;
    let learnings = if all {
        ledger.list_all()?
    } else {
        ledger.list_eligible(threshold.unwrap_or(app.config.promotion.threshold))?
    };
    print_learnings(app, &learnings, "No learnings eligible for promotion.")?;
    ledger.close()?;
    Ok(())
}

fn preview(app: &App, fingerprint: &str) -> Result<()> {
    let ledger = app.ledger()?;
    let engine = PromotionEngine::new(&ledger, app.global(), app.backups());
    let preview = engine.preview(fingerprint)?;
    if app.json {
        return app.print_json(&preview);
    }
    println!("Learning {} [{}], seen in {} repos", preview.fingerprint, preview.status, preview.repo_count);
    println!("Target: {}", preview.target.display());
    println!();
    println!("{}", preview.block);
    Ok(())
}

fn promote(app: &App, fingerprint: &str) -> Result<()> {
    let ledger = app.ledger()?;
    let outcome = PromotionEngine::new(&ledger, app.global(), app.backups()).promote(fingerprint)?;
    println!("Promoted {} to {}", outcome.fingerprint, app.config.paths.global_file.display());
    if let Some(backup) = &outcome.backup {
        println!("Backup: {}", backup.display());
    }
    Ok(())
}

fn promote_all(app: &App, dry_run: bool) -> Result<()> {
    let ledger = app.ledger()?;
    let report = PromotionEngine::new(&ledger, app.global(), app.backups()).promote_all(dry_run)?;
    if app.json {
        return app.print_json(&report);
    }

    if report.total == 0 {
        println!("No learnings eligible for promotion.");
        return Ok(());
    }
    if dry_run {
        println!("Would promote {} learnings:", report.previews.len());
        for preview in &report.previews {
            println!();
            println!("{}", preview.block);
        }
        return Ok(());
    }
    println!("Promoted {} of {} learnings", report.promoted.len(), report.total);
    for failure in &report.failed {
        eprintln!("  failed {}: {}", failure.fingerprint, failure.error);
    }
    Ok(())
}

fn reset(app: &App, confirm: bool) -> Result<()> {
    let ledger = app.ledger()?;
    if !confirm {
        let total = ledger.stats()?.total;
        println!("This would delete {} learnings and all promotion history.", total);
        println!("Run again with --confirm to proceed.");
        return Ok(());
    }
    let removed = ledger.reset()?;
    ledger.close()?;
    println!("Removed {} learnings.", removed);
    Ok(())
}

fn scan(
    app: &App,
    transcript: Option<PathBuf>,
    auto: bool,
    no_record: bool,
    skill_dir: Option<PathBuf>,
    repo: Option<String>,
) -> Result<()> {
    let path = match transcript.or_else(|| find_latest_transcript(&app.config.paths.session_dir)) {
        Some(path) => path,
        None => bail!(
            "No transcript given and none found under {}",
            app.config.paths.session_dir.display()
        ),
    };
    let transcript = load_transcript(&path)?;

    let signals: Vec<_> = SignalExtractor::default().signals(&transcript).collect();
    if signals.is_empty() {
        println!("No signals detected in {}", path.display());
        return Ok(());
    }

    let mut tiers: BTreeMap<Confidence, usize> = BTreeMap::new();
    for signal in &signals {
        *tiers.entry(signal.confidence).or_default() += 1;
    }
    println!("Signals in {}:", path.display());
    for (confidence, count) in tiers.iter().rev() {
        println!("  {}: {}", confidence, count);
    }

    if !no_record {
        let ledger = app.ledger()?;
        let repo_id = repo.unwrap_or_else(current_repo_id);
        let skill = transcript.skills_used.first().map(String::as_str);
        let mut recorded = 0;
        for signal in signals.iter().filter(|s| s.kind == SignalKind::Correction) {
            ledger.record(&LearningCandidate::from_signal(signal, skill), &repo_id)?;
            recorded += 1;
        }
        ledger.close()?;
        if recorded > 0 {
            println!("Recorded {} corrections in the ledger (repo {})", recorded, repo_id);
        }
    }

    let updater = SkillUpdater::new(app.backups());
    let mut proposals = Vec::new();
    for (skill, skill_signals) in group_by_skill(signals, &transcript.skills_used) {
        let skill_path = match &skill_dir {
            Some(dir) => dir.join(&skill).join("SKILL.md"),
            None => app.config.paths.skill_file(&skill),
        };
        match updater.propose_for_file(&skill, &skill_path, &skill_signals) {
            Ok(proposal) if proposal.is_empty() => println!("No new entries for {}", skill),
            Ok(proposal) => proposals.push(proposal),
            Err(e) => eprintln!("Skipping {}: {}", skill, e),
        }
    }
    if proposals.is_empty() {
        return Ok(());
    }

    let feedback = app.feedback();
    let session = ReviewSession::new(&updater).with_feedback(&feedback);
    let mut auto_reviewer = AutoApprove;
    let mut terminal_reviewer;
    let reviewer: &mut dyn Reviewer = if auto {
        &mut auto_reviewer
    } else {
        terminal_reviewer = TerminalReviewer::stdio();
        &mut terminal_reviewer
    };
    let summary = session.run(&proposals, reviewer)?;

    if app.json {
        return app.print_json(&summary);
    }
    for outcome in &summary.applied {
        println!("Updated {} (+{} entries)", outcome.path.display(), outcome.added);
    }
    for (skill, error) in &summary.failed {
        eprintln!("Failed to update {}: {}", skill, error);
    }
    if summary.aborted {
        println!("Review aborted");
    }
    Ok(())
}

fn record(app: &App, content: &str, skill: Option<&str>, repo: Option<String>) -> Result<()> {
    if content.trim().is_empty() {
        bail!("Learning text is empty");
    }
    let ledger = app.ledger()?;
    let repo_id = repo.unwrap_or_else(current_repo_id);
    let outcome = ledger.record(&LearningCandidate::from_text(content, skill), &repo_id)?;
    ledger.close()?;
    if app.json {
        return app.print_json(&outcome);
    }
    println!(
        "{} {} [{}] repos={} seen={}",
        match outcome.action {
            RecordAction::Created => "Created",
            RecordAction::Updated => "Updated",
        },
        outcome.fingerprint,
        outcome.status,
        outcome.repo_count,
        outcome.occurrences
    );
    Ok(())
}

fn search(app: &App, query: &str, limit: usize) -> Result<()> {
    let ledger = app.ledger()?;
    let results = ledger.search(query, limit)?;
    print_learnings(app, &results, &format!("No results for '{}'", query))
}

fn analyze(app: &App, content: &str, skill: &str) -> Result<()> {
    let ledger = app.ledger()?;
    let analysis = ScopeAnalyzer::new(app.config.promotion.threshold).analyze(content, skill, Some(&ledger))?;
    if app.json {
        return app.print_json(&analysis);
    }
    println!("Recommended scope: {}", analysis.recommended);
    for reason in &analysis.reasons {
        println!("  - {}", reason);
    }
    println!("Scores: project={:.1} global={:.1}", analysis.project_score, analysis.global_score);
    if let Some(fp) = &analysis.cross_repo.fingerprint {
        println!("Fingerprint {} seen in {} repos", fp, analysis.cross_repo.repo_count);
    }
    Ok(())
}

fn feedback(app: &App, save: bool) -> Result<()> {
    let log = app.feedback();
    let scores = log.pattern_scores()?;
    if save {
        let path = log.save_scores()?;
        eprintln!("Saved scores to {}", path.display());
    }
    if app.json {
        return app.print_json(&scores);
    }
    if scores.is_empty() {
        println!("No review feedback recorded yet.");
        return Ok(());
    }
    println!("{:<20} {:>6} {:>8} {:>8}  status", "pattern", "total", "accept", "rate");
    for (key, score) in &scores {
        println!(
            "{:<20} {:>6} {:>8} {:>7.0}%  {}",
            key,
            score.total,
            score.accept_count + score.modify_count,
            score.acceptance_rate * 100.0,
            score.status.as_str()
        );
    }
    Ok(())
}

fn backups(app: &App, sweep: bool) -> Result<()> {
    let manager = app.backups();
    if sweep {
        let removed = manager.sweep()?;
        println!("Removed {} expired backups", removed);
    }
    let backups = manager.list()?;
    if backups.is_empty() {
        println!("No backups in {}", manager.dir().display());
        return Ok(());
    }
    for backup in &backups {
        println!(
            "  {}  {}  {}",
            backup.taken_at.format("%Y-%m-%d %H:%M:%S"),
            backup.source_name,
            backup.path.display()
        );
    }
    Ok(())
}

fn config_command(app: &App, init: bool) -> Result<()> {
    if init {
        write_default_config(&app.config_path)?;
        println!("Wrote default configuration to {}", app.config_path.display());
        return Ok(());
    }
    println!("# {}", app.config_path.display());
    print!("{}", toml::to_string_pretty(&app.config)?);
    Ok(())
}

fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("Configuration already exists at {}", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, config::default_config_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
