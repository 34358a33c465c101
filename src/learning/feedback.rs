//! Review feedback log and pattern acceptance scores
//!
//! Every review decision is appended to `feedback-log.jsonl`. Scores are
//! computed from the log on demand. Logging is passive: a failure to write
//! is logged and otherwise ignored so it never interrupts a review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::detector::{Confidence, Signal, SignalKind};
use crate::error::{ReflectError, Result};
use crate::types::truncate_chars;

pub const FEEDBACK_LOG_FILE: &str = "feedback-log.jsonl";
pub const PATTERN_SCORES_FILE: &str = "pattern-scores.json";

/// Below this acceptance rate a pattern is flagged deprecated
pub const DEPRECATION_THRESHOLD: f64 = 0.20;
pub const REVIEW_THRESHOLD: f64 = 0.50;
pub const EXCELLENT_THRESHOLD: f64 = 0.80;
/// Decisions needed before a pattern gets a health verdict
pub const MIN_SAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackDecision {
    Accept,
    Modify,
    Skip,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub timestamp: DateTime<Utc>,
    pub pattern_type: SignalKind,
    pub pattern_id: String,
    pub skill_name: String,
    pub confidence_level: Confidence,
    pub decision: FeedbackDecision,
    pub signal_content: String,
    #[serde(default)]
    pub modification: Option<String>,
}

impl FeedbackEntry {
    pub fn for_signal(signal: &Signal, skill: &str, decision: FeedbackDecision, modification: Option<&str>) -> Self {
        Self {
            timestamp: Utc::now(),
            pattern_type: signal.kind,
            pattern_id: signal.pattern_id.clone(),
            skill_name: skill.to_string(),
            confidence_level: signal.confidence,
            decision,
            signal_content: truncate_chars(&signal.content, 500),
            modification: modification.map(str::to_string),
        }
    }

    /// Score bucket, e.g. `HIGH:correction`
    pub fn pattern_key(&self) -> String {
        format!("{}:{}", self.confidence_level, self.pattern_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternHealth {
    InsufficientData,
    Deprecated,
    NeedsReview,
    Healthy,
    Excellent,
}

impl PatternHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternHealth::InsufficientData => "insufficient_data",
            PatternHealth::Deprecated => "deprecated",
            PatternHealth::NeedsReview => "needs_review",
            PatternHealth::Healthy => "healthy",
            PatternHealth::Excellent => "excellent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternScore {
    pub accept_count: usize,
    pub modify_count: usize,
    pub skip_count: usize,
    pub total: usize,
    /// (accept + modify) / total
    pub acceptance_rate: f64,
    pub pure_accept_rate: f64,
    pub status: PatternHealth,
    pub skills: BTreeSet<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct FeedbackLog {
    dir: PathBuf,
}

impl FeedbackLog {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(FEEDBACK_LOG_FILE)
    }

    /// Append an entry. Returns whether it was written.
    pub fn record(&self, entry: &FeedbackEntry) -> bool {
        match self.try_record(entry) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to record review feedback: {}", e);
                false
            }
        }
    }

    fn try_record(&self, entry: &FeedbackEntry) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| ReflectError::io(&self.dir, e))?;
        let path = self.log_path();
        let line = serde_json::to_string(entry).map_err(|e| ReflectError::parse(FEEDBACK_LOG_FILE, e.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ReflectError::io(&path, e))?;
        writeln!(file, "{}", line).map_err(|e| ReflectError::io(&path, e))?;
        Ok(())
    }

    /// All readable entries, skipping malformed lines
    pub fn entries(&self) -> Result<Vec<FeedbackEntry>> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| ReflectError::io(&path, e))?;
        Ok(parse_entries(&content))
    }

    pub fn pattern_scores(&self) -> Result<BTreeMap<String, PatternScore>> {
        Ok(compute_scores(&self.entries()?))
    }

    /// Write the current scores next to the log for quick inspection
    pub fn save_scores(&self) -> Result<PathBuf> {
        let scores = self.pattern_scores()?;
        let output = serde_json::json!({
            "computed_at": Utc::now(),
            "thresholds": {
                "deprecation": DEPRECATION_THRESHOLD,
                "excellent": EXCELLENT_THRESHOLD,
                "min_samples": MIN_SAMPLES,
            },
            "patterns": scores,
        });
        std::fs::create_dir_all(&self.dir).map_err(|e| ReflectError::io(&self.dir, e))?;
        let path = self.dir.join(PATTERN_SCORES_FILE);
        let json = serde_json::to_string_pretty(&output)
            .map_err(|e| ReflectError::parse(PATTERN_SCORES_FILE, e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| ReflectError::io(&path, e))?;
        Ok(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn parse_entries(content: &str) -> Vec<FeedbackEntry> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match serde_json::from_str(l) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping feedback line: {}", e);
                None
            }
        })
        .collect()
}

fn health(total: usize, rate: f64) -> PatternHealth {
    if total < MIN_SAMPLES {
        PatternHealth::InsufficientData
    } else if rate < DEPRECATION_THRESHOLD {
        PatternHealth::Deprecated
    } else if rate < REVIEW_THRESHOLD {
        PatternHealth::NeedsReview
    } else if rate >= EXCELLENT_THRESHOLD {
        PatternHealth::Excellent
    } else {
        PatternHealth::Healthy
    }
}

pub fn compute_scores(entries: &[FeedbackEntry]) -> BTreeMap<String, PatternScore> {
    let mut scores: BTreeMap<String, PatternScore> = BTreeMap::new();

    for entry in entries {
        let score = scores.entry(entry.pattern_key()).or_insert_with(|| PatternScore {
            accept_count: 0,
            modify_count: 0,
            skip_count: 0,
            total: 0,
            acceptance_rate: 0.0,
            pure_accept_rate: 0.0,
            status: PatternHealth::InsufficientData,
            skills: BTreeSet::new(),
            last_seen: None,
        });
        match entry.decision {
            FeedbackDecision::Accept => score.accept_count += 1,
            FeedbackDecision::Modify => score.modify_count += 1,
            FeedbackDecision::Skip | FeedbackDecision::Quit => score.skip_count += 1,
        }
        score.total += 1;
        score.skills.insert(entry.skill_name.clone());
        score.last_seen = score.last_seen.max(Some(entry.timestamp));
    }

    for score in scores.values_mut() {
        let total = score.total as f64;
        score.acceptance_rate = (score.accept_count + score.modify_count) as f64 / total;
        score.pure_accept_rate = score.accept_count as f64 / total;
        score.status = health(score.total, score.acceptance_rate);
    }
    scores
}
