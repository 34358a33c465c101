//! Learning Ledger - SQLite persistence of learnings across repositories
//!
//! Each learning is keyed by its fingerprint. Recording the same learning
//! from another repository grows its repository set; once the set reaches
//! the promotion threshold the learning becomes eligible for promotion to
//! the global file. Status never moves backwards.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

use super::detector::{Confidence, PatternBank, Signal, SignalKind};
use super::fingerprint::{canonical_key, Normalizer};
use crate::error::{ReflectError, Result};

/// Lifecycle of a learning in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningStatus {
    Pending,
    PromotionEligible,
    Promoted,
}

impl LearningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningStatus::Pending => "pending",
            LearningStatus::PromotionEligible => "promotion_eligible",
            LearningStatus::Promoted => "promoted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LearningStatus::Pending),
            "promotion_eligible" => Some(LearningStatus::PromotionEligible),
            "promoted" => Some(LearningStatus::Promoted),
            _ => None,
        }
    }
}

impl std::fmt::Display for LearningStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Something worth remembering, before it has a fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningCandidate {
    pub description: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub kind: SignalKind,
    pub confidence: Confidence,
    pub skill: Option<String>,
}

impl LearningCandidate {
    pub fn from_signal(signal: &Signal, skill: Option<&str>) -> Self {
        Self {
            description: signal.description(),
            old_value: signal.old_value.clone(),
            new_value: signal.new_value.clone(),
            kind: signal.kind,
            confidence: signal.confidence,
            skill: skill.map(str::to_string),
        }
    }

    /// Build a candidate from a free-text statement. Values are pulled out
    /// with the high-confidence correction rules so that "Use uv instead of
    /// pip" and a transcript correction with the same values share a key.
    pub fn from_text(text: &str, skill: Option<&str>) -> Self {
        let text = text.trim();
        let values = PatternBank::shared()
            .rules()
            .iter()
            .filter(|r| r.confidence == Confidence::High && r.kind == SignalKind::Correction)
            .find_map(|r| r.regex.captures(text).map(|caps| (r.extract)(&caps)));
        let (old_value, new_value) = values.unwrap_or((None, None));

        Self {
            description: text.to_string(),
            old_value,
            new_value,
            kind: SignalKind::Correction,
            confidence: Confidence::High,
            skill: skill.map(str::to_string),
        }
    }

    /// Text that is normalised and hashed into the fingerprint
    pub fn key(&self) -> String {
        canonical_key(self.old_value.as_deref(), self.new_value.as_deref(), &self.description)
    }
}

/// A persisted learning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    pub fingerprint: String,
    pub description: String,
    pub kind: SignalKind,
    pub confidence: Confidence,
    pub originating_skill: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub status: LearningStatus,
    pub seen_in_repos: BTreeSet<String>,
    pub occurrences: u64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub promoted_at: Option<DateTime<Utc>>,
}

impl Learning {
    pub fn repo_count(&self) -> usize {
        self.seen_in_repos.len()
    }

    pub fn skill_or_general(&self) -> &str {
        self.originating_skill.as_deref().unwrap_or("general")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
    Created,
    Updated,
}

/// Result of [`LearningLedger::record`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub action: RecordAction,
    pub fingerprint: String,
    pub repo_count: usize,
    pub occurrences: u64,
    pub status: LearningStatus,
}

/// One row of promotion history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub id: String,
    pub fingerprint: String,
    pub target: String,
    pub reason: String,
    pub promoted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_skill: BTreeMap<String, usize>,
    /// Learnings seen in at least two repositories
    pub multi_repo: usize,
    pub promotion_eligible: usize,
    pub total_promotions: usize,
}

const LEARNING_COLUMNS: &str = "fingerprint, description, kind, confidence, skill, old_value, \
     new_value, status, occurrences, first_seen_at, last_seen_at, promoted_at";

/// SQLite-backed learning ledger
pub struct LearningLedger {
    conn: Connection,
    threshold: usize,
    normalizer: Normalizer,
}

impl std::fmt::Debug for LearningLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearningLedger")
            .field("path", &self.conn.path())
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl LearningLedger {
    /// Open (and initialise on first use) the ledger at `path`
    pub fn open(path: &Path, threshold: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ReflectError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init_schema(&conn)?;
        debug!("Opened learning ledger at {}", path.display());
        Ok(Self { conn, threshold: threshold.max(1), normalizer: Normalizer::default() })
    }

    /// Ledger that lives only as long as the value
    pub fn open_in_memory(threshold: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn, threshold: threshold.max(1), normalizer: Normalizer::default() })
    }

    /// Read-only view of an existing ledger file; every write fails
    #[cfg(test)]
    pub(crate) fn open_read_only(path: &Path, threshold: usize) -> Result<Self> {
        // a read-only handle cannot create the WAL side files
        Connection::open(path)?.execute_batch("PRAGMA journal_mode=DELETE;")?;
        let conn = Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn, threshold: threshold.max(1), normalizer: Normalizer::default() })
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS learnings (
                fingerprint TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                kind TEXT NOT NULL,
                confidence TEXT NOT NULL,
                skill TEXT,
                old_value TEXT,
                new_value TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                occurrences INTEGER NOT NULL DEFAULT 1,
                first_seen_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                promoted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS learning_repos (
                fingerprint TEXT NOT NULL,
                repo_id TEXT NOT NULL,
                first_seen_at TEXT NOT NULL,
                PRIMARY KEY (fingerprint, repo_id),
                FOREIGN KEY (fingerprint) REFERENCES learnings(fingerprint) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS promotions (
                id TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL,
                target TEXT NOT NULL,
                reason TEXT NOT NULL,
                promoted_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_learnings_status ON learnings(status);
            CREATE INDEX IF NOT EXISTS idx_learnings_skill ON learnings(skill);
            CREATE INDEX IF NOT EXISTS idx_learnings_last_seen ON learnings(last_seen_at DESC);
            "#,
        )?;
        Ok(())
    }

    /// Fingerprint a candidate with this ledger's normalisation rules
    pub fn fingerprint_of(&self, candidate: &LearningCandidate) -> String {
        self.normalizer.fingerprint(&candidate.key())
    }

    /// Record `candidate` as seen in `repo_id`
    pub fn record(&self, candidate: &LearningCandidate, repo_id: &str) -> Result<RecordOutcome> {
        self.record_at(candidate, repo_id, Utc::now())
    }

    pub fn record_at(
        &self,
        candidate: &LearningCandidate,
        repo_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome> {
        let fingerprint = self.fingerprint_of(candidate);
        let ts = timestamp(now);
        let tx = self.conn.unchecked_transaction()?;

        let existing: Option<(String, i64)> = tx
            .query_row(
                "SELECT status, occurrences FROM learnings WHERE fingerprint = ?1",
                params![fingerprint],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (action, mut status, occurrences) = match existing {
            None => {
                tx.execute(
                    "INSERT INTO learnings (fingerprint, description, kind, confidence, skill, \
                     old_value, new_value, status, occurrences, first_seen_at, last_seen_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', 1, ?8, ?8)",
                    params![
                        fingerprint,
                        candidate.description,
                        candidate.kind.as_str(),
                        candidate.confidence.as_str(),
                        candidate.skill,
                        candidate.old_value,
                        candidate.new_value,
                        ts,
                    ],
                )?;
                (RecordAction::Created, LearningStatus::Pending, 1)
            }
            Some((status, occurrences)) => {
                tx.execute(
                    "UPDATE learnings SET occurrences = occurrences + 1, last_seen_at = ?2, \
                     skill = COALESCE(skill, ?3) WHERE fingerprint = ?1",
                    params![fingerprint, ts, candidate.skill],
                )?;
                let status = LearningStatus::parse(&status).unwrap_or(LearningStatus::Pending);
                (RecordAction::Updated, status, occurrences as u64 + 1)
            }
        };

        tx.execute(
            "INSERT OR IGNORE INTO learning_repos (fingerprint, repo_id, first_seen_at) VALUES (?1, ?2, ?3)",
            params![fingerprint, repo_id, ts],
        )?;
        let repo_count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM learning_repos WHERE fingerprint = ?1",
            params![fingerprint],
            |row| row.get(0),
        )?;
        let repo_count = repo_count as usize;

        if status == LearningStatus::Pending && repo_count >= self.threshold {
            tx.execute(
                "UPDATE learnings SET status = 'promotion_eligible' WHERE fingerprint = ?1",
                params![fingerprint],
            )?;
            status = LearningStatus::PromotionEligible;
            info!("Learning {} is now eligible for promotion ({} repos)", fingerprint, repo_count);
        }

        tx.commit()?;

        match action {
            RecordAction::Created => info!("Recorded learning {}: {}", fingerprint, candidate.description),
            RecordAction::Updated => debug!("Learning {} seen again ({} occurrences)", fingerprint, occurrences),
        }

        Ok(RecordOutcome { action, fingerprint, repo_count, occurrences, status })
    }

    /// Current status, `None` for an unknown fingerprint
    pub fn status_for(&self, fingerprint: &str) -> Result<Option<LearningStatus>> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM learnings WHERE fingerprint = ?1",
                params![fingerprint],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.and_then(|s| LearningStatus::parse(&s)))
    }

    pub fn get(&self, fingerprint: &str) -> Result<Option<Learning>> {
        let sql = format!("SELECT {} FROM learnings WHERE fingerprint = ?1", LEARNING_COLUMNS);
        Ok(self.query_learnings(&sql, params![fingerprint])?.into_iter().next())
    }

    /// Expand a fingerprint prefix to the single fingerprint it names
    pub fn resolve(&self, prefix: &str) -> Result<String> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ReflectError::NotFound { fingerprint: prefix });
        }
        let mut stmt = self
            .conn
            .prepare("SELECT fingerprint FROM learnings WHERE fingerprint LIKE ?1 || '%' ORDER BY fingerprint LIMIT 2")?;
        let matches: Vec<String> = stmt
            .query_map(params![prefix], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        match matches.as_slice() {
            [] => Err(ReflectError::NotFound { fingerprint: prefix }),
            [only] => Ok(only.clone()),
            _ if matches.iter().any(|m| *m == prefix) => Ok(prefix),
            _ => Err(ReflectError::Ambiguous { prefix }),
        }
    }

    /// Learnings that may be promoted, most recently seen first
    pub fn list_eligible(&self, threshold: usize) -> Result<Vec<Learning>> {
        let sql = format!(
            "SELECT {} FROM learnings l WHERE l.status != 'promoted' AND (l.status = 'promotion_eligible' \
             OR (SELECT COUNT(*) FROM learning_repos r WHERE r.fingerprint = l.fingerprint) >= ?1) \
             ORDER BY l.last_seen_at DESC, l.fingerprint",
            LEARNING_COLUMNS
        );
        self.query_learnings(&sql, params![threshold as i64])
    }

    pub fn list_all(&self) -> Result<Vec<Learning>> {
        let sql = format!("SELECT {} FROM learnings ORDER BY last_seen_at DESC, fingerprint", LEARNING_COLUMNS);
        self.query_learnings(&sql, [])
    }

    /// Substring search over descriptions and extracted values
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<Learning>> {
        let sql = format!(
            "SELECT {} FROM learnings WHERE description LIKE '%' || ?1 || '%' ESCAPE '\\' \
             OR old_value LIKE '%' || ?1 || '%' ESCAPE '\\' \
             OR new_value LIKE '%' || ?1 || '%' ESCAPE '\\' \
             ORDER BY occurrences DESC, last_seen_at DESC LIMIT ?2",
            LEARNING_COLUMNS
        );
        self.query_learnings(&sql, params![escape_like(query.trim()), limit as i64])
    }

    pub fn learnings_for_skill(&self, skill: &str) -> Result<Vec<Learning>> {
        let sql = format!(
            "SELECT {} FROM learnings WHERE skill = ?1 ORDER BY occurrences DESC, last_seen_at DESC",
            LEARNING_COLUMNS
        );
        self.query_learnings(&sql, params![skill])
    }

    pub fn stats(&self) -> Result<LedgerStats> {
        let mut stats = LedgerStats::default();

        let mut stmt = self.conn.prepare("SELECT status, COUNT(*) FROM learnings GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            stats.total += count as usize;
            stats.by_status.insert(status, count as usize);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT COALESCE(skill, 'general'), COUNT(*) FROM learnings GROUP BY 1")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (skill, count) = row?;
            stats.by_skill.insert(skill, count as usize);
        }

        let multi_repo: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM (SELECT fingerprint FROM learning_repos GROUP BY fingerprint HAVING COUNT(*) >= 2)",
            [],
            |row| row.get(0),
        )?;
        stats.multi_repo = multi_repo as usize;
        stats.promotion_eligible = stats
            .by_status
            .get(LearningStatus::PromotionEligible.as_str())
            .copied()
            .unwrap_or(0);

        let promotions: i64 = self.conn.query_row("SELECT COUNT(*) FROM promotions", [], |row| row.get(0))?;
        stats.total_promotions = promotions as usize;

        Ok(stats)
    }

    /// Mark a learning promoted and append to the promotion history
    pub fn mark_promoted(&self, fingerprint: &str, target: &str, reason: &str) -> Result<PromotionRecord> {
        let now = Utc::now();
        let tx = self.conn.unchecked_transaction()?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM learnings WHERE fingerprint = ?1",
                params![fingerprint],
                |row| row.get(0),
            )
            .optional()?;
        match status.as_deref().and_then(LearningStatus::parse) {
            None => return Err(ReflectError::NotFound { fingerprint: fingerprint.to_string() }),
            Some(LearningStatus::Promoted) => {
                return Err(ReflectError::AlreadyPromoted { fingerprint: fingerprint.to_string() })
            }
            Some(_) => {}
        }

        let record = PromotionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            fingerprint: fingerprint.to_string(),
            target: target.to_string(),
            reason: reason.to_string(),
            promoted_at: now,
        };
        tx.execute(
            "UPDATE learnings SET status = 'promoted', promoted_at = ?2 WHERE fingerprint = ?1",
            params![fingerprint, timestamp(now)],
        )?;
        tx.execute(
            "INSERT INTO promotions (id, fingerprint, target, reason, promoted_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![record.id, record.fingerprint, record.target, record.reason, timestamp(now)],
        )?;
        tx.commit()?;

        info!("Marked learning {} as promoted", fingerprint);
        Ok(record)
    }

    pub fn promotions_for(&self, fingerprint: &str) -> Result<Vec<PromotionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, fingerprint, target, reason, promoted_at FROM promotions \
             WHERE fingerprint = ?1 ORDER BY promoted_at",
        )?;
        let records = stmt
            .query_map(params![fingerprint], |row| {
                Ok(PromotionRecord {
                    id: row.get(0)?,
                    fingerprint: row.get(1)?,
                    target: row.get(2)?,
                    reason: row.get(3)?,
                    promoted_at: parse_timestamp(4, row.get(4)?)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Delete every learning and all promotion history. Returns the number
    /// of learnings removed.
    pub fn reset(&self) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute("DELETE FROM learnings", [])?;
        tx.execute("DELETE FROM learning_repos", [])?;
        tx.execute("DELETE FROM promotions", [])?;
        tx.commit()?;
        info!("Reset learning ledger ({} learnings removed)", removed);
        Ok(removed)
    }

    /// Close the connection, surfacing any error from the final flush
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| ReflectError::StoreIo(e))
    }

    fn query_learnings<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Learning>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut learnings = stmt
            .query_map(params, learning_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for learning in &mut learnings {
            learning.seen_in_repos = self.repos_for(&learning.fingerprint)?;
        }
        Ok(learnings)
    }

    fn repos_for(&self, fingerprint: &str) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT repo_id FROM learning_repos WHERE fingerprint = ?1")?;
        let repos = stmt
            .query_map(params![fingerprint], |row| row.get(0))?
            .collect::<rusqlite::Result<BTreeSet<String>>>()?;
        Ok(repos)
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e)))
}

fn learning_from_row(row: &Row<'_>) -> rusqlite::Result<Learning> {
    let kind: String = row.get(2)?;
    let confidence: String = row.get(3)?;
    let status: String = row.get(7)?;
    let occurrences: i64 = row.get(8)?;
    let promoted_at: Option<String> = row.get(11)?;

    Ok(Learning {
        fingerprint: row.get(0)?,
        description: row.get(1)?,
        kind: SignalKind::parse(&kind).unwrap_or(SignalKind::Correction),
        confidence: Confidence::parse(&confidence).unwrap_or(Confidence::Medium),
        originating_skill: row.get(4)?,
        old_value: row.get(5)?,
        new_value: row.get(6)?,
        status: LearningStatus::parse(&status).unwrap_or(LearningStatus::Pending),
        seen_in_repos: BTreeSet::new(),
        occurrences: occurrences.max(0) as u64,
        first_seen_at: parse_timestamp(9, row.get(9)?)?,
        last_seen_at: parse_timestamp(10, row.get(10)?)?,
        promoted_at: promoted_at.map(|s| parse_timestamp(11, s)).transpose()?,
    })
}

/// Match `%`, `_` and `\` literally in a LIKE pattern escaped with `\`
fn escape_like(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::fingerprint::fingerprint;
    use chrono::TimeZone;

    fn candidate(text: &str) -> LearningCandidate {
        LearningCandidate::from_text(text, Some("python"))
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_second_repo_makes_learning_eligible() {
        let ledger = LearningLedger::open_in_memory(2).unwrap();
        let c = candidate("Use uv instead of pip");

        let first = ledger.record(&c, "repo-a").unwrap();
        assert_eq!(first.action, RecordAction::Created);
        assert_eq!(first.repo_count, 1);
        assert_eq!(first.status, LearningStatus::Pending);

        let second = ledger.record(&c, "repo-b").unwrap();
        assert_eq!(second.action, RecordAction::Updated);
        assert_eq!(second.fingerprint, first.fingerprint);
        assert_eq!(second.repo_count, 2);
        assert_eq!(second.occurrences, 2);
        assert_eq!(second.status, LearningStatus::PromotionEligible);
    }

    #[test]
    fn test_same_repo_counts_once() {
        let ledger = LearningLedger::open_in_memory(2).unwrap();
        let c = candidate("Use uv instead of pip");
        ledger.record(&c, "repo-a").unwrap();
        let again = ledger.record(&c, "repo-a").unwrap();
        assert_eq!(again.repo_count, 1);
        assert_eq!(again.occurrences, 2);
        assert_eq!(again.status, LearningStatus::Pending);
    }

    #[test]
    fn test_status_never_regresses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let c = candidate("Use uv instead of pip");

        let ledger = LearningLedger::open(&path, 2).unwrap();
        ledger.record(&c, "repo-a").unwrap();
        let fp = ledger.record(&c, "repo-b").unwrap().fingerprint;
        ledger.close().unwrap();

        let stricter = LearningLedger::open(&path, 5).unwrap();
        let outcome = stricter.record(&c, "repo-a").unwrap();
        assert_eq!(outcome.status, LearningStatus::PromotionEligible);
        assert_eq!(stricter.status_for(&fp).unwrap(), Some(LearningStatus::PromotionEligible));
    }

    #[test]
    fn test_free_text_and_signal_share_fingerprint() {
        let ledger = LearningLedger::open_in_memory(2).unwrap();
        let signal = crate::learning::detector::SignalExtractor::default()
            .classify_text("No, use uv instead of pip")
            .unwrap();
        let from_signal = LearningCandidate::from_signal(&signal, None);
        let from_text = LearningCandidate::from_text("Use uv instead of pip", None);

        assert_eq!(ledger.fingerprint_of(&from_signal), ledger.fingerprint_of(&from_text));
        assert_eq!(ledger.fingerprint_of(&from_text), fingerprint("Use uv instead of pip"));
    }

    #[test]
    fn test_unknown_fingerprint() {
        let ledger = LearningLedger::open_in_memory(2).unwrap();
        assert_eq!(ledger.status_for("0000000000000000").unwrap(), None);
        assert!(ledger.get("0000000000000000").unwrap().is_none());
    }

    #[test]
    fn test_get_round_trips_fields() {
        let ledger = LearningLedger::open_in_memory(2).unwrap();
        let c = candidate("Use uv instead of pip");
        let fp = ledger.record_at(&c, "repo-a", at(9)).unwrap().fingerprint;
        ledger.record_at(&c, "repo-b", at(10)).unwrap();

        let learning = ledger.get(&fp).unwrap().unwrap();
        assert_eq!(learning.old_value.as_deref(), Some("pip"));
        assert_eq!(learning.new_value.as_deref(), Some("uv"));
        assert_eq!(learning.originating_skill.as_deref(), Some("python"));
        assert_eq!(learning.seen_in_repos.len(), 2);
        assert_eq!(learning.first_seen_at, at(9));
        assert_eq!(learning.last_seen_at, at(10));
        assert!(learning.promoted_at.is_none());
    }

    #[test]
    fn test_list_eligible_orders_by_last_seen() {
        let ledger = LearningLedger::open_in_memory(2).unwrap();
        let older = candidate("Use uv instead of pip");
        let newer = candidate("Use ruff instead of flake8");
        let single = candidate("Use httpx instead of requests");

        for (c, hour) in [(&older, 8), (&newer, 11)] {
            ledger.record_at(c, "repo-a", at(hour)).unwrap();
            ledger.record_at(c, "repo-b", at(hour)).unwrap();
        }
        ledger.record_at(&single, "repo-a", at(12)).unwrap();

        let eligible = ledger.list_eligible(2).unwrap();
        let descriptions: Vec<&str> = eligible.iter().map(|l| l.description.as_str()).collect();
        assert_eq!(descriptions, vec!["Use ruff instead of flake8", "Use uv instead of pip"]);

        // a lower threshold widens the list without touching stored status
        assert_eq!(ledger.list_eligible(1).unwrap().len(), 3);
        assert_eq!(ledger.list_all().unwrap().len(), 3);
    }

    #[test]
    fn test_mark_promoted_is_terminal() {
        let ledger = LearningLedger::open_in_memory(2).unwrap();
        let c = candidate("Use uv instead of pip");
        ledger.record(&c, "repo-a").unwrap();
        let fp = ledger.record(&c, "repo-b").unwrap().fingerprint;

        ledger.mark_promoted(&fp, "CLAUDE.md", "seen in 2 repos").unwrap();
        assert_eq!(ledger.status_for(&fp).unwrap(), Some(LearningStatus::Promoted));
        assert!(matches!(
            ledger.mark_promoted(&fp, "CLAUDE.md", "again"),
            Err(ReflectError::AlreadyPromoted { .. })
        ));

        // further sightings do not reopen it
        ledger.record(&c, "repo-c").unwrap();
        assert_eq!(ledger.status_for(&fp).unwrap(), Some(LearningStatus::Promoted));
        assert!(ledger.list_eligible(2).unwrap().is_empty());
        assert_eq!(ledger.promotions_for(&fp).unwrap().len(), 1);
    }

    #[test]
    fn test_mark_promoted_unknown() {
        let ledger = LearningLedger::open_in_memory(2).unwrap();
        assert!(matches!(
            ledger.mark_promoted("deadbeefdeadbeef", "CLAUDE.md", "x"),
            Err(ReflectError::NotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_prefix() {
        let ledger = LearningLedger::open_in_memory(2).unwrap();
        let mut fingerprints = Vec::new();
        for i in 0..20 {
            let c = candidate(&format!("Always use tool number {}", i));
            fingerprints.push(ledger.record(&c, "repo-a").unwrap().fingerprint);
        }

        let fp = &fingerprints[0];
        assert_eq!(ledger.resolve(fp).unwrap(), *fp);
        assert_eq!(ledger.resolve(&fp.to_uppercase()).unwrap(), *fp);
        assert!(matches!(ledger.resolve("zz"), Err(ReflectError::NotFound { .. })));
        assert!(matches!(ledger.resolve(""), Err(ReflectError::NotFound { .. })));

        // twenty fingerprints over sixteen hex digits share a first character
        let shared = fingerprints
            .iter()
            .map(|f| &f[..1])
            .find(|c| fingerprints.iter().filter(|f| f.starts_with(*c)).count() > 1)
            .unwrap();
        assert!(matches!(ledger.resolve(shared), Err(ReflectError::Ambiguous { .. })));
    }

    #[test]
    fn test_search_and_skill_listing() {
        let ledger = LearningLedger::open_in_memory(2).unwrap();
        ledger.record(&candidate("Use uv instead of pip"), "repo-a").unwrap();
        ledger
            .record(&LearningCandidate::from_text("Never use force push", Some("git")), "repo-a")
            .unwrap();

        let found = ledger.search("PIP", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].new_value.as_deref(), Some("uv"));
        assert!(ledger.search("nothing like this", 10).unwrap().is_empty());

        let git = ledger.learnings_for_skill("git").unwrap();
        assert_eq!(git.len(), 1);
        assert_eq!(git[0].old_value.as_deref(), Some("force push"));
    }

    #[test]
    fn test_search_treats_wildcards_literally() {
        let ledger = LearningLedger::open_in_memory(2).unwrap();
        ledger.record(&candidate("Use uv instead of pip"), "repo-a").unwrap();
        ledger.record(&candidate("Coverage must stay at 100% for core"), "repo-a").unwrap();
        ledger.record(&candidate("Keep 1000 tests green"), "repo-a").unwrap();
        ledger.record(&candidate("Prefer snake_case names"), "repo-a").unwrap();

        let found = ledger.search("100%", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].description.contains("100%"));
        assert_eq!(ledger.search("%", 10).unwrap().len(), 1);
        assert_eq!(ledger.search("_", 10).unwrap().len(), 1);
        assert!(ledger.search("\\", 10).unwrap().is_empty());
        assert_eq!(ledger.search("1000", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_stats_and_reset() {
        let ledger = LearningLedger::open_in_memory(2).unwrap();
        let shared = candidate("Use uv instead of pip");
        ledger.record(&shared, "repo-a").unwrap();
        let fp = ledger.record(&shared, "repo-b").unwrap().fingerprint;
        ledger.record(&LearningCandidate::from_text("Always use pathlib", None), "repo-a").unwrap();
        ledger.mark_promoted(&fp, "CLAUDE.md", "test").unwrap();

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.get("promoted"), Some(&1));
        assert_eq!(stats.by_status.get("pending"), Some(&1));
        assert_eq!(stats.by_skill.get("python"), Some(&1));
        assert_eq!(stats.by_skill.get("general"), Some(&1));
        assert_eq!(stats.multi_repo, 1);
        assert_eq!(stats.promotion_eligible, 0);
        assert_eq!(stats.total_promotions, 1);

        assert_eq!(ledger.reset().unwrap(), 2);
        assert_eq!(ledger.stats().unwrap(), LedgerStats::default());
    }
}
