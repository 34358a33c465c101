//! Timestamped backups and guarded file mutation
//!
//! Every mutation of a skill document or the global file runs inside a
//! [`MutationGuard`]: the guard snapshots the file when it is created and
//! puts the snapshot back on any exit path that does not call
//! [`MutationGuard::commit`].

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::BackupConfig;
use crate::error::{ReflectError, Result};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";
const BACKUP_EXT: &str = "bak";

/// An immutable snapshot of a file at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    /// Location of the snapshot
    pub path: PathBuf,
    /// File name of the snapshotted file
    pub source_name: String,
    pub taken_at: NaiveDateTime,
}

/// Creates, lists and expires backups in one directory
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
    retention: Duration,
}

impl BackupManager {
    pub fn new(dir: PathBuf, retention_days: i64) -> Self {
        Self { dir, retention: Duration::days(retention_days.max(0)) }
    }

    pub fn from_config(dir: PathBuf, config: &BackupConfig) -> Self {
        Self::new(dir, config.retention_days)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `target` into the backup directory. Returns `None` when the
    /// target does not exist yet.
    pub fn snapshot(&self, target: &Path) -> Result<Option<Backup>> {
        self.snapshot_at(target, Utc::now())
    }

    pub fn snapshot_at(&self, target: &Path, now: DateTime<Utc>) -> Result<Option<Backup>> {
        if !target.exists() {
            return Ok(None);
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| ReflectError::io(&self.dir, e))?;

        let source_name = source_name_for(target);
        let stamp = now.format(TIMESTAMP_FORMAT).to_string();

        let mut path = self.dir.join(format!("{}.{}.{}", source_name, stamp, BACKUP_EXT));
        let mut counter = 1;
        while path.exists() {
            path = self.dir.join(format!("{}.{}-{}.{}", source_name, stamp, counter, BACKUP_EXT));
            counter += 1;
        }

        std::fs::copy(target, &path).map_err(|e| ReflectError::io(target, e))?;
        debug!("Backed up {} to {}", target.display(), path.display());
        Ok(Some(Backup { path, source_name, taken_at: now.naive_utc() }))
    }

    /// Copy a backup over `target`
    pub fn restore(&self, backup: &Backup, target: &Path) -> Result<()> {
        std::fs::copy(&backup.path, target).map_err(|e| ReflectError::io(target, e))?;
        info!("Restored {} from {}", target.display(), backup.path.display());
        Ok(())
    }

    /// All backups in the directory, oldest first
    pub fn list(&self) -> Result<Vec<Backup>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.dir).map_err(|e| ReflectError::io(&self.dir, e))?;
        let mut backups: Vec<Backup> = entries
            .flatten()
            .filter_map(|entry| parse_backup_name(&entry.path()))
            .collect();
        backups.sort_by(|a, b| a.taken_at.cmp(&b.taken_at));
        Ok(backups)
    }

    /// Delete backups older than the retention window
    pub fn sweep(&self) -> Result<usize> {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now.naive_utc() - self.retention;
        let mut removed = 0;
        for backup in self.list()? {
            if backup.taken_at < cutoff {
                match std::fs::remove_file(&backup.path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove expired backup {}: {}", backup.path.display(), e),
                }
            }
        }
        if removed > 0 {
            info!("Swept {} expired backups from {}", removed, self.dir.display());
        }
        Ok(removed)
    }

    /// Sweep expired backups, snapshot `target` and hand back a guard that
    /// restores the snapshot unless committed.
    pub fn begin(&self, target: &Path) -> Result<MutationGuard> {
        if let Err(e) = self.sweep() {
            warn!("Backup sweep failed: {}", e);
        }
        let backup = self.snapshot(target)?;
        Ok(MutationGuard {
            manager: self.clone(),
            target: target.to_path_buf(),
            backup,
            finished: false,
        })
    }
}

/// File name used in backup names. Skill documents all share one file
/// name, so the skill directory is kept in front of it.
fn source_name_for(target: &Path) -> String {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    match target.parent().and_then(|p| p.file_name()) {
        Some(skill) if file_name == "SKILL.md" => format!("{}.{}", skill.to_string_lossy(), file_name),
        _ => file_name,
    }
}

/// Parse `<name>.<YYYYmmdd_HHMMSS_ffffff>[-n].bak`
fn parse_backup_name(path: &Path) -> Option<Backup> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name.strip_suffix(&format!(".{}", BACKUP_EXT))?;
    let (source_name, stamp) = stem.rsplit_once('.')?;
    let stamp = stamp.split('-').next()?;
    let taken_at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    Some(Backup { path: path.to_path_buf(), source_name: source_name.to_string(), taken_at })
}

/// Scoped mutation of one file. Dropping the guard without committing
/// restores the snapshot (or removes the file if it did not exist).
#[derive(Debug)]
pub struct MutationGuard {
    manager: BackupManager,
    target: PathBuf,
    backup: Option<Backup>,
    finished: bool,
}

impl MutationGuard {
    /// Keep the mutation
    pub fn commit(mut self) -> Option<Backup> {
        self.finished = true;
        self.backup.take()
    }

    /// Undo the mutation now and report whether the restore worked
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.restore()
    }

    fn restore(&self) -> Result<()> {
        match &self.backup {
            Some(backup) => self.manager.restore(backup, &self.target),
            None => {
                if self.target.exists() {
                    std::fs::remove_file(&self.target).map_err(|e| ReflectError::io(&self.target, e))?;
                    info!("Removed {} created during a failed mutation", self.target.display());
                }
                Ok(())
            }
        }
    }
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.restore() {
                warn!("Failed to roll back {}: {}", self.target.display(), e);
            }
        }
    }
}
