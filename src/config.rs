//! Configuration management
//!
//! Manages file locations, the promotion threshold, backup retention and the
//! fingerprint normalisation rules. Persisted as TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ReflectError, Result};
use crate::learning::fingerprint::Normalizer;

/// Environment variable that overrides the configuration file location
pub const CONFIG_ENV: &str = "REFLECT_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// File and directory locations
    #[serde(default)]
    pub paths: PathsConfig,
    /// Promotion settings
    #[serde(default)]
    pub promotion: PromotionConfig,
    /// Backup retention
    #[serde(default)]
    pub backup: BackupConfig,
    /// Fingerprint normalisation rules
    #[serde(default)]
    pub fingerprint: Normalizer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// SQLite learning ledger
    #[serde(default = "default_ledger_db")]
    pub ledger_db: PathBuf,
    /// Global instructions file that promoted learnings are appended to
    #[serde(default = "default_global_file")]
    pub global_file: PathBuf,
    /// Directory holding `<skill>/SKILL.md` documents
    #[serde(default = "default_skills_dir")]
    pub skills_dir: PathBuf,
    /// Host session directory searched for `*/transcript.jsonl`
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,
    /// Timestamped backups of mutated files
    #[serde(default = "default_backups_dir")]
    pub backups_dir: PathBuf,
    /// Review feedback log and pattern scores
    #[serde(default = "default_feedback_dir")]
    pub feedback_dir: PathBuf,
}

/// Base directory of the host assistant (`~/.claude`)
pub fn host_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
}

fn default_ledger_db() -> PathBuf {
    host_dir().join("reflect").join("learnings.db")
}

fn default_global_file() -> PathBuf {
    host_dir().join("CLAUDE.md")
}

fn default_skills_dir() -> PathBuf {
    host_dir().join("skills")
}

fn default_session_dir() -> PathBuf {
    host_dir().join("session-env")
}

fn default_backups_dir() -> PathBuf {
    host_dir().join("backups")
}

fn default_feedback_dir() -> PathBuf {
    host_dir().join("reflect").join("meta")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            ledger_db: default_ledger_db(),
            global_file: default_global_file(),
            skills_dir: default_skills_dir(),
            session_dir: default_session_dir(),
            backups_dir: default_backups_dir(),
            feedback_dir: default_feedback_dir(),
        }
    }
}

impl PathsConfig {
    /// Re-root every location under `base`, keeping the default layout
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            ledger_db: base.join("reflect").join("learnings.db"),
            global_file: base.join("CLAUDE.md"),
            skills_dir: base.join("skills"),
            session_dir: base.join("session-env"),
            backups_dir: base.join("backups"),
            feedback_dir: base.join("reflect").join("meta"),
        }
    }

    /// Path of a named skill's document
    pub fn skill_file(&self, skill: &str) -> PathBuf {
        self.skills_dir.join(skill).join("SKILL.md")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionConfig {
    /// Number of distinct repositories before a learning becomes eligible
    #[serde(default = "default_threshold")]
    pub threshold: usize,
}

fn default_threshold() -> usize {
    2
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self { threshold: default_threshold() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Days a backup is kept before the sweep deletes it
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_retention_days() -> i64 {
    30
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self { retention_days: default_retention_days() }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| ReflectError::io(path, e))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| ReflectError::Config(format!("{}: {}", path.display(), e)))?;
        if config.promotion.threshold == 0 {
            return Err(ReflectError::Config("promotion.threshold must be at least 1".into()));
        }
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ReflectError::io(parent, e))?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ReflectError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| ReflectError::io(path, e))?;
        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let base = directories::ProjectDirs::from("com", "reflect", "reflect")
        .ok_or_else(|| ReflectError::Config("Failed to get project directories".into()))?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.promotion.threshold, 2);
        assert_eq!(config.backup.retention_days, 30);
        assert!(config.paths.global_file.ends_with("CLAUDE.md"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[promotion]\nthreshold = 3\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.promotion.threshold, 3);
        assert_eq!(config.backup.retention_days, 30);
        assert!(config.fingerprint.case_fold);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[promotion]\nthreshold = 0\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ReflectError::Config(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.paths = PathsConfig::rooted_at(dir.path());
        config.fingerprint.aliases.insert("pip3".into(), "pip".into());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.paths.global_file, dir.path().join("CLAUDE.md"));
        assert_eq!(loaded.fingerprint.aliases.get("pip3").map(String::as_str), Some("pip"));
    }

    #[test]
    fn test_skill_file_layout() {
        let paths = PathsConfig::rooted_at(Path::new("/base"));
        assert_eq!(paths.skill_file("git"), PathBuf::from("/base/skills/git/SKILL.md"));
    }
}
