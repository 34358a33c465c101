//! reflect - feedback learning for an AI coding assistant
//!
//! - Signal extraction from conversation transcripts (regex pattern bank)
//! - Skill document updates with backup, validation and rollback
//! - Cross-repository learning ledger (SQLite)
//! - Promotion of multi-repository learnings to the global instructions file
//!
//! # Example
//!
//! ```ignore
//! use reflect::learning::{parse_transcript, SignalExtractor};
//!
//! let transcript = parse_transcript(r#"{"role": "user", "content": "No, use ruff instead of flake8"}"#);
//! for signal in SignalExtractor::default().signals(&transcript) {
//!     println!("{} {}: {}", signal.confidence, signal.kind, signal.description());
//! }
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod backup;
pub mod diff;
pub mod learning;
pub mod skills;
pub mod cli;

pub use config::Config;
pub use error::{ReflectError, Result};

pub use learning::{
    Confidence,
    LearningLedger,
    LearningStatus,
    PromotionEngine,
    Signal,
    SignalExtractor,
    SignalKind,
};

pub use skills::{SkillDocument, SkillUpdater};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - feedback learning for skill documents", NAME, VERSION)
}
