//! Feedback learning system
//!
//! Extracts correction, approval and suggestion signals from conversation
//! transcripts, deduplicates them into a cross-repository ledger and
//! promotes learnings confirmed in several repositories to the global file.

pub mod detector;
pub mod feedback;
pub mod fingerprint;
pub mod global;
pub mod promotion;
pub mod scope;
pub mod store;
pub mod transcript;

pub use detector::{Confidence, PatternBank, PatternRule, Signal, SignalExtractor, SignalKind};
pub use feedback::{FeedbackDecision, FeedbackEntry, FeedbackLog};
pub use fingerprint::{fingerprint, Normalizer};
pub use global::GlobalDocument;
pub use promotion::{PromotionEngine, PromotionPreview, PromotionReport};
pub use scope::{Scope, ScopeAnalyzer};
pub use store::{Learning, LearningCandidate, LearningLedger, LearningStatus, LedgerStats, RecordOutcome};
pub use transcript::{find_latest_transcript, load_transcript, parse_transcript};
