//! Skill documents and the updates learned for them

pub mod document;
pub mod review;
pub mod updater;

pub use document::{section_for, Section, SkillDocument, BEST_PRACTICES, CONSIDERATIONS, CRITICAL_CORRECTIONS};
pub use review::{AutoApprove, ReviewDecision, ReviewSession, ReviewSummary, Reviewer, TerminalReviewer};
pub use updater::{ApplyOutcome, ProposedEntry, ProposedUpdate, SkillUpdater, Validator};
