//! Review gate between proposals and skill files
//!
//! A [`Reviewer`] decides per skill whether a proposal is applied as is,
//! rewritten, skipped, or whether the whole review stops. Every decision is
//! recorded in the feedback log.

use serde::Serialize;
use std::io::{BufRead, Write};
use tracing::warn;

use super::updater::{ApplyOutcome, ProposedUpdate, SkillUpdater};
use crate::error::{ReflectError, Result};
use crate::learning::detector::Confidence;
use crate::learning::feedback::{FeedbackDecision, FeedbackEntry, FeedbackLog};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    /// Apply the reviewer's own wording instead
    Modify(String),
    Skip,
    /// Stop reviewing; remaining skills are left untouched
    Quit,
}

impl ReviewDecision {
    pub fn feedback(&self) -> FeedbackDecision {
        match self {
            ReviewDecision::Approve => FeedbackDecision::Accept,
            ReviewDecision::Modify(_) => FeedbackDecision::Modify,
            ReviewDecision::Skip => FeedbackDecision::Skip,
            ReviewDecision::Quit => FeedbackDecision::Quit,
        }
    }
}

pub trait Reviewer {
    fn decide(&mut self, proposal: &ProposedUpdate, diff: &str) -> Result<ReviewDecision>;
}

/// Batch mode: everything is approved, backups and validation still apply
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

impl Reviewer for AutoApprove {
    fn decide(&mut self, _proposal: &ProposedUpdate, _diff: &str) -> Result<ReviewDecision> {
        Ok(ReviewDecision::Approve)
    }
}

/// Interactive reviewer reading answers line by line
pub struct TerminalReviewer<R, W> {
    input: R,
    output: W,
}

impl TerminalReviewer<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalReviewer<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn prompt(&mut self, text: &str) -> Result<Option<String>> {
        let io_err = |e| ReflectError::io("<terminal>", e);
        write!(self.output, "{}", text).map_err(io_err)?;
        self.output.flush().map_err(io_err)?;
        let mut line = String::new();
        let read = self.input.read_line(&mut line).map_err(io_err)?;
        Ok((read > 0).then(|| line.trim().to_string()))
    }
}

impl<R: BufRead, W: Write> Reviewer for TerminalReviewer<R, W> {
    fn decide(&mut self, proposal: &ProposedUpdate, diff: &str) -> Result<ReviewDecision> {
        let io_err = |e| ReflectError::io("<terminal>", e);
        writeln!(self.output, "\n## {}\n", proposal.skill).map_err(io_err)?;
        for (confidence, label) in [
            (Confidence::High, "corrections"),
            (Confidence::Medium, "approvals"),
            (Confidence::Low, "observations"),
        ] {
            let count = proposal.count(confidence);
            if count > 0 {
                writeln!(self.output, "  - {}: {} {}", confidence, count, label).map_err(io_err)?;
            }
        }
        if diff.is_empty() {
            writeln!(self.output, "\nNo changes to display.").map_err(io_err)?;
        } else {
            writeln!(self.output, "\n```diff\n{}```", diff).map_err(io_err)?;
        }

        let Some(answer) = self.prompt("\n[A]pprove / [M]odify / [S]kip / [Q]uit? ")? else {
            return Ok(ReviewDecision::Quit);
        };
        let decision = match answer.to_uppercase().as_str() {
            "" | "A" => ReviewDecision::Approve,
            "Q" => ReviewDecision::Quit,
            "M" => match self.prompt("Describe modification: ")? {
                Some(text) if !text.is_empty() => ReviewDecision::Modify(text),
                _ => ReviewDecision::Skip,
            },
            _ => ReviewDecision::Skip,
        };
        Ok(decision)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReviewSummary {
    pub applied: Vec<ApplyOutcome>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub aborted: bool,
}

/// Drives a reviewer over a set of proposals
pub struct ReviewSession<'a> {
    updater: &'a SkillUpdater,
    feedback: Option<&'a FeedbackLog>,
}

impl<'a> ReviewSession<'a> {
    pub fn new(updater: &'a SkillUpdater) -> Self {
        Self { updater, feedback: None }
    }

    pub fn with_feedback(mut self, feedback: &'a FeedbackLog) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// Review proposals in order. A failed write is reported and the next
    /// skill still gets its turn; `Quit` stops the loop.
    pub fn run(&self, proposals: &[ProposedUpdate], reviewer: &mut dyn Reviewer) -> Result<ReviewSummary> {
        let mut summary = ReviewSummary::default();

        for proposal in proposals.iter().filter(|p| !p.is_empty()) {
            let diff = self.updater.render_diff(proposal).unwrap_or_else(|e| {
                warn!("Could not render diff for {}: {}", proposal.skill, e);
                String::new()
            });
            let decision = reviewer.decide(proposal, &diff)?;
            self.log_decision(proposal, &decision);

            let to_apply = match &decision {
                ReviewDecision::Approve => proposal.clone(),
                ReviewDecision::Modify(text) => proposal.with_replacement(text),
                ReviewDecision::Skip => {
                    summary.skipped.push(proposal.skill.clone());
                    continue;
                }
                ReviewDecision::Quit => {
                    summary.aborted = true;
                    break;
                }
            };

            match self.updater.apply(&to_apply) {
                Ok(outcome) => summary.applied.push(outcome),
                Err(e) => {
                    warn!("Failed to update {}: {}", proposal.skill, e);
                    summary.failed.push((proposal.skill.clone(), e.to_string()));
                }
            }
        }
        Ok(summary)
    }

    fn log_decision(&self, proposal: &ProposedUpdate, decision: &ReviewDecision) {
        let Some(feedback) = self.feedback else {
            return;
        };
        let modification = match decision {
            ReviewDecision::Modify(text) => Some(text.as_str()),
            _ => None,
        };
        for signal in &proposal.signals {
            feedback.record(&FeedbackEntry::for_signal(signal, &proposal.skill, decision.feedback(), modification));
        }
    }
}
