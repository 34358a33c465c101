//! Signal Detector - extraction of feedback signals from transcripts
//!
//! Scans user turns for phrasing that indicates a correction, an approval or
//! a tentative suggestion. Patterns live in an ordered [`PatternBank`]; each
//! entry carries its confidence tier and a function that pulls the rejected
//! and preferred values out of the capture groups.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::types::{single_line, truncate_chars, Role, Transcript};

/// What kind of feedback a signal represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Correction,
    Approval,
    Observation,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Correction => "correction",
            SignalKind::Approval => "approval",
            SignalKind::Observation => "observation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "correction" => Some(SignalKind::Correction),
            "approval" => Some(SignalKind::Approval),
            "observation" | "question" => Some(SignalKind::Observation),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Confidence tier. Ordered so that `High` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "LOW",
            Confidence::Medium => "MEDIUM",
            Confidence::High => "HIGH",
        }
    }

    /// Numeric score recorded alongside ledger entries
    pub fn score(&self) -> f64 {
        match self {
            Confidence::Low => 0.45,
            Confidence::Medium => 0.65,
            Confidence::High => 0.85,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "LOW" => Some(Confidence::Low),
            "MEDIUM" => Some(Confidence::Medium),
            "HIGH" => Some(Confidence::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pulls `(old_value, new_value)` out of a pattern's capture groups
pub type Extractor = fn(&Captures<'_>) -> (Option<String>, Option<String>);

/// One registered pattern
#[derive(Clone)]
pub struct PatternRule {
    pub id: String,
    pub language: String,
    pub kind: SignalKind,
    pub confidence: Confidence,
    pub regex: Regex,
    pub extract: Extractor,
}

impl std::fmt::Debug for PatternRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternRule")
            .field("id", &self.id)
            .field("language", &self.language)
            .field("kind", &self.kind)
            .field("confidence", &self.confidence)
            .field("regex", &self.regex.as_str())
            .finish()
    }
}

/// Ordered registry of patterns. New entries are data; the matching loop
/// never changes.
#[derive(Debug, Clone, Default)]
pub struct PatternBank {
    rules: Vec<PatternRule>,
}

/// Capture groups stop at clause punctuation so "use X instead of Y, then Z"
/// extracts Y, not "Y, then Z".
const VALUE: &str = r"([^.,;!?\n]+)";

static BUILTIN: Lazy<PatternBank> = Lazy::new(PatternBank::builtin);

impl PatternBank {
    /// Empty bank
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared instance of the built-in bank
    pub fn shared() -> &'static PatternBank {
        &BUILTIN
    }

    /// Built-in English and German patterns
    pub fn builtin() -> Self {
        let value = VALUE;
        let entries: Vec<(&str, &str, SignalKind, Confidence, String, Extractor)> = vec![
            // Corrections
            ("en.use-instead", "en", SignalKind::Correction, Confidence::High,
                format!(r"(?i)\buse\s+(.+?)\s+instead\s+of\s+{value}"), new_then_old as Extractor),
            ("en.dont-use", "en", SignalKind::Correction, Confidence::High,
                format!(r"(?i)\bno,?\s+don['’]?t\s+(?:do|use)\s+(.+?)[,.;]?\s+(?:do|use)\s+{value}"), old_then_new as Extractor),
            ("en.instead-of", "en", SignalKind::Correction, Confidence::High,
                format!(r"(?i)\binstead\s+of\s+(.+?),?\s+(?:you\s+should|use|do)\s+{value}"), old_then_new as Extractor),
            ("en.actually", "en", SignalKind::Correction, Confidence::High,
                format!(r"(?i)\bactually,?\s+(.+?)\s+(?:is|should\s+be)\s+{value}"), old_then_new as Extractor),
            ("en.never", "en", SignalKind::Correction, Confidence::High,
                format!(r"(?i)\bnever\s+(?:do|use)\s+{value}"), old_only as Extractor),
            ("en.always", "en", SignalKind::Correction, Confidence::High,
                format!(r"(?i)\balways\s+(?:do|use|check\s+for)\s+{value}"), new_only as Extractor),
            ("de.nein-statt", "de", SignalKind::Correction, Confidence::High,
                format!(r"(?i)\bnein,?\s+(?:benutze|verwende)\s+(.+?)\s+(?:statt|anstatt)\s+{value}"), new_then_old as Extractor),
            ("de.statt", "de", SignalKind::Correction, Confidence::High,
                format!(r"(?i)\b(?:benutze|verwende)\s+(.+?)\s+(?:statt|anstatt)\s+{value}"), new_then_old as Extractor),
            ("de.immer", "de", SignalKind::Correction, Confidence::High,
                format!(r"(?i)\bimmer\s+{value}"), new_only as Extractor),
            ("de.niemals", "de", SignalKind::Correction, Confidence::High,
                format!(r"(?i)\bniemals?\s+{value}"), old_only as Extractor),
            // Approvals
            ("en.approval", "en", SignalKind::Approval, Confidence::Medium,
                r"(?i)\b(?:perfect|great|exactly|correct)\b".to_string(), no_values as Extractor),
            ("en.works", "en", SignalKind::Approval, Confidence::Medium,
                r"(?i)\bworks?\s+(?:perfectly|great|well)\b".to_string(), no_values as Extractor),
            ("en.good-job", "en", SignalKind::Approval, Confidence::Medium,
                r"(?i)\b(?:good|nice)\s+(?:job|work)\b".to_string(), no_values as Extractor),
            ("de.approval", "de", SignalKind::Approval, Confidence::Medium,
                r"(?i)\b(?:perfekt|super|genau|richtig)\b".to_string(), no_values as Extractor),
            // Suggestions
            ("en.considered", "en", SignalKind::Observation, Confidence::Low,
                r"(?i)\bhave\s+you\s+considered\s+([^?\n]+)".to_string(), new_only as Extractor),
            ("en.why-not", "en", SignalKind::Observation, Confidence::Low,
                r"(?i)\bwhy\s+not\s+(?:try|use)\s+([^?\n]+)".to_string(), new_only as Extractor),
            ("en.what-about", "en", SignalKind::Observation, Confidence::Low,
                r"(?i)\bwhat\s+about\s+([^?\n]+)".to_string(), new_only as Extractor),
            ("de.gedacht", "de", SignalKind::Observation, Confidence::Low,
                r"(?i)\bhast\s+du\s+(?:schon\s+)?(?:an\s+)?(.+?)\s+gedacht".to_string(), new_only as Extractor),
            ("de.was-ist-mit", "de", SignalKind::Observation, Confidence::Low,
                r"(?i)\bwas\s+ist\s+mit\s+([^?\n]+)".to_string(), new_only as Extractor),
        ];

        let mut bank = PatternBank::new();
        for (id, language, kind, confidence, pattern, extract) in entries {
            if let Err(e) = bank.add(id, language, kind, confidence, &pattern, extract) {
                warn!("Skipping built-in pattern {}: {}", id, e);
            }
        }
        bank
    }

    /// Compile and append a pattern
    pub fn add(
        &mut self,
        id: &str,
        language: &str,
        kind: SignalKind,
        confidence: Confidence,
        pattern: &str,
        extract: Extractor,
    ) -> Result<(), regex::Error> {
        let regex = Regex::new(pattern)?;
        self.register(PatternRule {
            id: id.to_string(),
            language: language.to_string(),
            kind,
            confidence,
            regex,
            extract,
        });
        Ok(())
    }

    /// Append an already-built rule
    pub fn register(&mut self, rule: PatternRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Languages that have at least one rule
    pub fn languages(&self) -> Vec<&str> {
        let mut langs: Vec<&str> = self.rules.iter().map(|r| r.language.as_str()).collect();
        langs.sort_unstable();
        langs.dedup();
        langs
    }

    /// Best matching rule for `text`: highest confidence wins, earlier
    /// registration breaks ties inside a tier.
    pub fn classify<'t>(&self, text: &'t str) -> Option<(&PatternRule, Captures<'t>)> {
        let mut best: Option<(&PatternRule, Captures<'t>)> = None;
        for rule in &self.rules {
            if let Some((current, _)) = &best {
                if rule.confidence <= current.confidence {
                    continue;
                }
            }
            if let Some(caps) = rule.regex.captures(text) {
                best = Some((rule, caps));
            }
        }
        best
    }
}

fn group(caps: &Captures<'_>, i: usize) -> Option<String> {
    caps.get(i).and_then(|m| clean_value(m.as_str()))
}

fn old_then_new(caps: &Captures<'_>) -> (Option<String>, Option<String>) {
    (group(caps, 1), group(caps, 2))
}

fn new_then_old(caps: &Captures<'_>) -> (Option<String>, Option<String>) {
    (group(caps, 2), group(caps, 1))
}

fn old_only(caps: &Captures<'_>) -> (Option<String>, Option<String>) {
    (group(caps, 1), None)
}

fn new_only(caps: &Captures<'_>) -> (Option<String>, Option<String>) {
    (None, group(caps, 1))
}

fn no_values(_caps: &Captures<'_>) -> (Option<String>, Option<String>) {
    (None, None)
}

/// Trim whitespace, quotes and trailing punctuation from a captured value
pub fn clean_value(raw: &str) -> Option<String> {
    let cleaned = raw
        .trim()
        .trim_end_matches(['.', ',', '!', '?', ';', ':'])
        .trim_matches(['"', '\'', '`', '“', '”', '‘', '’'])
        .trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// A detected feedback cue in one user turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub confidence: Confidence,
    /// Substring the pattern matched
    pub matched_text: String,
    /// Full text of the turn
    pub content: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub turn_index: usize,
    pub pattern_id: String,
    pub language: String,
    /// Preceding assistant turn, for approvals
    pub previous_approach: Option<String>,
}

impl Signal {
    /// Human-readable summary used in proposals and the ledger
    ///
    /// Always a single line, so it renders as one bullet and matches the
    /// entries read back from a skill document.
    pub fn description(&self) -> String {
        let text = match self.kind {
            SignalKind::Correction => match (&self.old_value, &self.new_value) {
                (Some(old), Some(new)) => format!("Use '{}' instead of '{}'", new, old),
                (Some(old), None) => format!("Avoid: {}", old),
                (None, Some(new)) => format!("Always: {}", new),
                (None, None) => format!("Correction: {}", truncate_chars(&self.content, 100)),
            },
            SignalKind::Approval => match &self.previous_approach {
                Some(prev) => format!("Approved approach: {}", truncate_chars(&single_line(prev), 100)),
                None => "Approved approach".to_string(),
            },
            SignalKind::Observation => match &self.new_value {
                Some(suggestion) => format!("Consider: {}", suggestion),
                None => format!("Consider: {}", truncate_chars(&self.content, 100)),
            },
        };
        single_line(&text)
    }
}

/// Pure, restartable extractor over a transcript
#[derive(Debug, Clone, Copy)]
pub struct SignalExtractor<'b> {
    bank: &'b PatternBank,
}

impl Default for SignalExtractor<'static> {
    fn default() -> Self {
        Self { bank: PatternBank::shared() }
    }
}

impl<'b> SignalExtractor<'b> {
    pub fn new(bank: &'b PatternBank) -> Self {
        Self { bank }
    }

    pub fn bank(&self) -> &'b PatternBank {
        self.bank
    }

    /// Lazy sequence of signals; every call starts again at the first turn
    pub fn signals<'t>(&self, transcript: &'t Transcript) -> Signals<'b, 't> {
        Signals { bank: self.bank, transcript, next: 0 }
    }

    /// Classify a single piece of text outside of a transcript
    pub fn classify_text(&self, text: &str) -> Option<Signal> {
        self.bank.classify(text).map(|(rule, caps)| build_signal(rule, &caps, text, 0, None))
    }
}

/// Iterator returned by [`SignalExtractor::signals`]
#[derive(Debug, Clone)]
pub struct Signals<'b, 't> {
    bank: &'b PatternBank,
    transcript: &'t Transcript,
    next: usize,
}

impl Iterator for Signals<'_, '_> {
    type Item = Signal;

    fn next(&mut self) -> Option<Signal> {
        let transcript: &Transcript = self.transcript;
        let turns = &transcript.turns;
        while self.next < turns.len() {
            let index = self.next;
            self.next += 1;

            let Some((role, text)) = turns[index].parts() else {
                debug!("Skipping malformed turn {}", index);
                continue;
            };
            if role != Role::User {
                continue;
            }
            let Some((rule, caps)) = self.bank.classify(text) else {
                continue;
            };

            let previous_approach = if rule.kind == SignalKind::Approval && index > 0 {
                turns[index - 1]
                    .parts()
                    .filter(|(r, _)| *r == Role::Assistant)
                    .map(|(_, t)| truncate_chars(t, 500))
            } else {
                None
            };

            return Some(build_signal(rule, &caps, text, index, previous_approach));
        }
        None
    }
}

fn build_signal(
    rule: &PatternRule,
    caps: &Captures<'_>,
    text: &str,
    turn_index: usize,
    previous_approach: Option<String>,
) -> Signal {
    let (old_value, new_value) = (rule.extract)(caps);
    let matched_text = caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
    Signal {
        kind: rule.kind,
        confidence: rule.confidence,
        matched_text,
        content: text.to_string(),
        old_value,
        new_value,
        turn_index,
        pattern_id: rule.id.clone(),
        language: rule.language.clone(),
        previous_approach,
    }
}

/// Group signals under every skill used in the session, or "general"
pub fn group_by_skill(signals: Vec<Signal>, skills_used: &[String]) -> BTreeMap<String, Vec<Signal>> {
    let mut grouped: BTreeMap<String, Vec<Signal>> = BTreeMap::new();
    if signals.is_empty() {
        return grouped;
    }
    if skills_used.is_empty() {
        grouped.insert("general".to_string(), signals);
        return grouped;
    }
    for skill in skills_used {
        grouped.entry(skill.clone()).or_default().extend(signals.iter().cloned());
    }
    grouped
}
