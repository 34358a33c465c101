//! Shared types used across modules
//!
//! Transcript turns are consumed by the detector, the skill updater and the
//! CLI, so they live here to avoid circular dependencies.

use serde::{Deserialize, Serialize};

/// Role of a transcript turn's author
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Parse from a host role string ("user", "human", "assistant", ...)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" | "human" => Some(Role::User),
            "assistant" | "ai" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// A single dialogue turn as supplied by the host runtime.
///
/// Both fields are optional because hosts occasionally emit entries without
/// a role or payload; those turns are skipped during extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: Option<Role>,
    pub text: Option<String>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Some(Role::User), text: Some(text.into()) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Some(Role::Assistant), text: Some(text.into()) }
    }

    /// Role and non-empty text, if the turn is well formed
    pub fn parts(&self) -> Option<(Role, &str)> {
        let role = self.role?;
        let text = self.text.as_deref()?;
        if text.trim().is_empty() {
            return None;
        }
        Some((role, text))
    }
}

/// Ordered sequence of turns plus the skills invoked during the session
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pub turns: Vec<Turn>,
    pub skills_used: Vec<String>,
}

impl Transcript {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self { turns, skills_used: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Truncate a string to at most `max_len` characters, appending "..." when cut.
pub fn truncate_chars(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Flatten text to one line for a Markdown bullet.
///
/// Whitespace runs (newlines included) become a single space, and runs of
/// three or more backticks or tildes are cut to two so the text can never
/// open a code fence.
pub fn single_line(s: &str) -> String {
    let joined = s.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(joined.len());
    let mut run: Option<(char, usize)> = None;
    for c in joined.chars() {
        if c == '`' || c == '~' {
            let count = match run {
                Some((prev, n)) if prev == c => n + 1,
                _ => 1,
            };
            run = Some((c, count));
            if count > 2 {
                continue;
            }
        } else {
            run = None;
        }
        out.push(c);
    }
    out
}
