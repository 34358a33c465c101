//! Transcript loading
//!
//! Hosts write one JSON object per line. Lines that do not parse, or that
//! lack a usable role or text, are skipped rather than failing the scan.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{ReflectError, Result};
use crate::types::{Role, Transcript, Turn};

/// Environment variable pointing at an explicit transcript
pub const TRANSCRIPT_ENV: &str = "TRANSCRIPT_PATH";

/// File name hosts use for session transcripts
pub const TRANSCRIPT_FILE: &str = "transcript.jsonl";

static SLASH_COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)/([a-z][a-z0-9-]*)(?:$|[\s.,;:!?])").expect("Valid slash command regex")
});

/// Names that are safe to use as a directory under the skills root
static SKILL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_:-]*$").expect("Valid skill name regex"));

/// Whether `name` can be used as a skill directory name
pub fn is_valid_skill_name(name: &str) -> bool {
    SKILL_NAME.is_match(name)
}

fn insert_skill(skills: &mut BTreeSet<String>, name: &str) {
    if is_valid_skill_name(name) {
        skills.insert(name.to_string());
    } else {
        debug!("Ignoring invalid skill name {:?}", name);
    }
}

/// Load a JSONL transcript from disk
pub fn load_transcript(path: &Path) -> Result<Transcript> {
    let content = std::fs::read_to_string(path).map_err(|e| ReflectError::io(path, e))?;
    let transcript = parse_transcript(&content);
    info!("Loaded {} turns from {}", transcript.len(), path.display());
    Ok(transcript)
}

/// Parse JSONL text into a transcript, skipping malformed lines
pub fn parse_transcript(content: &str) -> Transcript {
    let mut turns = Vec::new();
    let mut skills = BTreeSet::new();

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                debug!("Skipping transcript line {}: {}", line_no + 1, e);
                continue;
            }
        };
        // some hosts nest the message under "message"
        let msg = value.get("message").filter(|m| m.is_object()).unwrap_or(&value);

        collect_skill_invocations(msg, &mut skills);
        turns.push(turn_from_value(msg));
    }

    Transcript { turns, skills_used: skills.into_iter().collect() }
}

fn turn_from_value(msg: &Value) -> Turn {
    let role = msg.get("role").and_then(Value::as_str).and_then(Role::parse);
    let text = msg.get("content").and_then(content_text);
    Turn { role, text }
}

/// Flatten string content or a list of `{type: "text", text}` blocks
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter_map(|b| match b {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(_) if b.get("type").and_then(Value::as_str) == Some("text") => {
                        b.get("text").and_then(Value::as_str)
                    }
                    _ => None,
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        _ => None,
    }
}

fn collect_skill_invocations(msg: &Value, skills: &mut BTreeSet<String>) {
    if let Some(uses) = msg.get("tool_uses").and_then(Value::as_array) {
        for tool in uses {
            if tool.get("name").and_then(Value::as_str) == Some("Skill") {
                if let Some(skill) = tool.pointer("/parameters/skill").and_then(Value::as_str) {
                    insert_skill(skills, skill);
                }
            }
        }
    }

    if let Some(blocks) = msg.get("content").and_then(Value::as_array) {
        for block in blocks {
            if block.get("type").and_then(Value::as_str) == Some("tool_use")
                && block.get("name").and_then(Value::as_str) == Some("Skill")
            {
                if let Some(skill) = block.pointer("/input/skill").and_then(Value::as_str) {
                    insert_skill(skills, skill);
                }
            }
        }
    }

    if let Some(text) = msg.get("content").and_then(content_text) {
        skills.extend(slash_commands(&text));
    }
}

/// `/skill-name` mentions in free text
pub fn slash_commands(text: &str) -> Vec<String> {
    SLASH_COMMAND
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Locate the transcript to scan: `$TRANSCRIPT_PATH`, else the most
/// recently modified `*/transcript.jsonl` under `session_dir`.
pub fn find_latest_transcript(session_dir: &Path) -> Option<PathBuf> {
    if let Ok(path) = std::env::var(TRANSCRIPT_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    if !session_dir.exists() {
        return None;
    }

    WalkDir::new(session_dir)
        .min_depth(1)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == TRANSCRIPT_FILE)
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().ok()?;
            Some((modified, e.into_path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_malformed_lines() {
        let content = r#"{"role": "user", "content": "Use uv instead of pip"}
not json at all
{"role": "assistant", "content": [{"type": "text", "text": "Switching to uv."}]}

{"content": "no role here"}
"#;
        let transcript = parse_transcript(content);
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript.turns[0].parts(), Some((Role::User, "Use uv instead of pip")));
        assert_eq!(transcript.turns[1].parts(), Some((Role::Assistant, "Switching to uv.")));
        assert!(transcript.turns[2].parts().is_none());
    }

    #[test]
    fn test_nested_message_format() {
        let content = r#"{"type": "user", "message": {"role": "user", "content": "Yes, perfect!"}}"#;
        let transcript = parse_transcript(content);
        assert_eq!(transcript.turns[0].parts(), Some((Role::User, "Yes, perfect!")));
    }

    #[test]
    fn test_skill_invocations() {
        let content = r#"{"role": "user", "content": "/python-setup please, not /usr/bin/python"}
{"role": "assistant", "content": "ok", "tool_uses": [{"name": "Skill", "parameters": {"skill": "deploy"}}]}
{"role": "assistant", "content": [{"type": "tool_use", "name": "Skill", "input": {"skill": "review"}}]}
"#;
        let transcript = parse_transcript(content);
        assert_eq!(transcript.skills_used, vec!["deploy", "python-setup", "review"]);
    }

    #[test]
    fn test_path_like_skill_names_are_dropped() {
        let content = r#"{"role": "assistant", "content": "ok", "tool_uses": [{"name": "Skill", "parameters": {"skill": "../../x"}}, {"name": "Skill", "parameters": {"skill": "/etc"}}]}
{"role": "assistant", "content": [{"type": "tool_use", "name": "Skill", "input": {"skill": "a/b"}}, {"type": "tool_use", "name": "Skill", "input": {"skill": ""}}]}
{"role": "assistant", "content": [{"type": "tool_use", "name": "Skill", "input": {"skill": "plugin:lint_fix"}}]}
"#;
        let transcript = parse_transcript(content);
        assert_eq!(transcript.skills_used, vec!["plugin:lint_fix"]);
    }

    #[test]
    fn test_skill_name_check() {
        assert!(is_valid_skill_name("python-setup"));
        assert!(!is_valid_skill_name(".."));
        assert!(!is_valid_skill_name("x\\y"));
        assert!(!is_valid_skill_name("-rf"));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = load_transcript(Path::new("/definitely/not/here.jsonl")).unwrap_err();
        assert!(matches!(err, ReflectError::Io { .. }));
    }

    #[test]
    fn test_find_latest_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::write(a.join(TRANSCRIPT_FILE), "{}").unwrap();

        if std::env::var(TRANSCRIPT_ENV).is_err() {
            assert_eq!(find_latest_transcript(dir.path()), Some(a.join(TRANSCRIPT_FILE)));
            assert_eq!(find_latest_transcript(&dir.path().join("missing")), None);
        }
    }
}
