//! SKILL.md document tree
//!
//! A skill document is YAML front matter between `---` delimiters followed
//! by Markdown. The body is kept as an ordered list of heading sections so
//! edits touch only the section they target and everything else serialises
//! back byte for byte.
//!
//! ```markdown
//! ---
//! name: python
//! description: Python project conventions
//! ---
//! # Python
//!
//! ## Critical Corrections
//!
//! - Use 'uv' instead of 'pip'
//! ```

use serde_yaml::{Mapping, Value};
use std::path::Path;

use crate::error::{ReflectError, Result};
use crate::learning::detector::Confidence;
use crate::types::single_line;

pub const CRITICAL_CORRECTIONS: &str = "Critical Corrections";
pub const BEST_PRACTICES: &str = "Best Practices";
pub const CONSIDERATIONS: &str = "Considerations";

/// Section a signal of the given confidence is filed under
pub fn section_for(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::High => CRITICAL_CORRECTIONS,
        Confidence::Medium => BEST_PRACTICES,
        Confidence::Low => CONSIDERATIONS,
    }
}

/// One heading and the text up to the next heading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub level: usize,
    pub title: String,
    heading: String,
    pub body: String,
}

impl Section {
    fn new(level: usize, title: &str) -> Self {
        Self {
            level,
            title: title.to_string(),
            heading: format!("{} {}\n", "#".repeat(level), title),
            body: String::new(),
        }
    }

    /// Bullet entries directly under this heading
    pub fn entries(&self) -> Vec<String> {
        self.body
            .lines()
            .filter_map(|l| {
                let l = l.trim_start();
                l.strip_prefix("- ").or_else(|| l.strip_prefix("* ")).map(|e| e.trim().to_string())
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkillDocument {
    pub frontmatter: Mapping,
    /// Original front matter text, dropped once a field is changed
    raw_frontmatter: Option<String>,
    /// Text between the front matter and the first heading
    pub preamble: String,
    pub sections: Vec<Section>,
}

impl SkillDocument {
    /// Fresh document for a skill that has no file yet
    pub fn new(name: &str, description: &str) -> Self {
        let mut frontmatter = Mapping::new();
        frontmatter.insert(Value::from("name"), Value::from(name));
        frontmatter.insert(Value::from("description"), Value::from(description));
        let mut title = Section::new(1, name);
        title.body = "\n".to_string();
        Self { frontmatter, raw_frontmatter: None, preamble: "\n".to_string(), sections: vec![title] }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ReflectError::io(path, e))?;
        Self::parse(&content, &path.display().to_string())
    }

    pub fn parse(content: &str, source_name: &str) -> Result<Self> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut lines = content.split_inclusive('\n');

        match lines.next() {
            Some(first) if first.trim_end() == "---" => {}
            _ => return Err(ReflectError::parse(source_name, "missing '---' front matter delimiter")),
        }

        let mut raw = String::new();
        let mut closed = false;
        for line in lines.by_ref() {
            if line.trim_end() == "---" {
                closed = true;
                break;
            }
            raw.push_str(line);
        }
        if !closed {
            return Err(ReflectError::parse(source_name, "missing closing '---' front matter delimiter"));
        }

        let frontmatter = match serde_yaml::from_str::<Value>(&raw)
            .map_err(|e| ReflectError::parse(source_name, format!("invalid front matter YAML: {}", e)))?
        {
            Value::Mapping(m) => m,
            Value::Null => Mapping::new(),
            _ => return Err(ReflectError::parse(source_name, "front matter is not a key-value mapping")),
        };

        let mut preamble = String::new();
        let mut sections: Vec<Section> = Vec::new();
        let mut in_fence = false;
        for line in lines {
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence = !in_fence;
            }
            match (!in_fence).then(|| parse_heading(line)).flatten() {
                Some((level, title)) => sections.push(Section {
                    level,
                    title,
                    heading: line.to_string(),
                    body: String::new(),
                }),
                None => match sections.last_mut() {
                    Some(section) => section.body.push_str(line),
                    None => preamble.push_str(line),
                },
            }
        }

        Ok(Self { frontmatter, raw_frontmatter: Some(raw), preamble, sections })
    }

    pub fn name(&self) -> Option<&str> {
        self.field("name").and_then(Value::as_str)
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.frontmatter.get(key)
    }

    /// Set a front matter field, keeping the position of an existing key
    pub fn set_field(&mut self, key: &str, value: Value) {
        self.frontmatter.insert(Value::from(key), value);
        self.raw_frontmatter = None;
    }

    pub fn section(&self, title: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.title.eq_ignore_ascii_case(title.trim()))
    }

    pub fn has_section(&self, title: &str) -> bool {
        self.section(title).is_some()
    }

    pub fn contains_entry(&self, title: &str, entry: &str) -> bool {
        self.section(title)
            .map(|s| {
                let entry = single_line(entry);
                s.entries().iter().any(|e| e.eq_ignore_ascii_case(&entry))
            })
            .unwrap_or(false)
    }

    /// Add a bullet to the end of a section, creating the section (as a
    /// level-two heading at the end of the document) when it is missing.
    pub fn append_entry(&mut self, title: &str, entry: &str) {
        let bullet = format!("- {}\n", single_line(entry));

        if let Some(index) = self
            .sections
            .iter()
            .position(|s| s.title.eq_ignore_ascii_case(title.trim()))
        {
            let is_last = index + 1 == self.sections.len();
            let section = &mut self.sections[index];
            let existing = section.body.trim_end();
            section.body = if existing.is_empty() {
                format!("\n{}", bullet)
            } else {
                format!("{}\n{}", existing, bullet)
            };
            if !is_last {
                section.body.push('\n');
            }
            return;
        }

        match self.sections.last_mut() {
            Some(last) => ensure_blank_line(&mut last.body),
            None => ensure_blank_line(&mut self.preamble),
        }
        let mut section = Section::new(2, title.trim());
        section.body = format!("\n{}", bullet);
        self.sections.push(section);
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::from("---\n");
        match &self.raw_frontmatter {
            Some(raw) => out.push_str(raw),
            None if self.frontmatter.is_empty() => {}
            None => out.push_str(&serde_yaml::to_string(&self.frontmatter).unwrap_or_default()),
        }
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("---\n");
        out.push_str(&self.preamble);
        for section in &self.sections {
            out.push_str(&section.heading);
            if !section.heading.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&section.body);
        }
        out
    }

    /// Structural check: a non-empty `name` and every required section
    pub fn validate(&self, required_sections: &[&str]) -> std::result::Result<(), String> {
        match self.name() {
            Some(name) if !name.trim().is_empty() => {}
            _ => return Err("front matter has no 'name'".to_string()),
        }
        for title in required_sections {
            if !self.has_section(title) {
                return Err(format!("section '{}' is missing", title));
            }
        }
        Ok(())
    }
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
    let line = line.trim_end();
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    Some((level, rest.trim().trim_end_matches('#').trim().to_string()))
}

fn ensure_blank_line(text: &mut String) {
    let trimmed = text.trim_end();
    *text = if trimmed.is_empty() { "\n".to_string() } else { format!("{}\n\n", trimmed) };
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "---\n\
name: python\n\
description: Python conventions  # keep this comment\n\
tags: [lang, tooling]\n\
---\n\
# Python\n\
\n\
Intro text.\n\
\n\
## Critical Corrections\n\
\n\
- Use 'uv' instead of 'pip'\n\
\n\
## Notes\n\
\n\
```bash\n\
# not a heading\n\
```\n";

    #[test]
    fn test_round_trip_is_exact() {
        let doc = SkillDocument::parse(SAMPLE, "sample").unwrap();
        assert_eq!(doc.to_markdown(), SAMPLE);
        assert_eq!(doc.name(), Some("python"));
        let titles: Vec<&str> = doc.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Python", "Critical Corrections", "Notes"]);
    }

    #[test]
    fn test_append_to_existing_section() {
        let mut doc = SkillDocument::parse(SAMPLE, "sample").unwrap();
        doc.append_entry(CRITICAL_CORRECTIONS, "Use 'ruff' instead of 'flake8'");

        let out = doc.to_markdown();
        assert!(out.contains(
            "## Critical Corrections\n\n- Use 'uv' instead of 'pip'\n- Use 'ruff' instead of 'flake8'\n\n## Notes"
        ));
        // front matter comment survives because the mapping was not touched
        assert!(out.contains("# keep this comment"));
        assert!(doc.contains_entry("critical corrections", "use 'ruff' instead of 'flake8'"));
    }

    #[test]
    fn test_append_creates_missing_section() {
        let mut doc = SkillDocument::parse(SAMPLE, "sample").unwrap();
        doc.append_entry(BEST_PRACTICES, "Approved approach: small commits");

        let out = doc.to_markdown();
        assert!(out.ends_with("```\n\n## Best Practices\n\n- Approved approach: small commits\n"));
        let reparsed = SkillDocument::parse(&out, "out").unwrap();
        assert_eq!(reparsed.section(BEST_PRACTICES).unwrap().entries(), vec!["Approved approach: small commits"]);
    }

    #[test]
    fn test_multiline_entry_keeps_later_headings() {
        let mut doc = SkillDocument::parse(SAMPLE, "sample").unwrap();
        doc.append_entry(BEST_PRACTICES, "Run this:\n```bash\nruff check .");
        doc.append_entry(CONSIDERATIONS, "Pin versions");

        let out = doc.to_markdown();
        assert!(out.contains("- Run this: ``bash ruff check .\n"));
        let reparsed = SkillDocument::parse(&out, "out").unwrap();
        assert!(reparsed.has_section(CONSIDERATIONS));
        assert!(reparsed.contains_entry(BEST_PRACTICES, "Run this:\n```bash\nruff check ."));
        assert!(reparsed.validate(&[BEST_PRACTICES, CONSIDERATIONS]).is_ok());
    }

    #[test]
    fn test_set_field_preserves_key_order() {
        let mut doc = SkillDocument::parse(SAMPLE, "sample").unwrap();
        doc.set_field("description", Value::from("Updated"));
        doc.set_field("version", Value::from("1.1.0"));

        let out = doc.to_markdown();
        let name = out.find("name:").unwrap();
        let description = out.find("description: Updated").unwrap();
        let tags = out.find("tags:").unwrap();
        let version = out.find("version:").unwrap();
        assert!(name < description && description < tags && tags < version);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(SkillDocument::parse("# No front matter\n", "x"), Err(ReflectError::Parse { .. })));
        assert!(matches!(SkillDocument::parse("---\nname: x\n", "x"), Err(ReflectError::Parse { .. })));
        assert!(matches!(SkillDocument::parse("---\n- a\n- b\n---\n", "x"), Err(ReflectError::Parse { .. })));
        assert!(matches!(SkillDocument::parse("---\nname: [unclosed\n---\n", "x"), Err(ReflectError::Parse { .. })));
    }

    #[test]
    fn test_validate() {
        let doc = SkillDocument::parse(SAMPLE, "sample").unwrap();
        assert!(doc.validate(&[CRITICAL_CORRECTIONS]).is_ok());
        assert!(doc.validate(&[CONSIDERATIONS]).is_err());

        let nameless = SkillDocument::parse("---\ndescription: x\n---\n", "x").unwrap();
        assert!(nameless.validate(&[]).is_err());
    }

    #[test]
    fn test_new_document() {
        let mut doc = SkillDocument::new("git", "Git workflow");
        doc.append_entry(CRITICAL_CORRECTIONS, "Avoid: force push");
        let out = doc.to_markdown();
        assert!(out.starts_with("---\nname: git\ndescription: Git workflow\n---\n\n# git\n\n## Critical Corrections\n"));
        let reparsed = SkillDocument::parse(&out, "new").unwrap();
        assert!(reparsed.validate(&[CRITICAL_CORRECTIONS]).is_ok());
    }

    #[test]
    fn test_section_for_confidence() {
        assert_eq!(section_for(Confidence::High), CRITICAL_CORRECTIONS);
        assert_eq!(section_for(Confidence::Medium), BEST_PRACTICES);
        assert_eq!(section_for(Confidence::Low), CONSIDERATIONS);
    }
}
