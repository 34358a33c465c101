//! Scope analysis - should a learning live in its skill or go global?
//!
//! Weighted indicator patterns score how project-specific or universal a
//! statement reads; cross-repository sightings in the ledger override both.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::store::{LearningCandidate, LearningLedger, LearningStatus};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Skill,
    Global,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Skill => write!(f, "skill"),
            Scope::Global => write!(f, "global"),
        }
    }
}

fn weighted(patterns: &[(&str, f64)]) -> Vec<(Regex, f64)> {
    patterns
        .iter()
        .filter_map(|(p, w)| Regex::new(&format!("(?i){}", p)).ok().map(|r| (r, *w)))
        .collect()
}

static PROJECT_INDICATORS: Lazy<Vec<(Regex, f64)>> = Lazy::new(|| {
    weighted(&[
        (r"src/components/", 2.0),
        (r"apps/", 2.0),
        (r"packages/", 2.0),
        (r"\.env\.", 2.0),
        (r"docker-compose", 2.0),
        (r"\b(?:client|customer|vendor)\s+name", 2.0),
        (r"\b(?:internal|proprietary)\b", 2.0),
        (r"\bapi\.[a-z]+\.com\b", 3.0),
        (r"\blocalhost:\d+", 2.0),
        (r"pnpm\s+-C\s+packages/", 3.0),
        (r"\bnx\s+", 2.0),
        (r"\bturbo\b", 2.0),
    ])
});

static GLOBAL_INDICATORS: Lazy<Vec<(Regex, f64)>> = Lazy::new(|| {
    weighted(&[
        (r"\brun\s+tests?\b", 3.0),
        (r"\bsmall\s+(?:pr|commit)", 2.0),
        (r"\bcommit\s+message", 2.0),
        (r"\bcode\s+review", 2.0),
        (r"\bverify\s+before", 2.0),
        (r"\bbackup\s+first", 2.0),
        (r"\balways\s+check", 2.0),
        (r"\bnever\s+commit\s+secrets", 3.0),
        (r"\bgit\b", 2.0),
        (r"\bdocker\b", 2.0),
        (r"\buse\s+(?:uv|pip|npm|yarn|pnpm)\b", 2.0),
        (r"\buse\s+(?:pytest|jest|vitest)\b", 2.0),
        (r"\buse\s+(?:ruff|eslint|prettier)\b", 2.0),
        (r"\bimmer\s+", 2.0),
        (r"\bniemals?\s+", 2.0),
        (r"\bverwende\s+", 2.0),
        (r"\bbenutze\s+", 2.0),
        (r"\bstatt\b", 2.0),
    ])
});

/// Ledger view of the analysed statement
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrossRepo {
    pub fingerprint: Option<String>,
    pub repo_count: usize,
    pub status: Option<LearningStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopeAnalysis {
    pub skill: String,
    pub recommended: Scope,
    pub reasons: Vec<String>,
    pub project_score: f64,
    pub global_score: f64,
    pub cross_repo: CrossRepo,
}

#[derive(Debug, Clone)]
pub struct ScopeAnalyzer {
    threshold: usize,
}

impl ScopeAnalyzer {
    pub fn new(threshold: usize) -> Self {
        Self { threshold: threshold.max(1) }
    }

    /// (project, global) indicator scores
    pub fn scores(&self, content: &str) -> (f64, f64) {
        let sum = |indicators: &[(Regex, f64)]| -> f64 {
            indicators.iter().filter(|(r, _)| r.is_match(content)).map(|(_, w)| w).sum()
        };
        (sum(PROJECT_INDICATORS.as_slice()), sum(GLOBAL_INDICATORS.as_slice()))
    }

    pub fn analyze(&self, content: &str, skill: &str, ledger: Option<&LearningLedger>) -> Result<ScopeAnalysis> {
        let (project_score, global_score) = self.scores(content);

        let cross_repo = match ledger {
            Some(ledger) => {
                let fingerprint = ledger.fingerprint_of(&LearningCandidate::from_text(content, Some(skill)));
                let learning = ledger.get(&fingerprint)?;
                CrossRepo {
                    repo_count: learning.as_ref().map(|l| l.repo_count()).unwrap_or(0),
                    status: learning.map(|l| l.status),
                    fingerprint: Some(fingerprint),
                }
            }
            None => CrossRepo::default(),
        };

        let mut reasons = Vec::new();
        let recommended = if cross_repo.repo_count >= self.threshold {
            if cross_repo.status == Some(LearningStatus::Promoted) {
                reasons.push("Already promoted to global".to_string());
            } else {
                reasons.push(format!("Seen in {} repos", cross_repo.repo_count));
            }
            Scope::Global
        } else if global_score > project_score * 1.5 && global_score >= 4.0 {
            reasons.push(format!("Strong global indicators (score {:.1})", global_score));
            Scope::Global
        } else if project_score > global_score * 1.5 && project_score >= 4.0 {
            reasons.push(format!("Strong project indicators (score {:.1})", project_score));
            Scope::Skill
        } else {
            reasons.push("No strong indicators, keeping in skill".to_string());
            Scope::Skill
        };

        Ok(ScopeAnalysis {
            skill: skill.to_string(),
            recommended,
            reasons,
            project_score,
            global_score,
            cross_repo,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores() {
        let analyzer = ScopeAnalyzer::new(2);
        let (project, global) = analyzer.scores("Always check git status and run tests");
        assert_eq!(project, 0.0);
        assert_eq!(global, 7.0);

        let (project, _) = analyzer.scores("the dev server is on localhost:3000 in apps/web");
        assert_eq!(project, 4.0);
    }

    #[test]
    fn test_global_indicators_win() {
        let analysis = ScopeAnalyzer::new(2)
            .analyze("Always run tests before a commit message is written", "general", None)
            .unwrap();
        assert_eq!(analysis.recommended, Scope::Global);
    }

    #[test]
    fn test_project_indicators_keep_skill() {
        let analysis = ScopeAnalyzer::new(2)
            .analyze("Point the client at api.acme.com via localhost:8080", "web", None)
            .unwrap();
        assert_eq!(analysis.recommended, Scope::Skill);
        assert!(analysis.reasons[0].starts_with("Strong project indicators"));
    }

    #[test]
    fn test_cross_repo_overrides_scores() {
        let ledger = LearningLedger::open_in_memory(2).unwrap();
        let text = "Prefer descriptive variable names";
        let c = LearningCandidate::from_text(text, Some("style"));
        ledger.record(&c, "A").unwrap();

        let analyzer = ScopeAnalyzer::new(2);
        assert_eq!(analyzer.analyze(text, "style", Some(&ledger)).unwrap().recommended, Scope::Skill);

        ledger.record(&c, "B").unwrap();
        let analysis = analyzer.analyze(text, "style", Some(&ledger)).unwrap();
        assert_eq!(analysis.recommended, Scope::Global);
        assert_eq!(analysis.cross_repo.repo_count, 2);
    }
}
