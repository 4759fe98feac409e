//! C1 — pattern matcher: compiles glob/regex dialects into testable matchers
//! (spec.md §4.1).

use crate::error::{StrataError, StrataResult};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Pattern dialect a [`Rule`](crate::rules::Rule) or ad-hoc matcher is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternDialect {
    Glob,
    Regex,
}

/// Normalizes an incoming path: backslashes to slashes, leading slash stripped.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    unified.strip_prefix('/').map(str::to_string).unwrap_or(unified)
}

#[derive(Debug, PartialEq, Eq, Clone)]
enum Segment {
    DoubleStar,
    Literal(String),
}

/// Translates a single glob into an anchored regex body (no `^`/`$`).
fn glob_to_regex_body(pattern: &str) -> StrataResult<String> {
    let normalized = normalize_path(pattern);
    let raw_segments: Vec<&str> = normalized.split('/').collect();

    let mut segments = Vec::with_capacity(raw_segments.len());
    for seg in &raw_segments {
        if *seg == "**" {
            segments.push(Segment::DoubleStar);
            continue;
        }
        if seg.contains("**") {
            return Err(StrataError::InvalidInput(format!(
                "pattern `{pattern}` has `**` appearing mid-segment in `{seg}`; `**` must be a whole path segment"
            )));
        }
        segments.push(Segment::Literal(translate_segment(seg)));
    }

    let n = segments.len();
    let mut out = String::new();
    let mut suppress_join = false;
    let mut i = 0;
    while i < n {
        match &segments[i] {
            Segment::Literal(frag) => {
                if !out.is_empty() && !suppress_join {
                    out.push('/');
                }
                out.push_str(frag);
                suppress_join = false;
                i += 1;
            }
            Segment::DoubleStar => {
                let mut j = i;
                while j < n && segments[j] == Segment::DoubleStar {
                    j += 1;
                }
                let is_start = i == 0;
                let is_end = j == n;
                if is_start && is_end {
                    out.push_str(".*");
                } else if is_start {
                    out.push_str("(?:.*/)?");
                    suppress_join = true;
                } else if is_end {
                    out.push_str("(?:/.*)?");
                } else {
                    out.push_str("(?:/.*)?");
                }
                i = j;
            }
        }
    }
    Ok(out)
}

fn translate_segment(seg: &str) -> String {
    let mut out = String::with_capacity(seg.len());
    for c in seg.chars() {
        match c {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out
}

/// A single compiled pattern entry, either glob or regex, optionally case-insensitive.
struct CompiledPattern {
    dialect: PatternDialect,
    regex: Regex,
}

impl CompiledPattern {
    fn compile_glob(pattern: &str, case_insensitive: bool) -> StrataResult<Self> {
        let body = glob_to_regex_body(pattern)?;
        let anchored = format!("^{body}$");
        let regex = RegexBuilder::new(&anchored)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| StrataError::InvalidInput(format!("invalid glob `{pattern}`: {e}")))?;
        Ok(Self { dialect: PatternDialect::Glob, regex })
    }

    fn compile_regex(pattern: &str, case_insensitive: bool) -> StrataResult<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| StrataError::InvalidInput(format!("invalid regex `{pattern}`: {e}")))?;
        Ok(Self { dialect: PatternDialect::Regex, regex })
    }

    fn matches(&self, path: &str) -> bool {
        let normalized = normalize_path(path);
        match self.dialect {
            // Glob patterns are anchored full matches against the normalized path.
            PatternDialect::Glob => self.regex.is_match(&normalized),
            // Regex dialect is an unanchored search, per spec.md §4.1.
            PatternDialect::Regex => self.regex.is_match(&normalized),
        }
    }
}

/// A composite matcher holding an ordered list of (pattern, dialect) entries.
/// Reports a match iff any entry matches (spec.md §4.1).
pub struct PatternMatcher {
    entries: Vec<CompiledPattern>,
    case_insensitive: bool,
}

impl PatternMatcher {
    pub fn new(case_insensitive: bool) -> Self {
        Self { entries: Vec::new(), case_insensitive }
    }

    pub fn add_glob(&mut self, pattern: &str) -> StrataResult<()> {
        self.entries.push(CompiledPattern::compile_glob(pattern, self.case_insensitive)?);
        Ok(())
    }

    pub fn add_regex(&mut self, pattern: &str) -> StrataResult<()> {
        self.entries.push(CompiledPattern::compile_regex(pattern, self.case_insensitive)?);
        Ok(())
    }

    pub fn add(&mut self, pattern: &str, dialect: PatternDialect) -> StrataResult<()> {
        match dialect {
            PatternDialect::Glob => self.add_glob(pattern),
            PatternDialect::Regex => self.add_regex(pattern),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.entries.iter().any(|e| e.matches(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_one_segment_only() {
        let mut m = PatternMatcher::new(false);
        m.add_glob("*.py").unwrap();
        assert!(m.matches("a.py"));
        assert!(!m.matches("dir/a.py"));
    }

    #[test]
    fn double_star_matches_any_depth() {
        let mut m = PatternMatcher::new(false);
        m.add_glob("src/**/test.rs").unwrap();
        assert!(m.matches("src/test.rs"));
        assert!(m.matches("src/a/test.rs"));
        assert!(m.matches("src/a/b/test.rs"));
        assert!(!m.matches("other/test.rs"));
    }

    #[test]
    fn double_star_prefix_and_suffix() {
        let mut m = PatternMatcher::new(false);
        m.add_glob("**/target").unwrap();
        assert!(m.matches("target"));
        assert!(m.matches("a/b/target"));

        let mut m2 = PatternMatcher::new(false);
        m2.add_glob("build/**").unwrap();
        assert!(m2.matches("build"));
        assert!(m2.matches("build/x/y"));
    }

    #[test]
    fn mid_segment_double_star_is_rejected() {
        let mut m = PatternMatcher::new(false);
        assert!(m.add_glob("a**b").is_err());
    }

    #[test]
    fn case_insensitive_mode() {
        let mut m = PatternMatcher::new(true);
        m.add_glob("*.TXT").unwrap();
        assert!(m.matches("readme.txt"));
    }

    #[test]
    fn regex_dialect_is_unanchored() {
        let mut m = PatternMatcher::new(false);
        m.add_regex(r"\.tmp$").unwrap();
        assert!(m.matches("some/path/file.tmp"));
        assert!(!m.matches("some/path/file.tmpx"));
    }

    #[test]
    fn composite_any_match() {
        let mut m = PatternMatcher::new(false);
        m.add_glob("*.md").unwrap();
        m.add_glob("*.txt").unwrap();
        assert!(m.matches("a.md"));
        assert!(m.matches("b.txt"));
        assert!(!m.matches("c.rs"));
    }
}
