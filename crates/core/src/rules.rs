//! C2 — rule engine: ordered include/exclude decisions with optional
//! attribute predicates (spec.md §4.2).

use crate::error::StrataResult;
use crate::pattern::{PatternDialect, PatternMatcher};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Include,
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    All,
    Any,
    None,
}

/// The value side of a [`Condition`], loosely typed so that config (TOML/JSON)
/// can express numbers, booleans, or strings without a schema per attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl ConditionValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            ConditionValue::Int(i) => Some(*i as f64),
            ConditionValue::Float(f) => Some(*f),
            ConditionValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ConditionValue::Str(_) => None,
        }
    }

    fn as_str(&self) -> String {
        match self {
            ConditionValue::Int(i) => i.to_string(),
            ConditionValue::Float(f) => f.to_string(),
            ConditionValue::Bool(b) => b.to_string(),
            ConditionValue::Str(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub comparator: String,
    pub value: ConditionValue,
}

/// Snapshot of file attributes used to evaluate [`Condition`]s, matching the
/// field set of `shadowfs.rules.engine.get_file_attrs` (spec.md §4.2 / SPEC_FULL §3).
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    pub size: Option<u64>,
    pub mtime: Option<f64>,
    pub ctime: Option<f64>,
    pub atime: Option<f64>,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub is_file: Option<bool>,
    pub is_dir: Option<bool>,
    pub is_symlink: Option<bool>,
    pub permissions: Option<String>,
}

impl Attributes {
    fn field(&self, name: &str) -> Option<ConditionValue> {
        match name {
            "size" => self.size.map(|v| ConditionValue::Int(v as i64)),
            "mtime" => self.mtime.map(ConditionValue::Float),
            "ctime" => self.ctime.map(ConditionValue::Float),
            "atime" => self.atime.map(ConditionValue::Float),
            "mode" => self.mode.map(|v| ConditionValue::Int(v as i64)),
            "uid" => self.uid.map(|v| ConditionValue::Int(v as i64)),
            "gid" => self.gid.map(|v| ConditionValue::Int(v as i64)),
            "is_file" => self.is_file.map(ConditionValue::Bool),
            "is_dir" => self.is_dir.map(ConditionValue::Bool),
            "is_symlink" => self.is_symlink.map(ConditionValue::Bool),
            "permissions" => self.permissions.clone().map(ConditionValue::Str),
            _ => None,
        }
    }
}

/// Renders permission bits as an `ls`-style string, e.g. `-rw-r--r--`.
pub fn format_permissions(mode: u32, is_dir: bool, is_symlink: bool) -> String {
    let kind = if is_symlink { 'l' } else if is_dir { 'd' } else { '-' };
    let bits = [
        (mode & 0o400 != 0, 'r'),
        (mode & 0o200 != 0, 'w'),
        (mode & 0o100 != 0, 'x'),
        (mode & 0o040 != 0, 'r'),
        (mode & 0o020 != 0, 'w'),
        (mode & 0o010 != 0, 'x'),
        (mode & 0o004 != 0, 'r'),
        (mode & 0o002 != 0, 'w'),
        (mode & 0o001 != 0, 'x'),
    ];
    let mut s = String::with_capacity(10);
    s.push(kind);
    for (set, ch) in bits {
        s.push(if set { ch } else { '-' });
    }
    s
}

pub fn unix_time(t: std::time::SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

fn evaluate_condition(condition: &Condition, attrs: &Attributes) -> bool {
    let Some(actual) = attrs.field(&condition.field) else {
        return false;
    };
    let expected = &condition.value;
    match condition.comparator.as_str() {
        "eq" => numeric_or_string_eq(&actual, expected),
        "ne" => !numeric_or_string_eq(&actual, expected),
        "lt" => compare(&actual, expected).map(|o| o.is_lt()).unwrap_or(false),
        "le" => compare(&actual, expected).map(|o| o.is_le()).unwrap_or(false),
        "gt" => compare(&actual, expected).map(|o| o.is_gt()).unwrap_or(false),
        "ge" => compare(&actual, expected).map(|o| o.is_ge()).unwrap_or(false),
        "contains" => actual.as_str().contains(&expected.as_str()),
        "starts-with" => actual.as_str().starts_with(&expected.as_str()),
        "ends-with" => actual.as_str().ends_with(&expected.as_str()),
        "matches" => regex::Regex::new(&expected.as_str())
            .map(|re| re.is_match(&actual.as_str()))
            .unwrap_or(false),
        _ => false,
    }
}

fn numeric_or_string_eq(a: &ConditionValue, b: &ConditionValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a.as_str() == b.as_str(),
    }
}

fn compare(a: &ConditionValue, b: &ConditionValue) -> Option<std::cmp::Ordering> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => Some(a.as_str().cmp(&b.as_str())),
    }
}

fn evaluate_conditions(conditions: &[Condition], combinator: Combinator, attrs: &Attributes) -> bool {
    if conditions.is_empty() {
        return true;
    }
    let results: Vec<bool> = conditions.iter().map(|c| evaluate_condition(c, attrs)).collect();
    match combinator {
        Combinator::All => results.iter().all(|&r| r),
        Combinator::Any => results.iter().any(|&r| r),
        Combinator::None => !results.iter().all(|&r| r),
    }
}

/// Config-facing rule definition (spec.md §3's `Rule` data model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: Option<String>,
    pub action: RuleAction,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default = "default_dialect")]
    pub pattern_dialect: PatternDialect,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default = "default_combinator")]
    pub combinator: Combinator,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_dialect() -> PatternDialect {
    PatternDialect::Glob
}
fn default_combinator() -> Combinator {
    Combinator::All
}
fn default_true() -> bool {
    true
}

struct CompiledRule {
    rule: Rule,
    matcher: Option<PatternMatcher>,
}

/// C2: `visible(path, attrs) -> bool`, pure function of stored state (spec.md
/// invariant #2).
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
    default_action: RuleAction,
}

impl RuleEngine {
    pub fn new(default_action: RuleAction) -> Self {
        Self { rules: Vec::new(), default_action }
    }

    /// Registers a rule. Patterns/regexes compile now; a bad pattern rejects
    /// the whole rule (spec.md §3 invariant).
    pub fn add_rule(&mut self, rule: Rule) -> StrataResult<()> {
        let matcher = if rule.patterns.is_empty() {
            None
        } else {
            let mut m = PatternMatcher::new(false);
            for p in &rule.patterns {
                m.add(p, rule.pattern_dialect)?;
            }
            Some(m)
        };
        self.rules.push(CompiledRule { rule, matcher });
        // Stable sort: ties keep insertion order (spec.md §4.2).
        self.rules.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
        Ok(())
    }

    /// Removes the first rule with a matching name. Name uniqueness is not enforced.
    pub fn remove_rule(&mut self, name: &str) -> bool {
        if let Some(idx) = self.rules.iter().position(|r| r.rule.name.as_deref() == Some(name)) {
            self.rules.remove(idx);
            true
        } else {
            false
        }
    }

    pub fn enable_rule(&mut self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    pub fn disable_rule(&mut self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        for r in &mut self.rules {
            if r.rule.name.as_deref() == Some(name) {
                r.rule.enabled = enabled;
                return true;
            }
        }
        false
    }

    pub fn default_action(&self) -> RuleAction {
        self.default_action
    }

    pub fn set_default_action(&mut self, action: RuleAction) {
        self.default_action = action;
    }

    pub fn rules(&self) -> Vec<&Rule> {
        self.rules.iter().map(|r| &r.rule).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn rule_matches(&self, compiled: &CompiledRule, path: &str, attrs: Option<&Attributes>) -> bool {
        if let Some(matcher) = &compiled.matcher {
            if !matcher.matches(path) {
                return false;
            }
        }
        if !compiled.rule.conditions.is_empty() {
            let Some(attrs) = attrs else {
                return false;
            };
            if !evaluate_conditions(&compiled.rule.conditions, compiled.rule.combinator, attrs) {
                return false;
            }
        }
        true
    }

    /// Never panics/throws: the pure decision function from spec.md §4.2.
    pub fn visible(&self, path: &str, attrs: Option<&Attributes>) -> bool {
        for compiled in &self.rules {
            if !compiled.rule.enabled {
                continue;
            }
            if self.rule_matches(compiled, path, attrs) {
                return compiled.rule.action == RuleAction::Include;
            }
        }
        self.default_action == RuleAction::Include
    }
}

/// Builds [`Attributes`] from OS metadata, mirroring
/// `shadowfs.rules.engine.get_file_attrs`.
#[cfg(unix)]
pub fn attrs_from_metadata(meta: &std::fs::Metadata) -> Attributes {
    use std::os::unix::fs::MetadataExt;
    let mode = meta.mode();
    let is_dir = meta.is_dir();
    let is_symlink = meta.file_type().is_symlink();
    Attributes {
        size: Some(meta.size()),
        mtime: Some(unix_time(meta.modified().unwrap_or(SystemTime::UNIX_EPOCH))),
        ctime: Some(meta.ctime() as f64),
        atime: Some(unix_time(meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH))),
        mode: Some(mode),
        uid: Some(meta.uid()),
        gid: Some(meta.gid()),
        is_file: Some(meta.is_file()),
        is_dir: Some(is_dir),
        is_symlink: Some(is_symlink),
        permissions: Some(format_permissions(mode, is_dir, is_symlink)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, action: RuleAction, patterns: &[&str], priority: i64) -> Rule {
        Rule {
            name: Some(name.to_string()),
            action,
            patterns: patterns.iter().map(|s| s.to_string()).collect(),
            pattern_dialect: PatternDialect::Glob,
            conditions: vec![],
            combinator: Combinator::All,
            priority,
            enabled: true,
        }
    }

    #[test]
    fn first_match_wins_by_priority() {
        let mut engine = RuleEngine::new(RuleAction::Include);
        engine.add_rule(rule("exclude-tmp", RuleAction::Exclude, &["*.tmp"], 100)).unwrap();
        engine.add_rule(rule("include-all", RuleAction::Include, &["*"], 0)).unwrap();

        assert!(engine.visible("keep.txt", None));
        assert!(!engine.visible("drop.tmp", None));
    }

    #[test]
    fn default_action_when_no_rule_matches() {
        let mut engine = RuleEngine::new(RuleAction::Exclude);
        engine.add_rule(rule("only-md", RuleAction::Include, &["*.md"], 0)).unwrap();
        assert!(!engine.visible("a.rs", None));
        assert!(engine.visible("a.md", None));
    }

    #[test]
    fn conditions_without_attrs_never_match() {
        let mut engine = RuleEngine::new(RuleAction::Include);
        let mut r = rule("big-files", RuleAction::Exclude, &[], 10);
        r.conditions = vec![Condition {
            field: "size".into(),
            comparator: "gt".into(),
            value: ConditionValue::Int(1000),
        }];
        engine.add_rule(r).unwrap();
        assert!(engine.visible("anything", None));
    }

    #[test]
    fn all_include_rules_always_visible() {
        let mut engine = RuleEngine::new(RuleAction::Exclude);
        engine.add_rule(rule("include-everything", RuleAction::Include, &["**"], 0)).unwrap();
        assert!(engine.visible("any/nested/path.txt", None));
        assert!(engine.visible("top.txt", None));
    }

    #[test]
    fn bad_pattern_rejects_whole_rule() {
        let mut engine = RuleEngine::new(RuleAction::Include);
        let bad = rule("bad", RuleAction::Exclude, &["a**b"], 0);
        assert!(engine.add_rule(bad).is_err());
    }

    #[test]
    fn disable_rule_skips_it() {
        let mut engine = RuleEngine::new(RuleAction::Include);
        engine.add_rule(rule("drop-tmp", RuleAction::Exclude, &["*.tmp"], 10)).unwrap();
        engine.disable_rule("drop-tmp");
        assert!(engine.visible("x.tmp", None));
    }

    #[test]
    fn condition_combinators() {
        let mut engine = RuleEngine::new(RuleAction::Include);
        let mut r = rule("large-and-old", RuleAction::Exclude, &[], 5);
        r.combinator = Combinator::Any;
        r.conditions = vec![
            Condition { field: "size".into(), comparator: "gt".into(), value: ConditionValue::Int(1_000_000) },
            Condition { field: "is_symlink".into(), comparator: "eq".into(), value: ConditionValue::Bool(true) },
        ];
        engine.add_rule(r).unwrap();

        let mut attrs = Attributes::default();
        attrs.is_symlink = Some(true);
        attrs.size = Some(10);
        assert!(!engine.visible("link", Some(&attrs)));
    }
}
