use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Rule-set configuration errors. Raised at load time, never while routing writes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OwnershipError {
    #[error("Pattern '{pattern}' is owned by both '{first}' and '{second}'")]
    ConflictingRules {
        pattern: String,
        first: String,
        second: String,
    },

    #[error("Invalid ownership pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// `(pattern, owner)` pair as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnershipRule {
    pub pattern: String,
    pub owner: String,
}

impl OwnershipRule {
    pub fn new(pattern: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            owner: owner.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: OwnershipRule,
    matcher: Pattern,
}

/// Validated rule set, ordered so the first match is the winning one
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl RuleSet {
    /// Validate and compile rules.
    ///
    /// Duplicate `(pattern, owner)` pairs collapse; the same pattern with two owners
    /// is a configuration error.
    pub fn load(rules: Vec<OwnershipRule>) -> Result<Self, OwnershipError> {
        let mut owners: HashMap<String, String> = HashMap::new();
        let mut compiled = Vec::with_capacity(rules.len());

        for rule in rules {
            let pattern = normalize_path(&rule.pattern);
            if escapes_root(&pattern) {
                return Err(OwnershipError::InvalidPattern {
                    pattern,
                    reason: "pattern climbs above the repository root".to_string(),
                });
            }
            if let Some(existing) = owners.get(&pattern) {
                if *existing != rule.owner {
                    return Err(OwnershipError::ConflictingRules {
                        pattern,
                        first: existing.clone(),
                        second: rule.owner,
                    });
                }
                continue;
            }

            let matcher = Pattern::new(&pattern).map_err(|e| OwnershipError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.msg.to_string(),
            })?;
            owners.insert(pattern.clone(), rule.owner.clone());
            compiled.push(CompiledRule {
                rule: OwnershipRule::new(pattern, rule.owner),
                matcher,
            });
        }

        // Longest pattern wins; equal lengths fall back to lexicographic order
        compiled.sort_by(|a, b| {
            b.rule
                .pattern
                .len()
                .cmp(&a.rule.pattern.len())
                .then_with(|| a.rule.pattern.cmp(&b.rule.pattern))
        });

        Ok(Self { rules: compiled })
    }

    /// Winning rule for an already-normalised path
    pub fn resolve(&self, path: &str) -> Option<&OwnershipRule> {
        self.rules
            .iter()
            .find(|r| r.matcher.matches_with(path, MATCH_OPTIONS))
            .map(|r| &r.rule)
    }

    pub fn rules(&self) -> impl Iterator<Item = &OwnershipRule> {
        self.rules.iter().map(|r| &r.rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Canonical form used for matching and as the cache key.
///
/// `..` is resolved lexically against the preceding segment. Segments that climb
/// above the root are kept as leading `..`, see [`escapes_root`].
pub fn normalize_path(path: &str) -> String {
    let normalized = path.trim().replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Whether a normalised path points outside the repository root
pub fn escapes_root(normalized: &str) -> bool {
    normalized == ".." || normalized.starts_with("../")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(pairs: &[(&str, &str)]) -> RuleSet {
        RuleSet::load(pairs.iter().map(|(p, o)| OwnershipRule::new(*p, *o)).collect()).unwrap()
    }

    #[test]
    fn test_longest_match_wins() {
        let set = rules(&[("docs/**", "A"), ("docs/specs/**", "B")]);
        assert_eq!(set.resolve("docs/specs/x.md").unwrap().owner, "B");
        assert_eq!(set.resolve("docs/readme.md").unwrap().owner, "A");
        assert_eq!(set.resolve("docs/guides/deep/page.md").unwrap().owner, "A");
        assert!(set.resolve("src/main.rs").is_none());
    }

    #[test]
    fn test_order_of_declaration_is_irrelevant() {
        let set = rules(&[("docs/specs/**", "B"), ("docs/**", "A")]);
        assert_eq!(set.resolve("docs/specs/x.md").unwrap().owner, "B");
    }

    #[test]
    fn test_single_star_stays_in_one_directory() {
        let set = rules(&[("reports/*.json", "reporter"), ("**/*.rs", "builder")]);
        assert_eq!(set.resolve("reports/daily.json").unwrap().owner, "reporter");
        assert!(set.resolve("reports/2024/daily.json").is_none());
        assert_eq!(set.resolve("src/queue/mod.rs").unwrap().owner, "builder");
    }

    #[test]
    fn test_conflicting_rules_rejected() {
        let err = RuleSet::load(vec![
            OwnershipRule::new("src/**", "builder"),
            OwnershipRule::new("./src/**", "reviewer"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            OwnershipError::ConflictingRules {
                pattern: "src/**".into(),
                first: "builder".into(),
                second: "reviewer".into(),
            }
        );
    }

    #[test]
    fn test_duplicate_rule_collapses() {
        let set = rules(&[("src/**", "builder"), ("src/**", "builder")]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = RuleSet::load(vec![OwnershipRule::new("src/***", "builder")]).unwrap_err();
        assert!(matches!(err, OwnershipError::InvalidPattern { .. }));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./docs/a.md"), "docs/a.md");
        assert_eq!(normalize_path("/docs//specs/./x.md"), "docs/specs/x.md");
        assert_eq!(normalize_path("docs\\specs\\x.md"), "docs/specs/x.md");
    }

    #[test]
    fn test_normalize_resolves_parent_segments() {
        assert_eq!(normalize_path("src/../docs/specs/x.md"), "docs/specs/x.md");
        assert_eq!(normalize_path("src/core/../../docs/a.md"), "docs/a.md");
        assert_eq!(normalize_path("./src/./../README.md"), "README.md");
        assert_eq!(normalize_path("src/../../etc/passwd"), "../etc/passwd");
        assert_eq!(normalize_path("../.."), "../..");

        assert!(escapes_root(&normalize_path("src/../../etc/passwd")));
        assert!(escapes_root(&normalize_path("..")));
        assert!(!escapes_root(&normalize_path("src/../docs/a.md")));
        assert!(!escapes_root("..hidden/file"));
    }

    #[test]
    fn test_pattern_above_root_rejected() {
        let err = RuleSet::load(vec![OwnershipRule::new("../shared/**", "builder")]).unwrap_err();
        assert!(matches!(err, OwnershipError::InvalidPattern { .. }));

        let set = rules(&[("src/../docs/**", "writer")]);
        assert_eq!(set.resolve("docs/a.md").unwrap().owner, "writer");
    }
}
