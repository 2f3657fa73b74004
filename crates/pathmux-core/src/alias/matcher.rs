//! Single alias rule evaluation.
//!
//! ## Pattern kinds
//!
//! - Prefix: `@` matches `@` and `@/anything`, but not `@scope/pkg`'s sibling
//!   `@scope`. A pattern ending in `/` matches anything starting with it.
//! - Glob: one `*` wildcard (`~icons/*`); the captured text replaces `*` in
//!   the replacement.
//! - Regex: full regular expression; the replacement may use `$1`-style
//!   group references.

use crate::error::ConfigError;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The declared shape of an alias pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasPattern {
    Prefix(String),
    Glob(String),
    Regex(String),
}

impl AliasPattern {
    /// Classify a plain string pattern: anything containing `*` is a glob.
    #[must_use]
    pub fn from_str_pattern(s: &str) -> Self {
        if s.contains('*') {
            Self::Glob(s.to_string())
        } else {
            Self::Prefix(s.to_string())
        }
    }

    /// The pattern text as written.
    #[must_use]
    pub fn source(&self) -> &str {
        match self {
            Self::Prefix(s) | Self::Glob(s) | Self::Regex(s) => s,
        }
    }
}

impl fmt::Display for AliasPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regex(s) => write!(f, "/{s}/"),
            Self::Prefix(s) | Self::Glob(s) => f.write_str(s),
        }
    }
}

/// A configured rewrite: `pattern` → `replacement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRule {
    pub pattern: AliasPattern,
    pub replacement: String,
}

impl AliasRule {
    #[must_use]
    pub fn new(pattern: AliasPattern, replacement: impl Into<String>) -> Self {
        Self {
            pattern,
            replacement: replacement.into(),
        }
    }

    /// Shorthand for a prefix rule.
    #[must_use]
    pub fn prefix(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self::new(AliasPattern::Prefix(pattern.into()), replacement)
    }
}

/// Outcome of evaluating one rule against one specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub matched: bool,
    pub rewritten: Option<String>,
}

impl MatchResult {
    #[must_use]
    pub fn miss() -> Self {
        Self {
            matched: false,
            rewritten: None,
        }
    }

    #[must_use]
    pub fn hit(rewritten: String) -> Self {
        Self {
            matched: true,
            rewritten: Some(rewritten),
        }
    }
}

#[derive(Debug, Clone)]
enum Compiled {
    Prefix(String),
    Glob { prefix: String, suffix: String },
    Regex {
        re: Regex,
        /// Literal text every match starts with, when the source is
        /// `^`-anchored.
        prefix: Option<String>,
    },
}

/// A compiled alias rule.
///
/// Stateless: evaluating it has no side effects and does not depend on any
/// other rule.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    rule: AliasRule,
    compiled: Compiled,
}

impl PathMatcher {
    /// Compile a rule, rejecting empty or malformed patterns.
    pub fn new(rule: AliasRule) -> Result<Self, ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidPattern {
            pattern: rule.pattern.to_string(),
            message: message.to_string(),
        };

        let compiled = match &rule.pattern {
            AliasPattern::Prefix(p) => {
                if p.is_empty() {
                    return Err(invalid("pattern is empty"));
                }
                Compiled::Prefix(p.clone())
            }
            AliasPattern::Glob(p) => {
                let Some((prefix, suffix)) = p.split_once('*') else {
                    return Err(invalid("glob pattern has no '*'"));
                };
                if suffix.contains('*') {
                    return Err(invalid("glob pattern may contain only one '*'"));
                }
                Compiled::Glob {
                    prefix: prefix.to_string(),
                    suffix: suffix.to_string(),
                }
            }
            AliasPattern::Regex(src) => {
                if src.is_empty() {
                    return Err(invalid("pattern is empty"));
                }
                Compiled::Regex {
                    re: Regex::new(src).map_err(|e| invalid(&e.to_string()))?,
                    prefix: anchored_literal(src),
                }
            }
        };

        Ok(Self { rule, compiled })
    }

    #[must_use]
    pub fn rule(&self) -> &AliasRule {
        &self.rule
    }

    #[must_use]
    pub fn pattern(&self) -> &AliasPattern {
        &self.rule.pattern
    }

    /// Evaluate this rule against `specifier`.
    #[must_use]
    pub fn matches(&self, specifier: &str) -> MatchResult {
        self.rewrite(specifier)
            .map_or_else(MatchResult::miss, MatchResult::hit)
    }

    /// Rewrite `specifier` if this rule applies.
    #[must_use]
    pub fn rewrite(&self, specifier: &str) -> Option<String> {
        let replacement = self.rule.replacement.as_str();
        match &self.compiled {
            Compiled::Prefix(p) => {
                if specifier == p {
                    return Some(replacement.to_string());
                }
                let rest = if p.ends_with('/') {
                    specifier.strip_prefix(p.as_str())?
                } else {
                    specifier.strip_prefix(p.as_str())?.strip_prefix('/')?
                };
                Some(join_rest(replacement, rest))
            }
            Compiled::Glob { prefix, suffix } => {
                if specifier.len() < prefix.len() + suffix.len() {
                    return None;
                }
                let captured = specifier
                    .strip_prefix(prefix.as_str())?
                    .strip_suffix(suffix.as_str())?;
                if replacement.contains('*') {
                    Some(replacement.replacen('*', captured, 1))
                } else if captured.is_empty() {
                    Some(replacement.to_string())
                } else {
                    Some(join_rest(replacement, captured))
                }
            }
            Compiled::Regex { re, .. } => {
                if re.is_match(specifier) {
                    Some(re.replace(specifier, replacement).into_owned())
                } else {
                    None
                }
            }
        }
    }

    /// The literal text every match must start with.
    ///
    /// `None` for regex patterns whose prefix cannot be read off the source,
    /// which may match anything.
    #[must_use]
    pub fn literal_prefix(&self) -> Option<&str> {
        match &self.compiled {
            Compiled::Prefix(p) => Some(p),
            Compiled::Glob { prefix, .. } => Some(prefix),
            Compiled::Regex { prefix, .. } => prefix.as_deref(),
        }
    }

    /// The literal text every output of this rule starts with.
    ///
    /// `None` when the rule may keep unmatched text in front of its
    /// replacement (an unanchored regex).
    #[must_use]
    pub fn replacement_head(&self) -> Option<&str> {
        let replacement = self.rule.replacement.as_str();
        let cut = match &self.compiled {
            Compiled::Prefix(_) => None,
            Compiled::Glob { .. } => replacement.find('*'),
            Compiled::Regex { prefix: None, .. } => return None,
            Compiled::Regex { .. } => replacement.find('$'),
        };
        Some(cut.map_or(replacement, |i| &replacement[..i]))
    }

    /// Whether arbitrary text may directly follow the replacement head,
    /// rather than only a `/`-separated remainder.
    fn output_is_open(&self) -> bool {
        match &self.compiled {
            Compiled::Prefix(_) => false,
            Compiled::Glob { .. } => self.rule.replacement.contains('*'),
            Compiled::Regex { .. } => true,
        }
    }

    /// Whether some output of `upstream` could be matched by this rule.
    ///
    /// Errs towards `true`: an unknown head or prefix counts as reachable.
    #[must_use]
    pub fn accepts_output_of(&self, upstream: &PathMatcher) -> bool {
        let head = match upstream.replacement_head() {
            Some(head) if !head.is_empty() => head,
            _ => return true,
        };
        let sample = join_rest(head, "__pathmux_sample__");
        if self.rewrite(head).is_some() || self.rewrite(&sample).is_some() {
            return true;
        }
        let Some(lit) = self.literal_prefix() else {
            return true;
        };
        if lit.is_empty() {
            return true;
        }
        if upstream.output_is_open() && lit.starts_with(head) {
            return true;
        }
        let stem = format!("{}/", head.trim_end_matches('/'));
        if lit.starts_with(&stem) {
            return true;
        }
        // Globs and regexes may still match past a shared prefix.
        !matches!(self.compiled, Compiled::Prefix(_)) && head.starts_with(lit)
    }
}

/// Literal prefix of a `^`-anchored regex source, up to the first
/// metacharacter. `None` when the source is unanchored or has alternatives.
fn anchored_literal(src: &str) -> Option<String> {
    if src.contains('|') {
        return None;
    }
    let mut chars = src.strip_prefix('^')?.chars().peekable();
    let mut lit = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(e) if e.is_ascii_punctuation() => lit.push(e),
                _ => break,
            },
            '?' | '*' | '{' => {
                // The previous character is optional.
                lit.pop();
                break;
            }
            '.' | '+' | '(' | ')' | '[' | ']' | '|' | '$' | '^' => break,
            _ => lit.push(c),
        }
        if matches!(chars.peek(), Some('?' | '*' | '{')) && !lit.is_empty() {
            lit.pop();
            break;
        }
    }
    Some(lit)
}

/// Join a matched remainder onto a replacement with exactly one `/`.
fn join_rest(replacement: &str, rest: &str) -> String {
    if rest.is_empty() {
        return replacement.to_string();
    }
    format!("{}/{}", replacement.trim_end_matches('/'), rest.trim_start_matches('/'))
}
