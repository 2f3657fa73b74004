//! Import alias rewriting.
//!
//! Rules are tried in declaration order and the first rule that matches
//! wins; later rules are never consulted for that step, even when they would
//! produce a longer match. The rewritten specifier is offered to the rule set
//! again so that aliases may chain (`~` → `@/lib` → `/project/src/lib`), but a
//! rule fires at most once per request.

mod matcher;

pub use matcher::{AliasPattern, AliasRule, MatchResult, PathMatcher};

use crate::error::ConfigError;
use std::collections::HashSet;
use tracing::trace;

/// Ordered set of alias rules.
#[derive(Debug, Clone, Default)]
pub struct AliasResolver {
    matchers: Vec<PathMatcher>,
}

impl AliasResolver {
    /// Compile `rules` in order.
    ///
    /// This only checks that each pattern is well formed; see
    /// [`AliasResolver::validate`] for the set-level checks run at config load.
    pub fn new(rules: &[AliasRule]) -> Result<Self, ConfigError> {
        let matchers = rules
            .iter()
            .cloned()
            .map(PathMatcher::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { matchers })
    }

    /// Reject ambiguous or self-feeding rule sets.
    ///
    /// - two rules with an identical pattern → [`ConfigError::DuplicateAlias`]
    /// - a chain of rules whose replacements feed back into an earlier rule →
    ///   [`ConfigError::AliasCycle`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for m in &self.matchers {
            if !seen.insert(m.pattern()) {
                return Err(ConfigError::DuplicateAlias {
                    pattern: m.pattern().to_string(),
                });
            }
        }

        if let Some(cycle) = self.find_cycle() {
            return Err(ConfigError::AliasCycle {
                cycle: cycle
                    .into_iter()
                    .map(|i| self.matchers[i].pattern().to_string())
                    .collect(),
            });
        }

        Ok(())
    }

    /// Rewrite `specifier` through the rule set.
    ///
    /// A specifier no rule matches is returned unchanged.
    #[must_use]
    pub fn resolve(&self, specifier: &str) -> String {
        let mut current = specifier.to_string();
        let mut fired = vec![false; self.matchers.len()];

        'rewrite: loop {
            for (i, matcher) in self.matchers.iter().enumerate() {
                if fired[i] {
                    continue;
                }
                if let Some(next) = matcher.rewrite(&current) {
                    trace!(
                        from = %current,
                        to = %next,
                        pattern = %matcher.pattern(),
                        "alias rewrite"
                    );
                    fired[i] = true;
                    current = next;
                    continue 'rewrite;
                }
            }
            break;
        }

        current
    }

    /// The compiled rules, in declaration order.
    #[must_use]
    pub fn matchers(&self) -> &[PathMatcher] {
        &self.matchers
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// Find a cycle in the "output of A can be matched by B" graph.
    ///
    /// Returns the rule indices along the cycle, first index repeated last.
    fn find_cycle(&self) -> Option<Vec<usize>> {
        let n = self.matchers.len();
        let edges: Vec<Vec<usize>> = (0..n)
            .map(|a| {
                (0..n)
                    .filter(|&b| self.matchers[b].accepts_output_of(&self.matchers[a]))
                    .collect()
            })
            .collect();

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(
            node: usize,
            edges: &[Vec<usize>],
            marks: &mut [Mark],
            stack: &mut Vec<usize>,
        ) -> Option<Vec<usize>> {
            marks[node] = Mark::Active;
            stack.push(node);
            for &next in &edges[node] {
                match marks[next] {
                    Mark::Active => {
                        let start = stack.iter().position(|&i| i == next).unwrap_or(0);
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Mark::New => {
                        if let Some(cycle) = visit(next, edges, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            stack.pop();
            marks[node] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::New; n];
        let mut stack = Vec::new();
        for node in 0..n {
            if marks[node] == Mark::New {
                if let Some(cycle) = visit(node, &edges, &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }
}
