//! Regex-based SQL rewriting
//!
//! An ordered list of find-and-replace-all rules applied left to right; each
//! rule's output feeds the next rule's input. Runs once per Parse (extended)
//! or once per Query (simple), before the command token is extracted.

use regex::Regex;

use pgbridge_common::config::{ProxyOptions, RewriteRule};
use pgbridge_common::{BridgeError, Result};

use super::psql;

struct CompiledRule {
    pattern: Regex,
    replacement: String,
}

/// Ordered rewrite pipeline shared by all sessions.
pub struct QueryRewriter {
    rules: Vec<CompiledRule>,
}

impl QueryRewriter {
    /// Compile a rule list. Rules are applied in the given order; capture
    /// groups may be referenced in the replacement as `$1` or `${name}`.
    pub fn new(rules: &[RewriteRule]) -> Result<Self> {
        let compiled = rules
            .iter()
            .map(|rule| {
                let pattern = Regex::new(&rule.input_pattern).map_err(|e| {
                    BridgeError::Config(format!(
                        "bad rewrite pattern '{}': {e}",
                        rule.input_pattern
                    ))
                })?;
                Ok(CompiledRule {
                    pattern,
                    replacement: rule.output_pattern.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules: compiled })
    }

    /// Build the pipeline for the given options: psql meta-command rules
    /// first (when psql mode is on), then the user-defined rules.
    pub fn from_options(options: &ProxyOptions) -> Result<Self> {
        let mut rules = Vec::new();
        if options.psql_mode {
            rules.extend(psql::meta_command_rules());
        }
        rules.extend(options.rewrites.iter().cloned());
        Self::new(&rules)
    }

    /// Apply every rule in order. Pure; SQL that matches nothing passes
    /// through byte-for-byte.
    pub fn rewrite(&self, sql: &str) -> String {
        let mut out = sql.to_string();
        for rule in &self.rules {
            out = rule.pattern.replace_all(&out, rule.replacement.as_str()).into_owned();
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(input: &str, output: &str) -> RewriteRule {
        RewriteRule {
            input_pattern: input.to_string(),
            output_pattern: output.to_string(),
        }
    }

    #[test]
    fn test_no_match_passes_through() {
        let rewriter = QueryRewriter::new(&[rule("FOO", "BAR")]).unwrap();
        assert_eq!(rewriter.rewrite("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_rules_chain_in_order() {
        let rewriter = QueryRewriter::new(&[rule("a", "b"), rule("b", "c")]).unwrap();
        // The first rule's output feeds the second rule's input.
        assert_eq!(rewriter.rewrite("a"), "c");
    }

    #[test]
    fn test_capture_group_substitution() {
        let rewriter = QueryRewriter::new(&[rule(
            r"(?i)^SHOW\s+(?P<var>\w+)$",
            "SELECT '${var}' AS name",
        )])
        .unwrap();
        assert_eq!(rewriter.rewrite("SHOW server_version"), "SELECT 'server_version' AS name");
    }

    #[test]
    fn test_replace_all_occurrences() {
        let rewriter = QueryRewriter::new(&[rule("NOW\\(\\)", "CURRENT_TIMESTAMP")]).unwrap();
        assert_eq!(
            rewriter.rewrite("SELECT NOW(), NOW()"),
            "SELECT CURRENT_TIMESTAMP, CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_bad_pattern_fails_compile() {
        assert!(QueryRewriter::new(&[rule("([", "x")]).is_err());
    }
}
