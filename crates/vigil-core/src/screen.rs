//! Static security screen - denylist model
//!
//! A denylist over source text is trivially bypassable: string
//! concatenation, `getattr`, unicode escapes, pick one. This screen is a
//! cheap early reject for the obvious cases so they never cost a
//! container. It is NOT the security boundary. The container is.
//!
//! Rules per language come from the language registry; secret patterns
//! apply to every language.

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::diagnostic::{Severity, Violation};
use crate::language::{Language, SecurityRule, SECRET_RULES};

/// Sources above this size are refused outright
pub const DEFAULT_MAX_CODE_BYTES: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityVerdict {
    pub allowed: bool,
    pub violations: Vec<Violation>,
}

impl SecurityVerdict {
    fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            allowed: violations.is_empty(),
            violations,
        }
    }

    /// Highest severity among the violations
    pub fn worst(&self) -> Option<Severity> {
        self.violations.iter().map(|v| v.severity).max()
    }
}

struct CompiledRule {
    name: &'static str,
    source: &'static str,
    regex: Regex,
    severity: Severity,
}

impl CompiledRule {
    fn compile(rule: &SecurityRule) -> Result<Self, regex::Error> {
        Ok(Self {
            name: rule.name,
            source: rule.pattern,
            regex: Regex::new(rule.pattern)?,
            severity: rule.severity,
        })
    }

    fn violation(&self) -> Violation {
        Violation {
            rule: self.name.to_string(),
            pattern: self.source.to_string(),
            severity: self.severity,
        }
    }
}

pub struct SecurityScreen {
    rules: HashMap<Language, Vec<CompiledRule>>,
    max_code_bytes: usize,
}

impl SecurityScreen {
    /// Compile every rule up front so screening itself can't fail
    pub fn new(max_code_bytes: usize) -> Result<Self, regex::Error> {
        let mut rules = HashMap::new();
        for lang in Language::ALL {
            let compiled = lang
                .profile()
                .security_rules
                .iter()
                .chain(SECRET_RULES.iter())
                .map(CompiledRule::compile)
                .collect::<Result<Vec<_>, _>>()?;
            rules.insert(lang, compiled);
        }

        Ok(Self {
            rules,
            max_code_bytes,
        })
    }

    /// Pure and synchronous. Every matching rule is reported, in rule order.
    pub fn screen(&self, code: &str, language: Language) -> SecurityVerdict {
        if code.trim().is_empty() {
            return SecurityVerdict::from_violations(vec![Violation {
                rule: "empty_source".to_string(),
                pattern: String::new(),
                severity: Severity::Medium,
            }]);
        }

        // Don't run regexes over a payload we're refusing anyway
        if code.len() > self.max_code_bytes {
            return SecurityVerdict::from_violations(vec![Violation {
                rule: "max_size".to_string(),
                pattern: format!("> {} bytes", self.max_code_bytes),
                severity: Severity::High,
            }]);
        }

        let violations: Vec<Violation> = self
            .rules
            .get(&language)
            .map(|rules| {
                rules
                    .iter()
                    .filter(|rule| rule.regex.is_match(code))
                    .map(CompiledRule::violation)
                    .collect()
            })
            .unwrap_or_default();

        if !violations.is_empty() {
            debug!(
                language = %language,
                count = violations.len(),
                "Security screen rejected source"
            );
        }

        SecurityVerdict::from_violations(violations)
    }
}
