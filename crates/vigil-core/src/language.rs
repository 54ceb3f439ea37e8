//! Language registry
//!
//! Everything language-specific lives in one static table: how to run a
//! file, what extension it needs, which stderr keywords mean what, and
//! which source patterns are refused. Adding a language means adding a
//! profile, not touching the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::diagnostic::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

/// Keywords (lowercase) that classify a failure from stderr
#[derive(Debug)]
pub struct ErrorPattern {
    pub keywords: &'static [&'static str],
    pub category: &'static str,
    pub suggestion: &'static str,
}

#[derive(Debug)]
pub struct SecurityRule {
    pub name: &'static str,
    pub pattern: &'static str,
    pub severity: Severity,
}

#[derive(Debug)]
pub struct LanguageProfile {
    pub language: Language,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub interpreter: &'static [&'static str],
    pub extension: &'static str,
    pub default_image: &'static str,
    pub error_patterns: &'static [ErrorPattern],
    pub security_rules: &'static [SecurityRule],
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Python, Language::JavaScript, Language::TypeScript];

    pub fn profile(&self) -> &'static LanguageProfile {
        match self {
            Language::Python => &PYTHON,
            Language::JavaScript => &JAVASCRIPT,
            Language::TypeScript => &TYPESCRIPT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.profile().name
    }

    pub fn from_extension(ext: &str) -> Option<Language> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "py" => Some(Language::Python),
            "js" | "mjs" | "cjs" => Some(Language::JavaScript),
            "ts" => Some(Language::TypeScript),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Language::ALL
            .into_iter()
            .find(|lang| {
                let profile = lang.profile();
                profile.name == wanted || profile.aliases.contains(&wanted.as_str())
            })
            .ok_or_else(|| UnsupportedLanguage(s.trim().to_string()))
    }
}

// ============================================================================
// Error patterns
// ============================================================================

const PY_ERRORS: &[ErrorPattern] = &[
    ErrorPattern {
        keywords: &["syntaxerror", "syntax error"],
        category: "Python syntax error",
        suggestion: "Check Python syntax and indentation",
    },
    ErrorPattern {
        keywords: &["nameerror", "name error"],
        category: "Undefined variable or function",
        suggestion: "Check that every variable and function is defined before use",
    },
    ErrorPattern {
        keywords: &["typeerror", "type error"],
        category: "Type error",
        suggestion: "Check data types and conversions",
    },
    ErrorPattern {
        keywords: &["indentationerror", "indentation error"],
        category: "Indentation error",
        suggestion: "Check indentation consistency (4 spaces)",
    },
    ErrorPattern {
        keywords: &["modulenotfounderror", "importerror"],
        category: "Module not available",
        suggestion: "Only the standard library is available; there is no network to install packages",
    },
    ErrorPattern {
        keywords: &["zerodivisionerror"],
        category: "Division by zero",
        suggestion: "Guard divisions against a zero denominator",
    },
    ErrorPattern {
        keywords: &["recursionerror"],
        category: "Maximum recursion depth exceeded",
        suggestion: "Add a base case or rewrite the recursion as a loop",
    },
];

const JS_SYNTAX: ErrorPattern = ErrorPattern {
    keywords: &["syntaxerror", "syntax error"],
    category: "JavaScript syntax error",
    suggestion: "Check that braces, parentheses and brackets are balanced",
};

const JS_REFERENCE: ErrorPattern = ErrorPattern {
    keywords: &["referenceerror", "reference error"],
    category: "Undefined reference",
    suggestion: "Check that variables and functions are declared before use",
};

const JS_TYPE: ErrorPattern = ErrorPattern {
    keywords: &["typeerror", "type error"],
    category: "Type error",
    suggestion: "Check data types and object properties",
};

const JS_ERRORS: &[ErrorPattern] = &[JS_SYNTAX, JS_REFERENCE, JS_TYPE];

const TS_ERRORS: &[ErrorPattern] = &[
    ErrorPattern {
        keywords: &["tserror", "unable to compile typescript"],
        category: "TypeScript compile error",
        suggestion: "Fix the reported type errors; the program never ran",
    },
    JS_SYNTAX,
    JS_REFERENCE,
    JS_TYPE,
];

// ============================================================================
// Security rules
// ============================================================================

const JS_RULES: &[SecurityRule] = &[
    SecurityRule {
        name: "fs_require",
        pattern: r#"require\s*\(\s*['"]fs['"]"#,
        severity: Severity::High,
    },
    SecurityRule {
        name: "child_process_require",
        pattern: r#"require\s*\(\s*['"]child_process['"]"#,
        severity: Severity::Critical,
    },
    SecurityRule {
        name: "os_require",
        pattern: r#"require\s*\(\s*['"]os['"]"#,
        severity: Severity::Medium,
    },
    SecurityRule {
        name: "eval",
        pattern: r"\beval\s*\(",
        severity: Severity::Critical,
    },
    SecurityRule {
        name: "function_constructor",
        pattern: r"\bFunction\s*\(",
        severity: Severity::Critical,
    },
    SecurityRule {
        name: "process_control",
        pattern: r"process\.(exit|kill)",
        severity: Severity::High,
    },
    SecurityRule {
        name: "exec",
        pattern: r"\bexec\s*\(",
        severity: Severity::Critical,
    },
    SecurityRule {
        name: "spawn",
        pattern: r"\bspawn\s*\(",
        severity: Severity::Critical,
    },
    SecurityRule {
        name: "dirname",
        pattern: r"__dirname",
        severity: Severity::Medium,
    },
    SecurityRule {
        name: "filename",
        pattern: r"__filename",
        severity: Severity::Medium,
    },
    SecurityRule {
        name: "es_import",
        pattern: r#"import\s+.*\s+from\s+['"](fs|child_process)['"]"#,
        severity: Severity::High,
    },
];

const PY_RULES: &[SecurityRule] = &[
    SecurityRule {
        name: "system_module_import",
        pattern: r"\bimport\s+(os|subprocess|sys)\b",
        severity: Severity::High,
    },
    SecurityRule {
        name: "system_module_from_import",
        pattern: r"\bfrom\s+(os|subprocess|sys)\s+import\b",
        severity: Severity::High,
    },
    SecurityRule {
        name: "eval",
        pattern: r"\beval\s*\(",
        severity: Severity::Critical,
    },
    SecurityRule {
        name: "exec",
        pattern: r"\bexec\s*\(",
        severity: Severity::Critical,
    },
    SecurityRule {
        name: "compile",
        pattern: r"\bcompile\s*\(",
        severity: Severity::High,
    },
    SecurityRule {
        name: "dynamic_import",
        pattern: r"__import__\s*\(",
        severity: Severity::Critical,
    },
    SecurityRule {
        name: "open",
        pattern: r"\bopen\s*\(",
        severity: Severity::High,
    },
    SecurityRule {
        name: "file",
        pattern: r"\bfile\s*\(",
        severity: Severity::High,
    },
    SecurityRule {
        name: "os_process",
        pattern: r"os\.(system|popen|exec\w*)",
        severity: Severity::Critical,
    },
    SecurityRule {
        name: "subprocess_call",
        pattern: r"subprocess\.(call|Popen|run)",
        severity: Severity::Critical,
    },
];

/// Applied on top of every language's own rules
pub const SECRET_RULES: &[SecurityRule] = &[
    SecurityRule {
        name: "hardcoded_credential",
        pattern: r#"(?i)(api[_-]?key|secret|password|token)\s*[:=]\s*['"][^'"]{8,}['"]"#,
        severity: Severity::High,
    },
    SecurityRule {
        name: "aws_access_key",
        pattern: r"AKIA[0-9A-Z]{16}",
        severity: Severity::Critical,
    },
    SecurityRule {
        name: "private_key",
        pattern: r"-----BEGIN (RSA |EC |OPENSSH |DSA )?PRIVATE KEY-----",
        severity: Severity::Critical,
    },
];

// ============================================================================
// Profiles
// ============================================================================

static PYTHON: LanguageProfile = LanguageProfile {
    language: Language::Python,
    name: "python",
    aliases: &["py", "python3"],
    interpreter: &["python3"],
    extension: "py",
    default_image: "python:3.12-alpine",
    error_patterns: PY_ERRORS,
    security_rules: PY_RULES,
};

static JAVASCRIPT: LanguageProfile = LanguageProfile {
    language: Language::JavaScript,
    name: "javascript",
    aliases: &["js", "node"],
    interpreter: &["node"],
    extension: "js",
    default_image: "node:20-alpine",
    error_patterns: JS_ERRORS,
    security_rules: JS_RULES,
};

static TYPESCRIPT: LanguageProfile = LanguageProfile {
    language: Language::TypeScript,
    name: "typescript",
    aliases: &["ts"],
    interpreter: &["ts-node"],
    extension: "ts",
    default_image: "node:20-alpine",
    error_patterns: TS_ERRORS,
    security_rules: JS_RULES,
};
