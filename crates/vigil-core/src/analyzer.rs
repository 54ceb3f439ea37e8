//! Output analysis
//!
//! Turns a raw exit code plus output into the diagnostic a refinement loop
//! can act on. Deterministic: same raw result and request, same lists.

use chrono::Utc;
use vigil_sandbox::RawResult;

use crate::diagnostic::{ExecutionDiagnostic, ExecutionRequest, FailureCategory};
use crate::language::Language;

/// SIGKILL; inside a memory-capped container almost always the OOM killer
const KILLED_EXIT_CODE: i32 = 137;

/// Successful runs of sources longer than this are expected to print something
const SILENT_SOURCE_THRESHOLD: usize = 100;

/// Category and suggestion lists for a failed run, from stderr keywords
pub fn classify(stderr: &str, language: Language) -> (Vec<String>, Vec<String>) {
    let lowered = stderr.to_lowercase();
    let mut categories = Vec::new();
    let mut suggestions = Vec::new();

    for pattern in language.profile().error_patterns {
        if pattern.keywords.iter().any(|k| lowered.contains(k)) {
            categories.push(pattern.category.to_string());
            suggestions.push(pattern.suggestion.to_string());
        }
    }

    (categories, suggestions)
}

pub struct OutputAnalyzer;

impl OutputAnalyzer {
    pub fn analyze(
        raw: &RawResult,
        request: &ExecutionRequest,
        execution_id: &str,
        duration_ms: u64,
    ) -> ExecutionDiagnostic {
        let success = raw.exit_code == 0;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();

        if !success {
            errors.push(format!("Execution failed with exit code {}", raw.exit_code));

            if raw.exit_code == KILLED_EXIT_CODE {
                errors.push("Process was killed (likely exceeded the memory limit)".to_string());
                suggestions.push("Reduce memory usage or raise the sandbox memory limit".to_string());
            }

            if !raw.stderr.is_empty() {
                let (categories, hints) = classify(&raw.stderr, request.language);
                errors.extend(categories);
                suggestions.extend(hints);
            }
        }

        let matches_expected = request.expected_output.as_ref().map(|expected| {
            // Containment on purpose: tolerates surrounding output and whitespace
            let matched = raw.stdout == *expected || raw.stdout.contains(expected.as_str());
            if !matched {
                warnings.push(format!(
                    "Output does not match expected (expected: {expected:?}, got: {:?})",
                    raw.stdout
                ));
            }
            matched
        });

        if success && !raw.stderr.is_empty() {
            warnings.push(format!("Warnings during execution: {}", raw.stderr));
        }

        if success && raw.stdout.is_empty() && request.code.len() > SILENT_SOURCE_THRESHOLD {
            warnings.push("Code executed but produced no output".to_string());
            suggestions.push("Check that the code prints the expected result".to_string());
        }

        ExecutionDiagnostic {
            success,
            exit_code: raw.exit_code,
            stdout: raw.stdout.clone(),
            stderr: raw.stderr.clone(),
            errors,
            warnings,
            suggestions,
            matches_expected,
            execution_id: execution_id.to_string(),
            duration_ms,
            timestamp: Utc::now(),
            language: request.language.to_string(),
            category: if success {
                None
            } else {
                Some(FailureCategory::Runtime)
            },
            violations: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(exit_code: i32, stdout: &str, stderr: &str) -> RawResult {
        RawResult {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    fn analyze(raw: &RawResult, request: &ExecutionRequest) -> ExecutionDiagnostic {
        OutputAnalyzer::analyze(raw, request, "exec-test", 12)
    }

    #[test]
    fn test_success() {
        let req = ExecutionRequest::new("print('hi')", Language::Python);
        let diag = analyze(&raw(0, "hi", ""), &req);
        assert!(diag.success);
        assert!(diag.errors.is_empty());
        assert!(diag.warnings.is_empty());
        assert_eq!(diag.matches_expected, None);
        assert_eq!(diag.category, None);
        assert_eq!(diag.execution_id, "exec-test");
        assert_eq!(diag.duration_ms, 12);
        assert_eq!(diag.language, "python");
    }

    #[test]
    fn test_python_name_error() {
        let req = ExecutionRequest::new("print(undefined_name)", Language::Python);
        let stderr = "Traceback (most recent call last):\n  File \"/sandbox/x.py\", line 1\nNameError: name 'undefined_name' is not defined";
        let diag = analyze(&raw(1, "", stderr), &req);

        assert!(!diag.success);
        assert_eq!(diag.category, Some(FailureCategory::Runtime));
        assert_eq!(diag.errors[0], "Execution failed with exit code 1");
        assert!(diag.errors.contains(&"Undefined variable or function".to_string()));
        assert!(diag
            .suggestions
            .iter()
            .any(|s| s.contains("defined before use")));
    }

    #[test]
    fn test_python_indentation() {
        let req = ExecutionRequest::new("if True:\nprint(1)", Language::Python);
        let diag = analyze(&raw(1, "", "IndentationError: expected an indented block"), &req);
        assert!(diag.errors.contains(&"Indentation error".to_string()));
        assert!(diag
            .suggestions
            .contains(&"Check indentation consistency (4 spaces)".to_string()));
    }

    #[test]
    fn test_javascript_unbalanced_braces() {
        let req = ExecutionRequest::new("function f() {", Language::JavaScript);
        let diag = analyze(&raw(1, "", "SyntaxError: Unexpected end of input"), &req);
        assert!(diag.errors.iter().any(|e| e.contains("syntax error")));
        assert!(diag.suggestions[0].contains("braces"));
    }

    #[test]
    fn test_language_specific_classification() {
        // ReferenceError means nothing to the Python table
        let (categories, _) = classify("ReferenceError: x is not defined", Language::Python);
        assert!(categories.is_empty());

        let (categories, _) = classify("ReferenceError: x is not defined", Language::TypeScript);
        assert_eq!(categories, vec!["Undefined reference".to_string()]);

        let (categories, _) = classify("TSError: ⨯ Unable to compile TypeScript", Language::TypeScript);
        assert_eq!(categories, vec!["TypeScript compile error".to_string()]);
    }

    #[test]
    fn test_extra_python_categories() {
        let (categories, _) = classify("ModuleNotFoundError: No module named 'numpy'", Language::Python);
        assert_eq!(categories, vec!["Module not available".to_string()]);

        let (categories, _) = classify("ZeroDivisionError: division by zero", Language::Python);
        assert_eq!(categories, vec!["Division by zero".to_string()]);
    }

    #[test]
    fn test_killed_process() {
        let req = ExecutionRequest::new("x = 'a' * 10**10", Language::Python);
        let diag = analyze(&raw(137, "", ""), &req);
        assert!(diag.errors[1].contains("memory limit"));
    }

    #[test]
    fn test_expected_output_match() {
        let req = ExecutionRequest::new("print('True')", Language::Python).with_expected_output("True");
        assert_eq!(analyze(&raw(0, "True", ""), &req).matches_expected, Some(true));

        // containment counts
        assert_eq!(analyze(&raw(0, "result: True", ""), &req).matches_expected, Some(true));
    }

    #[test]
    fn test_expected_output_mismatch() {
        let req = ExecutionRequest::new("print('False')", Language::Python).with_expected_output("True");
        let diag = analyze(&raw(0, "False", ""), &req);
        assert_eq!(diag.matches_expected, Some(false));
        assert!(diag.success);
        assert_eq!(diag.warnings.len(), 1);
        assert!(diag.warnings[0].contains("\"True\""));
        assert!(diag.warnings[0].contains("\"False\""));
    }

    #[test]
    fn test_silent_long_program() {
        let code = format!("x = 1\n{}", "y = x + 1\n".repeat(20));
        let req = ExecutionRequest::new(code, Language::Python);
        let diag = analyze(&raw(0, "", ""), &req);
        assert!(diag.success);
        assert_eq!(diag.warnings, vec!["Code executed but produced no output".to_string()]);

        // short programs may legitimately print nothing
        let req = ExecutionRequest::new("x = 1", Language::Python);
        assert!(analyze(&raw(0, "", ""), &req).warnings.is_empty());
    }

    #[test]
    fn test_stderr_on_success_is_a_warning() {
        let req = ExecutionRequest::new("console.warn('careful')", Language::JavaScript);
        let diag = analyze(&raw(0, "", "careful"), &req);
        assert!(diag.success);
        assert!(diag.errors.is_empty());
        assert_eq!(diag.warnings, vec!["Warnings during execution: careful".to_string()]);
    }
}
