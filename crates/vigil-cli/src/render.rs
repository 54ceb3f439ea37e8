//! Human-readable output

use vigil_core::{ExecutionDiagnostic, SecurityVerdict};
use vigil_sandbox::{ContainerUsage, ReclaimReport};

pub fn diagnostic(d: &ExecutionDiagnostic) {
    if d.success {
        println!("✅ {} ran successfully ({}ms)", d.language, d.duration_ms);
    } else {
        let category = d
            .category
            .map(|c| format!("{c:?}"))
            .unwrap_or_else(|| "Failure".to_string());
        println!("❌ {} failed: {} (exit {}, {}ms)", d.language, category, d.exit_code, d.duration_ms);
    }
    println!("   id: {}", d.execution_id);

    if !d.stdout.is_empty() {
        println!();
        println!("── stdout ──");
        println!("{}", d.stdout);
    }
    if !d.stderr.is_empty() {
        println!();
        println!("── stderr ──");
        println!("{}", d.stderr);
    }

    if let Some(matched) = d.matches_expected {
        println!();
        println!("Expected output: {}", if matched { "matched" } else { "did not match" });
    }

    section("Errors", &d.errors);
    section("Warnings", &d.warnings);
    section("Suggestions", &d.suggestions);
}

pub fn verdict(v: &SecurityVerdict) {
    if v.allowed {
        println!("✅ No blocked patterns found");
        return;
    }

    println!("❌ {} blocked pattern(s):", v.violations.len());
    for violation in &v.violations {
        println!(
            "  [{:?}] {} ({})",
            violation.severity, violation.rule, violation.pattern
        );
    }
}

pub fn reclaim(report: &ReclaimReport) {
    if report.removed.is_empty() {
        println!("No orphaned sandboxes");
    } else {
        println!("Removed {} orphaned sandbox(es):", report.removed.len());
        for id in &report.removed {
            println!("  {id}");
        }
    }
    section("Errors", &report.errors);
}

pub fn usage(rows: &[ContainerUsage]) {
    if rows.is_empty() {
        println!("No running sandboxes");
        return;
    }

    println!(
        "{:<44} {:>7} {:>10} {:>10}  {}",
        "NAME", "CPU %", "MEM MiB", "LIMIT MiB", "STATE"
    );
    for row in rows {
        println!(
            "{:<44} {:>7.2} {:>10.1} {:>10.1}  {}",
            row.name,
            row.cpu_percent,
            mib(row.memory_usage),
            mib(row.memory_limit),
            row.state
        );
    }
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn section(title: &str, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    println!();
    println!("{title}:");
    for line in lines {
        println!("  - {line}");
    }
}
