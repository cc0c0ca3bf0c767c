//! CLI output formatting.
//!
//! Output is **template-centric**: each configured template is listed by its
//! position and label, with the destination and outcome as indented context
//! lines. Logs (via `tracing`) go to stderr; this module is the stdout
//! summary a human or a cron mail reads.
//!
//! # Output Format
//!
//! ## Run
//!
//! ```text
//! 001 haproxy → /etc/haproxy/haproxy.cfg
//!     Status: changed
//!     Hooks: 2 ran
//! 002 nginx → /etc/nginx/upstreams.conf
//!     Status: unchanged
//! 003 dns
//!     Error: all 2 url(s) failed
//!
//! Synced 3 templates: 1 changed, 1 unchanged, 1 failed
//! ```
//!
//! ## Check
//!
//! ```text
//! 001 haproxy
//!     Source: /etc/confetch/haproxy.cfg.j2
//!     Dest: /etc/haproxy/haproxy.cfg
//!     URLs: 2
//!     Template: ok
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout.

use crate::config::TemplateConfig;
use crate::render::RenderError;
use crate::sync::TemplateOutcome;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

// ============================================================================
// Run
// ============================================================================

pub fn format_run_output(outcomes: &[TemplateOutcome]) -> Vec<String> {
    let mut lines = Vec::new();
    let (mut changed, mut unchanged, mut failed) = (0, 0, 0);

    for (i, outcome) in outcomes.iter().enumerate() {
        let index = format_index(i + 1);
        match &outcome.result {
            Ok(report) => {
                lines.push(format!(
                    "{} {} → {}",
                    index,
                    outcome.label,
                    report.dest.display()
                ));
                if report.changed {
                    changed += 1;
                    lines.push(format!("{}Status: changed", indent(1)));
                } else {
                    unchanged += 1;
                    lines.push(format!("{}Status: unchanged", indent(1)));
                }
                if report.hooks > 0 {
                    lines.push(format!("{}Hooks: {} ran", indent(1), report.hooks));
                }
            }
            Err(err) => {
                failed += 1;
                lines.push(format!("{} {}", index, outcome.label));
                lines.push(format!("{}Error: {}", indent(1), err));
            }
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "Synced {}: {} changed, {} unchanged, {} failed",
        plural(outcomes.len(), "template"),
        changed,
        unchanged,
        failed
    ));
    lines
}

pub fn print_run_output(outcomes: &[TemplateOutcome]) {
    for line in format_run_output(outcomes) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

pub fn format_check_output(checks: &[(&TemplateConfig, Result<(), RenderError>)]) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, (template, result)) in checks.iter().enumerate() {
        lines.push(format!("{} {}", format_index(i + 1), template.label()));
        lines.push(format!("{}Source: {}", indent(1), template.src.display()));
        lines.push(format!("{}Dest: {}", indent(1), template.dest.display()));
        lines.push(format!("{}URLs: {}", indent(1), template.urls.len()));
        match result {
            Ok(()) => lines.push(format!("{}Template: ok", indent(1))),
            Err(err) => lines.push(format!("{}Template: {}", indent(1), err)),
        }
    }
    lines
}

pub fn print_check_output(checks: &[(&TemplateConfig, Result<(), RenderError>)]) {
    for line in format_check_output(checks) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
