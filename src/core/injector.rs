//! Breakpoint injection.
//!
//! Breakpoints are realised by prefixing a line with the evaluator's pause
//! marker. The line count never changes, so locations reported by the
//! evaluator map straight back onto the editor buffer.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::evaluator::Evaluator;

/// A breakpoint that could not be placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakpointHint {
    pub line: usize,
    pub message: String,
}

/// Result of rewriting one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub text: String,
    pub hint: Option<BreakpointHint>,
}

impl Injection {
    fn unchanged(source: &str) -> Self {
        Self {
            text: source.to_string(),
            hint: None,
        }
    }
}

/// Insert pause markers at `breakpoints` (1-based lines).
///
/// A source that does not parse is returned unchanged. Lines are handled in
/// ascending order; the first insertion that breaks parsing stops the pass and
/// is reported as a hint, keeping the markers placed before it.
pub fn inject(source: &str, breakpoints: &BTreeSet<usize>, evaluator: &dyn Evaluator) -> Injection {
    if breakpoints.is_empty() || !evaluator.parse(source).is_empty() {
        return Injection::unchanged(source);
    }

    let marker = format!("{} ", evaluator.pause_marker());
    let mut lines: Vec<String> = source.split_inclusive('\n').map(str::to_string).collect();

    for &line in breakpoints {
        if line == 0 || line > lines.len() {
            continue;
        }
        let index = line - 1;
        if lines[index].trim_start().starts_with(marker.trim_end()) {
            continue;
        }
        let original = std::mem::take(&mut lines[index]);
        lines[index] = format!("{}{}", marker, original);
        if !evaluator.parse(&lines.concat()).is_empty() {
            lines[index] = original;
            tracing::debug!(line, "breakpoint would break the program");
            return Injection {
                text: lines.concat(),
                hint: Some(BreakpointHint {
                    line,
                    message: format!(
                        "Breakpoint on line {} could not be placed; it and later breakpoints were skipped.",
                        line
                    ),
                }),
            };
        }
    }

    Injection {
        text: lines.concat(),
        hint: None,
    }
}
