//! Decides how a naturally exited build ends.

use std::collections::BTreeMap;

use crate::domain::models::ErrorType;
use crate::domain::ports::ProcessExit;
use crate::services::log_parser::{extract_errors, extract_timings, tail_chars};

/// Phrases the build script prints only after a complete run.
pub const SUCCESS_MARKERS: [&str; 4] = [
    "Server build and restart completed!",
    "BUILD COMPLETED SUCCESSFULLY",
    "BUILD_COMPLETED created",
    "Build completed successfully",
];

const MAX_REPORTED_ERRORS: usize = 10;
const ERROR_TAIL_CHARS: usize = 3000;

/// Case-insensitive phrase groups, checked in order. The first hit wins.
const ERROR_PATTERNS: [(&[&str], ErrorType); 5] = [
    (&["out of memory", "heap out of memory"], ErrorType::OutOfMemory),
    (&["econnrefused", "connection refused"], ErrorType::ConnectionError),
    (&["module not found", "cannot find module"], ErrorType::ModuleNotFound),
    (&["syntax error", "unexpected token"], ErrorType::SyntaxError),
    (&["type error", "typescript error"], ErrorType::TypeError),
];

/// Final verdict for an exited build.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitClassification {
    Success {
        timings: BTreeMap<String, f64>,
    },
    Failure {
        error_type: ErrorType,
        message: String,
        error: String,
    },
}

impl ExitClassification {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

pub fn has_success_marker(log: &str) -> bool {
    SUCCESS_MARKERS.iter().any(|marker| log.contains(marker))
}

/// Error category for a failed build's log.
pub fn classify_error_type(log: &str) -> ErrorType {
    let lowered = log.to_lowercase();
    ERROR_PATTERNS
        .iter()
        .find(|(phrases, _)| phrases.iter().any(|p| lowered.contains(p)))
        .map_or(ErrorType::BuildError, |(_, error_type)| *error_type)
}

/// Classify an exit. A zero exit code alone is not success.
pub fn classify_exit(exit: ProcessExit, log: &str) -> ExitClassification {
    if exit.success() && has_success_marker(log) {
        return ExitClassification::Success {
            timings: extract_timings(log),
        };
    }

    let errors = extract_errors(log);
    let error = if errors.is_empty() {
        let tail = tail_chars(log, ERROR_TAIL_CHARS);
        if tail.is_empty() {
            "Unknown error".to_string()
        } else {
            tail.to_string()
        }
    } else {
        errors
            .iter()
            .take(MAX_REPORTED_ERRORS)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    };

    let message = match errors.first() {
        Some(first) => format!("Build failed: {first}"),
        None => format!("Build failed with exit code {}", exit.code_or_signal()),
    };

    ExitClassification::Failure {
        error_type: classify_error_type(log),
        message,
        error,
    }
}
