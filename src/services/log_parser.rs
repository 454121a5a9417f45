//! Build log parsing.
//!
//! The build script tags its output with `[BUILD]`, `[STEP n]`, `[OK]`,
//! `[INFO]`, `[WARN]` and `[ERROR]`. Everything here works on whole log
//! text and is re-run against the full log on every poll; there is no
//! incremental parse state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("valid ANSI regex"));

static STEP_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[STEP (\d+)\][ \t]+(.+)").expect("valid step regex"));

static STEP_ANYWHERE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[STEP (\d+)\][ \t]+(.+)").expect("valid step regex"));

static TIMING_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*?(\w[\w\s]+):\s*([\d.]+)s").expect("valid timing regex"));

static TOTAL_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Total time:\s*([\d.]+)s").expect("valid total regex"));

/// Step reported before the script has emitted any `[STEP n]` line.
pub const INITIAL_STEP_NAME: &str = "Initializing";

const TIMING_HEADER: &str = "Timing breakdown:";

/// Severity tag of one log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Build,
    Step,
    Ok,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Step => "step",
            Self::Ok => "ok",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed line of build output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub step: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    fn new(level: LogLevel, message: &str) -> Self {
        Self {
            level,
            message: message.to_string(),
            step: None,
            timestamp: Utc::now(),
        }
    }
}

/// Remove terminal color sequences.
pub fn strip_ansi(line: &str) -> std::borrow::Cow<'_, str> {
    ANSI_ESCAPE.replace_all(line, "")
}

/// Parse a single line of build output.
///
/// Returns `None` for blank lines. Untagged lines, and `[STEP ...]` lines
/// without a numeric step, become `Info` entries carrying the whole line.
pub fn parse_log_line(line: &str) -> Option<LogEntry> {
    let cleaned = strip_ansi(line);
    let line = cleaned.trim();

    if line.is_empty() {
        return None;
    }

    if let Some(rest) = line.strip_prefix("[BUILD]") {
        return Some(LogEntry::new(LogLevel::Build, rest.trim()));
    }

    if line.starts_with("[STEP") {
        if let Some(caps) = STEP_LINE.captures(line) {
            if let Ok(step) = caps[1].parse::<u32>() {
                let mut entry = LogEntry::new(LogLevel::Step, &caps[2]);
                entry.step = Some(step);
                return Some(entry);
            }
        }
    }

    let tagged = [
        ("[OK]", LogLevel::Ok),
        ("[INFO]", LogLevel::Info),
        ("[WARN]", LogLevel::Warn),
        ("[ERROR]", LogLevel::Error),
    ];
    for (prefix, level) in tagged {
        if let Some(rest) = line.strip_prefix(prefix) {
            return Some(LogEntry::new(level, rest.trim()));
        }
    }

    Some(LogEntry::new(LogLevel::Info, line))
}

/// Last `[STEP n] name` anywhere in the log, or `(0, "Initializing")`.
///
/// The last occurrence wins even when an earlier step number reappears
/// after a restart marker.
pub fn current_step_from_log(content: &str) -> (u32, String) {
    STEP_ANYWHERE
        .captures_iter(content)
        .filter_map(|caps| {
            let step = caps[1].parse::<u32>().ok()?;
            Some((step, caps[2].trim_end().to_string()))
        })
        .last()
        .unwrap_or_else(|| (0, INITIAL_STEP_NAME.to_string()))
}

/// Last parseable line of the log.
///
/// A trailing line without a newline may still be partially written, so it
/// is skipped unless it is the only line.
pub fn last_entry(content: &str) -> Option<LogEntry> {
    let complete = match content.rfind('\n') {
        Some(idx) => &content[..idx],
        None => content,
    };
    complete.lines().rev().find_map(parse_log_line)
}

/// Error lines worth showing to the operator, in log order.
pub fn extract_errors(content: &str) -> Vec<String> {
    let mut errors = Vec::new();

    for line in content.lines() {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("[ERROR]") {
            errors.push(rest.trim().to_string());
        }

        if line.contains("Build error") || line.contains("Failed to compile") {
            errors.push(line.to_string());
        }

        if line.contains("FATAL ERROR") || line.to_lowercase().contains("heap out of memory") {
            errors.push(line.to_string());
        }
    }

    errors
}

/// Phase durations from the `Timing breakdown:` section, plus `total`.
///
/// Section lines look like `[INFO]   Kill zombies: 3.21s`. The section ends
/// at the first non-blank line that is neither a timing nor `[INFO]`-tagged.
pub fn extract_timings(content: &str) -> BTreeMap<String, f64> {
    let mut timings = BTreeMap::new();

    if content.contains(TIMING_HEADER) {
        let mut in_section = false;
        for line in content.lines() {
            if line.contains(TIMING_HEADER) {
                in_section = true;
                continue;
            }
            if !in_section {
                continue;
            }
            if let Some(caps) = TIMING_LINE.captures(line) {
                if let Ok(seconds) = caps[2].parse::<f64>() {
                    timings.insert(caps[1].trim().to_string(), seconds);
                    continue;
                }
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() && !trimmed.starts_with("[INFO]") {
                break;
            }
        }
    }

    if let Some(total) = TOTAL_TIME
        .captures(content)
        .and_then(|caps| caps[1].parse::<f64>().ok())
    {
        timings.insert("total".to_string(), total);
    }

    timings
}

/// Last `max_chars` characters of `text`.
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    let start = text
        .char_indices()
        .nth(skip)
        .map_or(text.len(), |(idx, _)| idx);
    &text[start..]
}

/// Last `lines` lines of `text`, keeping their line endings.
pub fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.split_inclusive('\n').collect();
    let start = all.len().saturating_sub(lines);
    all[start..].concat()
}
