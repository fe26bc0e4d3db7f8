//! Severity parsing for forwarded worker stderr.
//!
//! Workers log to stderr with a leading level word. Each line is
//! re-emitted through `tracing` at the matching level; traceback and
//! continuation lines (leading whitespace) inherit the previous line's
//! severity so multi-line errors stay grouped.

use tracing::{debug, error, info, warn};

/// Parsed stderr severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Extract the severity prefix from a worker stderr line. Returns the
/// level and the remaining message, or `None` when the line carries no
/// prefix of its own.
pub fn parse_level(line: &str) -> Option<(StderrLevel, &str)> {
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim_start()),
        None => (line, ""),
    };
    let level = match word {
        "DEBUG" => StderrLevel::Debug,
        "INFO" => StderrLevel::Info,
        "WARNING" => StderrLevel::Warning,
        "ERROR" => StderrLevel::Error,
        "CRITICAL" => StderrLevel::Critical,
        _ => return None,
    };
    Some((level, rest))
}

/// True when a line continues the previous record (traceback body).
pub fn is_continuation(line: &str) -> bool {
    line.starts_with("Traceback") || line.starts_with(char::is_whitespace)
}

/// Stateful forwarder: remembers the last explicit severity so
/// continuation lines land at the same level.
pub struct StderrForwarder {
    worker: String,
    last_level: StderrLevel,
}

impl StderrForwarder {
    pub fn new(worker: impl Into<String>) -> Self {
        Self { worker: worker.into(), last_level: StderrLevel::Info }
    }

    /// Forward one line into the supervisor log.
    pub fn forward(&mut self, line: &str) {
        let line = line.trim_end();
        if line.is_empty() {
            return;
        }

        let (level, message) = match parse_level(line) {
            Some((level, message)) => {
                self.last_level = level;
                (level, message)
            }
            None if is_continuation(line) => (self.last_level, line),
            None => (StderrLevel::Info, line),
        };

        match level {
            StderrLevel::Debug => debug!("[{}] {}", self.worker, message),
            StderrLevel::Info => info!("[{}] {}", self.worker, message),
            StderrLevel::Warning => warn!("[{}] {}", self.worker, message),
            StderrLevel::Error | StderrLevel::Critical => error!("[{}] {}", self.worker, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_lines_parse() {
        assert_eq!(parse_level("ERROR boom"), Some((StderrLevel::Error, "boom")));
        assert_eq!(parse_level("DEBUG"), Some((StderrLevel::Debug, "")));
        assert_eq!(
            parse_level("WARNING  spaced   message"),
            Some((StderrLevel::Warning, "spaced   message"))
        );
    }

    #[test]
    fn unprefixed_lines_do_not_parse() {
        assert_eq!(parse_level("plain text"), None);
        assert_eq!(parse_level("error lowercase"), None);
        assert_eq!(parse_level("ERRORS plural"), None);
    }

    #[test]
    fn continuation_detection() {
        assert!(is_continuation("Traceback (most recent call last):"));
        assert!(is_continuation("  File \"worker.py\", line 3"));
        assert!(is_continuation("\tat frame"));
        assert!(!is_continuation("ValueError: nope"));
    }

    #[test]
    fn forwarder_tracks_last_level() {
        // Behavioral wiring is exercised through tracing; here we only
        // check the state transition.
        let mut f = StderrForwarder::new("w");
        f.forward("ERROR something broke");
        assert_eq!(f.last_level, StderrLevel::Error);
        f.forward("Traceback (most recent call last):");
        assert_eq!(f.last_level, StderrLevel::Error);
        f.forward("INFO recovered");
        assert_eq!(f.last_level, StderrLevel::Info);
    }
}
