//! Output classifier for external process streams
//!
//! Turns raw byte chunks (which align with neither line nor JSON-object
//! boundaries) into typed log lines, and extracts at most one embedded
//! result payload per job via a structural scan: the accumulated stdout
//! text is searched after every chunk for the first balanced top-level
//! `{...}` object, which is then consumed out of the buffer. The
//! `==== BACKTEST_RESULT_START/END ====` marker lines the bot prints
//! around the payload need no special handling; they land in the logs
//! like any other line.

use crate::error::SupervisorError;
use crate::models::records::BacktestSummary;
use crate::models::{LogEntry, LogSeverity};
use chrono::Utc;

/// Scan buffer cap; a payload larger than this is treated as absent
const SCAN_CAP: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrigin {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    Log(LogEntry),
    /// Raw payload text, captured at most once per job
    Payload(String),
}

pub struct OutputClassifier {
    stdout_line: Vec<u8>,
    stderr_line: Vec<u8>,
    // Raw bytes: a multibyte character split across chunks must not be
    // decoded until the payload boundaries are known
    scan: Vec<u8>,
    payload: Option<String>,
}

impl OutputClassifier {
    pub fn new() -> Self {
        Self {
            stdout_line: Vec::new(),
            stderr_line: Vec::new(),
            scan: Vec::new(),
            payload: None,
        }
    }

    /// Feed one chunk from the given stream, returning the events it
    /// completes. Partial lines and partial JSON objects are carried
    /// across calls.
    pub fn push_chunk(&mut self, origin: StreamOrigin, chunk: &[u8]) -> Vec<OutputEvent> {
        let mut events = Vec::new();

        let line_buf = match origin {
            StreamOrigin::Stdout => &mut self.stdout_line,
            StreamOrigin::Stderr => &mut self.stderr_line,
        };
        line_buf.extend_from_slice(chunk);

        // Emit every completed line
        while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = line_buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim_end_matches('\r').trim();
            if !line.is_empty() {
                events.push(OutputEvent::Log(LogEntry {
                    timestamp: Utc::now(),
                    message: line.to_string(),
                    severity: classify_line(origin, line),
                }));
            }
        }

        // The payload scan only tracks stdout
        if origin == StreamOrigin::Stdout {
            self.scan.extend_from_slice(chunk);
            self.scan_for_payload(&mut events);
        }

        events
    }

    /// Flush trailing partial lines at end of stream
    pub fn flush(&mut self) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        for (origin, buf) in [
            (StreamOrigin::Stdout, std::mem::take(&mut self.stdout_line)),
            (StreamOrigin::Stderr, std::mem::take(&mut self.stderr_line)),
        ] {
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if !line.is_empty() {
                events.push(OutputEvent::Log(LogEntry {
                    timestamp: Utc::now(),
                    message: line.to_string(),
                    severity: classify_line(origin, line),
                }));
            }
        }
        events
    }

    /// The captured payload, if any
    pub fn take_payload(&mut self) -> Option<String> {
        self.payload.take()
    }

    fn scan_for_payload(&mut self, events: &mut Vec<OutputEvent>) {
        while let Some((start, end)) = find_balanced_bytes(&self.scan) {
            let object = String::from_utf8_lossy(&self.scan[start..end]).into_owned();
            self.scan.drain(..end);
            if self.payload.is_none() {
                events.push(OutputEvent::Payload(object.clone()));
                self.payload = Some(object);
            } else {
                // Only the first fully-captured payload counts
                events.push(OutputEvent::Log(LogEntry {
                    timestamp: Utc::now(),
                    message: "ignoring additional result payload in output stream".to_string(),
                    severity: LogSeverity::Warning,
                }));
            }
        }

        // Nothing before the first brace can ever become a payload
        match self.scan.iter().position(|&b| b == b'{') {
            Some(pos) if pos > 0 => {
                self.scan.drain(..pos);
            }
            None => self.scan.clear(),
            _ => {}
        }
        if self.scan.len() > SCAN_CAP {
            self.scan.clear();
        }
    }
}

impl Default for OutputClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// stderr is always an error; stdout is info unless the line itself
/// says otherwise.
fn classify_line(origin: StreamOrigin, line: &str) -> LogSeverity {
    match origin {
        StreamOrigin::Stderr => LogSeverity::Error,
        StreamOrigin::Stdout => {
            if line.starts_with("ERROR") || line.contains("Traceback (most recent call last)") {
                LogSeverity::Error
            } else if line.starts_with("WARNING") {
                LogSeverity::Warning
            } else {
                LogSeverity::Info
            }
        }
    }
}

/// Locate the first balanced top-level `{...}` object in `text`,
/// returning its byte range. String literals and escapes are honored so
/// braces inside JSON strings do not unbalance the scan. Returns `None`
/// while the object is still incomplete.
pub fn find_balanced_object(text: &str) -> Option<(usize, usize)> {
    find_balanced_bytes(text.as_bytes())
}

/// Byte-level scan so it can run over buffers that may end mid-way
/// through a UTF-8 sequence. Every structural byte is ASCII and UTF-8
/// continuation bytes never collide with ASCII, so the returned range
/// always falls on character boundaries.
fn find_balanced_bytes(bytes: &[u8]) -> Option<(usize, usize)> {
    let mut start = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if start.is_none() {
            if b == b'{' {
                start = Some(i);
                depth = 1;
            }
            continue;
        }
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|s| (s, i + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a captured payload into the fixed-shape numeric summary.
///
/// Control characters are stripped first; a malformed payload is an
/// error for the caller to log, never a crash.
pub fn parse_backtest_summary(payload: &str) -> Result<BacktestSummary, SupervisorError> {
    let cleaned: String = payload.chars().filter(|c| !c.is_control()).collect();
    serde_json::from_str(&cleaned)
        .map_err(|e| SupervisorError::Extraction(format!("malformed result payload: {}", e)))
}
