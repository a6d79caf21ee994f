//! Append-only JSONL execution log (`.offload/executions.jsonl`).
//!
//! Writes for one file are funneled through a single per-path lock so racing
//! captures never interleave bytes. Reads are point-in-time snapshots that
//! skip (and report) damaged lines instead of failing the whole corpus.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::integrity::{create_checksummed_entry, validate_jsonl_entry, verify_envelope};
use crate::core::types::{EXECUTION_CATEGORY, Envelope, StoredExecutionBatch};

pub const DEFAULT_LOG_PATH: &str = ".offload/executions.jsonl";

/// Serializing appender shared by every capture call site.
#[derive(Debug, Default)]
pub struct LogWriter {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl LogWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(path.to_path_buf()).or_default().clone()
    }

    /// Checksum `envelope` and append it as one line.
    #[instrument(skip_all, fields(path = %path.display(), category = %envelope.category))]
    pub fn append(&self, path: &Path, envelope: Envelope) -> Result<Envelope> {
        let entry = create_checksummed_entry(envelope);
        let mut line = serde_json::to_string(&entry).context("serialize log entry")?;
        line.push('\n');

        let lock = self.lock_for(path);
        let _guard: MutexGuard<'_, ()> = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append log {}", path.display()))?;
        file.flush()
            .with_context(|| format!("flush log {}", path.display()))?;
        debug!(bytes = line.len(), "log entry appended");
        Ok(entry)
    }

    /// Append one session's batch under the execution category.
    pub fn append_batch(
        &self,
        path: &Path,
        batch: &StoredExecutionBatch,
        timestamp: i64,
    ) -> Result<Envelope> {
        self.append(path, batch_envelope(batch, timestamp)?)
    }
}

/// Wrap a batch as an unchecksummed execution envelope.
pub fn batch_envelope(batch: &StoredExecutionBatch, timestamp: i64) -> Result<Envelope> {
    Ok(Envelope::new(timestamp, EXECUTION_CATEGORY, to_object(batch)?))
}

fn to_object<T: Serialize>(value: &T) -> Result<serde_json::Map<String, Value>> {
    match serde_json::to_value(value).context("serialize envelope data")? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("envelope data must be an object, got {other}")),
    }
}

/// A line that could not be used, with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedLine {
    pub line: usize,
    pub reason: String,
}

/// A verified envelope and the 1-based line it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub line: usize,
    pub envelope: Envelope,
}

/// Every verified envelope in a log file plus the lines that failed.
#[derive(Debug, Clone, Default)]
pub struct LogScan {
    pub entries: Vec<LogEntry>,
    pub skipped: Vec<SkippedLine>,
}

/// Shape-check and checksum-verify every non-blank line.
///
/// Lines are decoded one at a time, so a line that is not UTF-8 is skipped
/// like any other damaged line. A missing file is an empty log. Only an
/// unreadable file is an error.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn scan_log(path: &Path) -> Result<LogScan> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("log missing, treating as empty");
            return Ok(LogScan::default());
        }
        Err(err) => return Err(err).with_context(|| format!("read log {}", path.display())),
    };

    let mut scan = LogScan::default();
    for (index, raw) in contents.split(|&byte| byte == b'\n').enumerate() {
        let line = index + 1;
        let verified = std::str::from_utf8(raw)
            .map_err(|_| "invalid UTF-8".to_string())
            .and_then(|text| {
                if text.trim().is_empty() {
                    return Ok(None);
                }
                let entry = validate_jsonl_entry(text).map_err(|err| err.to_string())?;
                verify_envelope(&entry).map_err(|err| err.to_string())?;
                Ok(Some(entry))
            });
        match verified {
            Ok(Some(envelope)) => scan.entries.push(LogEntry { line, envelope }),
            Ok(None) => {}
            Err(reason) => {
                warn!(line, reason = %reason, "skipping log line");
                scan.skipped.push(SkippedLine { line, reason });
            }
        }
    }
    debug!(entries = scan.entries.len(), skipped = scan.skipped.len(), "log scanned");
    Ok(scan)
}

/// Execution batches recovered from a log.
#[derive(Debug, Clone, Default)]
pub struct CorpusReport {
    pub batches: Vec<StoredExecutionBatch>,
    pub skipped: Vec<SkippedLine>,
}

/// Read every verified execution batch; other categories are ignored.
pub fn read_corpus(path: &Path) -> Result<CorpusReport> {
    let scan = scan_log(path)?;
    let mut report = CorpusReport {
        batches: Vec::new(),
        skipped: scan.skipped,
    };
    for LogEntry { line, envelope } in scan.entries {
        if envelope.category != EXECUTION_CATEGORY {
            continue;
        }
        match serde_json::from_value::<StoredExecutionBatch>(Value::Object(envelope.data)) {
            Ok(batch) => report.batches.push(batch),
            Err(err) => {
                warn!(line, err = %err, "skipping malformed execution batch");
                report.skipped.push(SkippedLine {
                    line,
                    reason: format!("malformed execution batch: {err}"),
                });
            }
        }
    }
    report.skipped.sort_by_key(|skipped| skipped.line);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ToolExecutionPair;
    use crate::test_support::{batch, read_pair};
    use serde_json::Map;

    fn sample_batch(session: &str) -> StoredExecutionBatch {
        batch(session, vec![read_pair("/src/index.ts", "body", 1, session)])
    }

    #[test]
    fn append_then_read_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".offload").join("executions.jsonl");
        let writer = LogWriter::new();
        writer
            .append_batch(&path, &sample_batch("s1"), 10)
            .expect("append");
        writer
            .append_batch(&path, &sample_batch("s2"), 11)
            .expect("append");

        let report = read_corpus(&path).expect("read");
        assert!(report.skipped.is_empty());
        assert_eq!(report.batches, vec![sample_batch("s1"), sample_batch("s2")]);
    }

    #[test]
    fn missing_log_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = read_corpus(&temp.path().join("none.jsonl")).expect("read");
        assert!(report.batches.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn corrupted_lines_are_skipped_not_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("executions.jsonl");
        let writer = LogWriter::new();
        writer
            .append_batch(&path, &sample_batch("s1"), 10)
            .expect("append");

        let mut tampered = create_checksummed_entry(batch_envelope(&sample_batch("s2"), 11).expect("envelope"));
        tampered
            .data
            .insert("sessionId".to_string(), Value::String("forged".to_string()));
        let mut contents = fs::read_to_string(&path).expect("read");
        contents.push_str("{truncated\n\n");
        contents.push_str(&serde_json::to_string(&tampered).expect("serialize"));
        contents.push('\n');
        fs::write(&path, contents).expect("write");
        writer
            .append_batch(&path, &sample_batch("s3"), 12)
            .expect("append");

        let report = read_corpus(&path).expect("read");
        let sessions: Vec<&str> = report
            .batches
            .iter()
            .map(|batch| batch.session_id.as_str())
            .collect();
        assert_eq!(sessions, vec!["s1", "s3"]);
        let lines: Vec<usize> = report.skipped.iter().map(|skipped| skipped.line).collect();
        assert_eq!(lines, vec![2, 4]);
        assert!(report.skipped[1].reason.contains("checksum mismatch"));
    }

    #[test]
    fn other_categories_and_bad_payloads_are_handled() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("executions.jsonl");
        let writer = LogWriter::new();
        let mut note = Map::new();
        note.insert("text".to_string(), Value::String("hello".to_string()));
        writer
            .append(&path, Envelope::new(1, "session-observation", note.clone()))
            .expect("append");
        writer
            .append(&path, Envelope::new(2, EXECUTION_CATEGORY, note))
            .expect("append");

        let report = read_corpus(&path).expect("read");
        assert!(report.batches.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].line, 2);
        assert!(report.skipped[0].reason.contains("malformed execution batch"));
    }

    #[test]
    fn non_utf8_line_is_skipped_not_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("executions.jsonl");
        let writer = LogWriter::new();
        writer
            .append_batch(&path, &sample_batch("s1"), 10)
            .expect("append");
        let mut contents = fs::read(&path).expect("read");
        contents.extend_from_slice(b"\xff\xfe garbage\n");
        fs::write(&path, contents).expect("write");
        writer
            .append_batch(&path, &sample_batch("s2"), 11)
            .expect("append");

        let report = read_corpus(&path).expect("read");
        assert_eq!(report.batches, vec![sample_batch("s1"), sample_batch("s2")]);
        assert_eq!(
            report.skipped,
            vec![SkippedLine {
                line: 2,
                reason: "invalid UTF-8".to_string()
            }]
        );

        let scan = scan_log(&path).expect("scan");
        let lines: Vec<usize> = scan.entries.iter().map(|entry| entry.line).collect();
        assert_eq!(lines, vec![1, 3]);
    }

    #[test]
    fn concurrent_appends_never_interleave() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("executions.jsonl");
        let writer = Arc::new(LogWriter::new());
        let big_output = "x".repeat(64 * 1024);

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let writer = writer.clone();
                let path = path.clone();
                let output = big_output.clone();
                std::thread::spawn(move || {
                    for iter in 0..5 {
                        let session = format!("w{worker}-{iter}");
                        let pair = ToolExecutionPair::complete(
                            "Bash",
                            Map::new(),
                            output.clone(),
                            iter,
                            session.as_str(),
                        );
                        writer
                            .append_batch(&path, &batch(&session, vec![pair]), iter)
                            .expect("append");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        let report = read_corpus(&path).expect("read");
        assert!(report.skipped.is_empty());
        assert_eq!(report.batches.len(), 40);
    }
}
