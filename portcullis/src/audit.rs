//! Append-only audit journal: one line-delimited JSON event per mutating
//! operation (spec.md §4.10).
//!
//! Reads (`tail`) are built to avoid materializing the whole file for a
//! daemon that may run for months: we seek backward in fixed-size blocks,
//! counting newlines, until we have at least the requested number of lines
//! or reach the start of the file.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write as _};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use portcullis_shared::errors::{PortcullisError, PortcullisResult};

const TAIL_BLOCK_SIZE: u64 = 8192;

/// A single journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn success(operation: impl Into<String>, detail: Option<serde_json::Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: operation.into(),
            outcome: "ok".to_string(),
            error_code: None,
            detail,
        }
    }

    pub fn failure(operation: impl Into<String>, err: &PortcullisError) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: operation.into(),
            outcome: "error".to_string(),
            error_code: Some(err.code().to_string()),
            detail: Some(serde_json::json!({ "message": err.to_string() })),
        }
    }
}

/// Append a single event to the journal at `path`, creating it if absent.
pub fn append(path: &Path, event: &AuditEvent) -> PortcullisResult<()> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PortcullisError::IoError(format!("open audit log: {e}")))?;
    file.write_all(&line)
        .map_err(|e| PortcullisError::IoError(format!("append audit log: {e}")))?;
    Ok(())
}

/// Return up to `max_lines` of the most recent journal entries, in
/// chronological order, without reading more of the file than necessary.
pub fn tail(path: &Path, max_lines: usize) -> PortcullisResult<Vec<AuditEvent>> {
    if max_lines == 0 {
        return Ok(Vec::new());
    }

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PortcullisError::IoError(format!("open audit log: {e}"))),
    };

    let file_len = file
        .metadata()
        .map_err(|e| PortcullisError::IoError(format!("stat audit log: {e}")))?
        .len();

    let mut collected: Vec<u8> = Vec::new();
    let mut newline_count: usize = 0;
    let mut cursor = file_len;

    while cursor > 0 && newline_count <= max_lines {
        let block_len = TAIL_BLOCK_SIZE.min(cursor);
        cursor -= block_len;
        file.seek(SeekFrom::Start(cursor))
            .map_err(|e| PortcullisError::IoError(format!("seek audit log: {e}")))?;
        let mut block = vec![0u8; block_len as usize];
        file.read_exact(&mut block)
            .map_err(|e| PortcullisError::IoError(format!("read audit log: {e}")))?;
        newline_count += block.iter().filter(|&&b| b == b'\n').count();

        let mut combined = block;
        combined.extend_from_slice(&collected);
        collected = combined;
    }

    let text = String::from_utf8_lossy(&collected);
    let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);

    lines[start..]
        .iter()
        .map(|line| serde_json::from_str(line).map_err(PortcullisError::from))
        .collect()
}
