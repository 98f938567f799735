//! IPC wire protocol: request/reply envelopes and the length-prefixed framing
//! used to carry them over the local control socket.
//!
//! Framing is a 4-byte little-endian unsigned length `L` followed by `L`
//! bytes of UTF-8 request or reply JSON (spec endianness choice, fixed here
//! since the source left it ambiguous).

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::errors::{FieldError, PortcullisError, PortcullisResult, RuleError};

/// Default maximum frame size: 16 MiB, large enough for sizeable policies.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Every request carries a `type` discriminant plus type-specific fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Validate {
        policy: String,
    },
    Apply {
        policy_path: Option<String>,
    },
    ApplyBytes {
        policy: String,
    },
    Rollback,
    Teardown,
    RevertLkg,
    WatchSet {
        path: Option<String>,
    },
    WatchStatus,
    GetLkg {
        include_body: bool,
    },
    GetLogs {
        tail: Option<usize>,
        since_minutes: Option<i64>,
    },
}

impl Request {
    /// Whether this request mutates installed filter state and therefore
    /// must be serialized on the mutator lock (spec.md §4.7/§5).
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Request::Apply { .. }
                | Request::ApplyBytes { .. }
                | Request::Rollback
                | Request::Teardown
                | Request::RevertLkg
                | Request::WatchSet { .. }
        )
    }
}

/// Per-rule compilation error as surfaced to IPC clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationErrorEntry {
    pub rule_id: String,
    pub message: String,
}

impl From<&RuleError> for CompilationErrorEntry {
    fn from(e: &RuleError) -> Self {
        Self {
            rule_id: e.rule_id.clone(),
            message: e.message.clone(),
        }
    }
}

/// Single field validation error as surfaced to IPC clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorEntry {
    pub path: String,
    pub message: String,
}

impl From<&FieldError> for ValidationErrorEntry {
    fn from(e: &FieldError) -> Self {
        Self {
            path: e.path.clone(),
            message: e.message.clone(),
        }
    }
}

/// Counters attached to apply-family replies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyCounters {
    pub filters_created: u64,
    pub filters_removed: u64,
    pub rules_skipped: u64,
    pub total_rules: u64,
    pub policy_version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub compilation_errors: Vec<CompilationErrorEntry>,
}

/// Every reply carries `ok` and, on failure, `error_code`/`error_message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Ok(OkBody),
    Err(ErrBody),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrBody {
    pub ok: bool,
    pub error_code: String,
    pub error_message: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<ValidationErrorEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OkBody {
    pub ok: bool,
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

impl Response {
    pub fn ok(payload: serde_json::Value) -> Self {
        Response::Ok(OkBody { ok: true, payload })
    }

    pub fn err(err: &PortcullisError) -> Self {
        let errors = match err {
            PortcullisError::ValidationFailed(list) => {
                list.iter().map(ValidationErrorEntry::from).collect()
            }
            _ => Vec::new(),
        };
        Response::Err(ErrBody {
            ok: false,
            error_code: err.code().to_string(),
            error_message: err.to_string(),
            errors,
        })
    }
}

/// Write one length-prefixed JSON frame. Rejects payloads above `max_frame`.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8], max_frame: u32) -> PortcullisResult<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| PortcullisError::InvalidArgument("frame too large to encode".into()))?;
    if len > max_frame {
        return Err(PortcullisError::InvalidArgument(format!(
            "frame of {len} bytes exceeds max {max_frame}"
        )));
    }
    w.write_all(&len.to_le_bytes())?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

/// Read one length-prefixed JSON frame, rejecting (without allocating the
/// payload buffer) any frame whose declared length exceeds `max_frame`.
pub fn read_frame<R: Read>(r: &mut R, max_frame: u32) -> PortcullisResult<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf);
    if len > max_frame {
        return Err(PortcullisError::InvalidArgument(format!(
            "frame of {len} bytes exceeds max {max_frame}, rejecting before allocation"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_request<W: Write>(w: &mut W, req: &Request, max_frame: u32) -> PortcullisResult<()> {
    let bytes = serde_json::to_vec(req)?;
    write_frame(w, &bytes, max_frame)
}

pub fn read_request<R: Read>(r: &mut R, max_frame: u32) -> PortcullisResult<Request> {
    let bytes = read_frame(r, max_frame)?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn write_response<W: Write>(
    w: &mut W,
    resp: &Response,
    max_frame: u32,
) -> PortcullisResult<()> {
    let bytes = serde_json::to_vec(resp)?;
    write_frame(w, &bytes, max_frame)
}

pub fn read_response<R: Read>(r: &mut R, max_frame: u32) -> PortcullisResult<Response> {
    let bytes = read_frame(r, max_frame)?;
    Ok(serde_json::from_slice(&bytes)?)
}
