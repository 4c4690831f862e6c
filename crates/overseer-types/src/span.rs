use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `(trace_id, span_id)` pair identifying a record's root span.
///
/// Both fields are lowercase hex: 16 bytes for the trace id, 8 for the span
/// id. The encoding is deterministic so the pair can be persisted on a
/// record and re-attached on every reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanContext {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpanContextError {
    #[error("invalid trace id {value:?}: expected 32 lowercase hex chars")]
    InvalidTraceId { value: String },
    #[error("invalid span id {value:?}: expected 16 lowercase hex chars")]
    InvalidSpanId { value: String },
}

impl SpanContext {
    pub fn from_bytes(trace_id: [u8; 16], span_id: [u8; 8]) -> Self {
        Self {
            trace_id: hex::encode(trace_id),
            span_id: hex::encode(span_id),
        }
    }

    /// Validates the hex encoding of both ids.
    pub fn parse(trace_id: &str, span_id: &str) -> Result<Self, SpanContextError> {
        if !is_lower_hex(trace_id, 32) {
            return Err(SpanContextError::InvalidTraceId {
                value: trace_id.to_string(),
            });
        }
        if !is_lower_hex(span_id, 16) {
            return Err(SpanContextError::InvalidSpanId {
                value: span_id.to_string(),
            });
        }
        Ok(Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
        })
    }

    pub fn trace_id_bytes(&self) -> Option<[u8; 16]> {
        let bytes = hex::decode(&self.trace_id).ok()?;
        bytes.try_into().ok()
    }

    pub fn span_id_bytes(&self) -> Option<[u8; 8]> {
        let bytes = hex::decode(&self.span_id).ok()?;
        bytes.try_into().ok()
    }
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
