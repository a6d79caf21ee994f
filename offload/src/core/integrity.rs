//! Tamper-evident checksums and shape validation for persisted log lines.
//!
//! Nothing here panics or propagates past the boundary: every defect is an
//! [`IntegrityError`] the caller must branch on.

use serde_json::{Map, Value};

use crate::core::hashing::{canonical_json, sha256_hex};
use crate::core::types::Envelope;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("entry must be a JSON object")]
    NotAnObject,
    #[error("missing or invalid field '{field}' (expected {expected})")]
    MissingField {
        field: &'static str,
        expected: &'static str,
    },
    #[error("invalid entry: missing or non-string _checksum")]
    MissingChecksum,
    #[error("invalid entry: missing or non-object data")]
    MissingData,
    #[error("checksum mismatch (tampered or corrupted): expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// SHA-256 over the canonical JSON of `data` alone.
pub fn compute_checksum(data: &Value) -> String {
    sha256_hex(canonical_json(data).as_bytes())
}

fn checksum_map(data: &Map<String, Value>) -> String {
    compute_checksum(&Value::Object(data.clone()))
}

/// Attach a `_checksum` covering `envelope.data`.
pub fn create_checksummed_entry(mut envelope: Envelope) -> Envelope {
    envelope.checksum = Some(checksum_map(&envelope.data));
    envelope
}

/// Verify a raw JSON entry's `_checksum` against its `data`.
pub fn verify_checksum(entry: &Value) -> Result<(), IntegrityError> {
    let expected = entry
        .get("_checksum")
        .and_then(Value::as_str)
        .ok_or(IntegrityError::MissingChecksum)?;
    let data = entry
        .get("data")
        .filter(|data| data.is_object())
        .ok_or(IntegrityError::MissingData)?;
    compare(expected, compute_checksum(data))
}

/// Typed counterpart of [`verify_checksum`].
pub fn verify_envelope(envelope: &Envelope) -> Result<(), IntegrityError> {
    let expected = envelope
        .checksum
        .as_deref()
        .ok_or(IntegrityError::MissingChecksum)?;
    compare(expected, checksum_map(&envelope.data))
}

fn compare(expected: &str, actual: String) -> Result<(), IntegrityError> {
    if expected == actual {
        Ok(())
    } else {
        Err(IntegrityError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Parse and shape-check one JSONL line.
///
/// Requires a top-level object with numeric `timestamp`, string `category`,
/// and object `data`. Does not verify the checksum.
pub fn validate_jsonl_entry(line: &str) -> Result<Envelope, IntegrityError> {
    let value: Value = serde_json::from_str(line.trim())
        .map_err(|err| IntegrityError::InvalidJson(err.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(IntegrityError::NotAnObject);
    };

    let timestamp = match object.remove("timestamp") {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))
            .ok_or(IntegrityError::MissingField {
                field: "timestamp",
                expected: "number",
            })?,
        _ => {
            return Err(IntegrityError::MissingField {
                field: "timestamp",
                expected: "number",
            });
        }
    };
    let Some(Value::String(category)) = object.remove("category") else {
        return Err(IntegrityError::MissingField {
            field: "category",
            expected: "string",
        });
    };
    let Some(Value::Object(data)) = object.remove("data") else {
        return Err(IntegrityError::MissingField {
            field: "data",
            expected: "object",
        });
    };
    let checksum = match object.remove("_checksum") {
        Some(Value::String(checksum)) => Some(checksum),
        _ => None,
    };

    Ok(Envelope {
        timestamp,
        category,
        data,
        checksum,
        extra: object,
    })
}
