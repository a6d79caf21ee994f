//! Content-addressable hashing for tool inputs, outputs, and log payloads.
//!
//! All digests are lowercase SHA-256 hex. JSON values are hashed over their
//! canonical form (object keys sorted lexicographically at every depth), so
//! two logically equal inputs always share one digest regardless of key
//! insertion order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// SHA-256 hex digest of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Render `value` as compact JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    // Serializing a `Value` cannot fail: keys are strings and numbers are finite.
    serde_json::to_string(&canonicalize(value)).unwrap_or_default()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<(&String, &Value)> = object.iter().collect();
            entries.sort_by(|left, right| left.0.cmp(right.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key.clone(), canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(values) => Value::Array(values.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Canonical hash of a tool's input mapping.
pub fn input_hash(input: &Map<String, Value>) -> String {
    sha256_hex(canonical_json(&Value::Object(input.clone())).as_bytes())
}

/// Hash of a captured tool output (also used for dry-run stdout).
pub fn output_hash(output: &[u8]) -> String {
    sha256_hex(output)
}

/// Identity of a cacheable operation: tool name plus canonical input hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey {
    pub tool_name: String,
    pub input_hash: String,
}

impl OperationKey {
    pub fn new(tool_name: impl Into<String>, input_hash: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            input_hash: input_hash.into(),
        }
    }

    pub fn for_input(tool_name: &str, input: &Map<String, Value>) -> Self {
        Self::new(tool_name, input_hash(input))
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tool_name, self.input_hash)
    }
}

impl FromStr for OperationKey {
    type Err = String;

    /// Splits on the last `:` since tool names (e.g. MCP tools) may contain colons
    /// while hex digests never do.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (tool, hash) = raw
            .rsplit_once(':')
            .ok_or_else(|| format!("operation key '{raw}' missing ':' separator"))?;
        if tool.is_empty() {
            return Err(format!("operation key '{raw}' has empty tool name"));
        }
        if hash.len() != 64 || !hash.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(format!("operation key '{raw}' has malformed input hash"));
        }
        Ok(Self::new(tool, hash))
    }
}

impl Serialize for OperationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OperationKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": true, "y": [{"d": 1, "c": 2}]}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"y":[{"c":2,"d":1}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn input_hash_ignores_insertion_order() {
        let mut first = Map::new();
        first.insert("pattern".to_string(), json!("*.rs"));
        first.insert("path".to_string(), json!("src"));
        let mut second = Map::new();
        second.insert("path".to_string(), json!("src"));
        second.insert("pattern".to_string(), json!("*.rs"));
        assert_eq!(input_hash(&first), input_hash(&second));
    }

    #[test]
    fn input_hash_distinguishes_values() {
        let a = object(json!({"file_path": "/src/index.ts"}));
        let b = object(json!({"file_path": "/src/main.ts"}));
        assert_ne!(input_hash(&a), input_hash(&b));
    }

    #[test]
    fn operation_key_display_and_parse() {
        let key = OperationKey::for_input("Read", &object(json!({"file_path": "/src/index.ts"})));
        let rendered = key.to_string();
        assert!(rendered.starts_with("Read:"));
        let parsed: OperationKey = rendered.parse().expect("parse");
        assert_eq!(parsed, key);
    }

    #[test]
    fn operation_key_keeps_colons_in_tool_name() {
        let hash = sha256_hex(b"x");
        let parsed: OperationKey = format!("mcp:fs:read:{hash}").parse().expect("parse");
        assert_eq!(parsed.tool_name, "mcp:fs:read");
        assert_eq!(parsed.input_hash, hash);
    }

    #[test]
    fn operation_key_rejects_malformed() {
        assert!("Read".parse::<OperationKey>().is_err());
        assert!("Read:nothex".parse::<OperationKey>().is_err());
        assert!(format!(":{}", sha256_hex(b"x")).parse::<OperationKey>().is_err());
    }
}
