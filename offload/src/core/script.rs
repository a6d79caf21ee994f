//! Replacement script synthesis for cacheable operations.
//!
//! Generation is a table lookup from tool name to a pure strategy function.
//! A tool missing from the table, or an input that fails a strategy's safety
//! checks, produces a script with `is_valid == false` rather than an error.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};

use crate::core::types::{GeneratedScript, PromotionCandidate, ScriptType, ToolExecutionPair};

/// Strategy signature: recorded tool input → script body and type, or the
/// reason no safe script exists.
pub type Strategy = fn(&Map<String, Value>) -> Result<(String, ScriptType), String>;

const STRATEGIES: &[(&str, Strategy)] = &[
    ("Read", read_strategy),
    ("Bash", bash_strategy),
    ("Write", write_strategy),
    ("Glob", glob_strategy),
    ("LS", list_strategy),
    ("Grep", grep_strategy),
];

const HEREDOC_DELIMITER: &str = "OFFLOAD_EOF";

/// Glob patterns are expanded unquoted, so only glob metacharacters are allowed.
static SAFE_GLOB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_./*?\[\]{},@+=:-]+$").expect("valid glob regex"));

pub fn strategy_for(tool_name: &str) -> Option<Strategy> {
    STRATEGIES
        .iter()
        .find(|(name, _)| *name == tool_name)
        .map(|(_, strategy)| *strategy)
}

pub fn supported_tools() -> impl Iterator<Item = &'static str> {
    STRATEGIES.iter().map(|(name, _)| *name)
}

/// Execution settings stamped onto every generated script.
#[derive(Debug, Clone)]
pub struct ScriptGenerator {
    pub working_dir: PathBuf,
    pub timeout: Duration,
    pub env: BTreeMap<String, String>,
}

impl ScriptGenerator {
    pub fn new(working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            working_dir: working_dir.into(),
            timeout,
            env: BTreeMap::new(),
        }
    }

    /// Synthesize a replacement for `candidate` from a representative recording.
    pub fn generate(
        &self,
        candidate: &PromotionCandidate,
        representative: &ToolExecutionPair,
    ) -> GeneratedScript {
        let id = candidate.key().clone();
        let outcome = match strategy_for(&id.tool_name) {
            Some(strategy) => strategy(&representative.input),
            None => Err(format!("no generation strategy for tool '{}'", id.tool_name)),
        };

        let mut script = GeneratedScript {
            id,
            script: String::new(),
            script_type: None,
            working_dir: self.working_dir.clone(),
            timeout_ms: self.timeout.as_millis() as u64,
            env: self.env.clone(),
            is_valid: false,
            invalid_reason: None,
        };
        match outcome {
            Ok((body, script_type)) => {
                script.script = format!("{}{body}\n", header(candidate));
                script.script_type = Some(script_type);
                script.is_valid = true;
            }
            Err(reason) => script.invalid_reason = Some(reason),
        }
        script
    }
}

fn header(candidate: &PromotionCandidate) -> String {
    format!(
        "# offload operation: {}\n# confidence: {:.3}\n# observed in {} sessions\n",
        candidate.key(),
        candidate.composite_score,
        candidate.session_count()
    )
}

fn read_strategy(input: &Map<String, Value>) -> Result<(String, ScriptType), String> {
    let path = required_str(input, "file_path")?;
    let offset = optional_u64(input, "offset")?;
    let limit = optional_u64(input, "limit")?;
    let body = match (offset, limit) {
        (None, None) => format!("cat -- {}", shell_quote(path)),
        (offset, limit) => {
            let start = offset.unwrap_or(1).max(1);
            let mut command = format!("tail -n +{start} -- {}", shell_quote(path));
            if let Some(limit) = limit {
                command.push_str(&format!(" | head -n {limit}"));
            }
            command
        }
    };
    Ok((body, ScriptType::ContentDump))
}

fn bash_strategy(input: &Map<String, Value>) -> Result<(String, ScriptType), String> {
    let command = required_str(input, "command")?;
    if command.trim().is_empty() {
        return Err("recorded command is empty".to_string());
    }
    Ok((command.to_string(), ScriptType::Command))
}

fn write_strategy(input: &Map<String, Value>) -> Result<(String, ScriptType), String> {
    let path = shell_quote(required_str(input, "file_path")?);
    let content = required_str(input, "content")?;
    if content.is_empty() {
        return Ok((format!(": > {path}"), ScriptType::FileWrite));
    }

    let delimiter = heredoc_delimiter(content);
    // A heredoc always ends with a newline; trim back to the exact byte count
    // when the recorded content does not.
    let body = if content.ends_with('\n') {
        format!("cat > {path} <<'{delimiter}'\n{content}{delimiter}")
    } else {
        format!(
            "head -c {} > {path} <<'{delimiter}'\n{content}\n{delimiter}",
            content.len()
        )
    };
    Ok((body, ScriptType::FileWrite))
}

fn glob_strategy(input: &Map<String, Value>) -> Result<(String, ScriptType), String> {
    let pattern = required_str(input, "pattern")?;
    if !SAFE_GLOB.is_match(pattern) {
        return Err(format!("glob pattern '{pattern}' contains shell metacharacters"));
    }
    let root = optional_str(input, "path")?.unwrap_or(".");
    let body = format!(
        "shopt -s globstar nullglob\ncd -- {} || exit 1\nfor entry in {pattern}; do printf '%s\\n' \"$entry\"; done",
        shell_quote(root)
    );
    Ok((body, ScriptType::DirectoryScan))
}

fn list_strategy(input: &Map<String, Value>) -> Result<(String, ScriptType), String> {
    let root = required_str(input, "path")?;
    Ok((format!("ls -1A -- {}", shell_quote(root)), ScriptType::DirectoryScan))
}

fn grep_strategy(input: &Map<String, Value>) -> Result<(String, ScriptType), String> {
    let pattern = required_str(input, "pattern")?;
    let root = optional_str(input, "path")?.unwrap_or(".");
    let mode_flag = match optional_str(input, "output_mode")?.unwrap_or("files_with_matches") {
        "files_with_matches" => "-l",
        "content" => "-n",
        "count" => "-c",
        other => return Err(format!("unsupported grep output_mode '{other}'")),
    };

    let mut command = format!("grep -rE {mode_flag}");
    if input.get("-i").and_then(Value::as_bool).unwrap_or(false) {
        command.push_str(" -i");
    }
    if let Some(glob) = optional_str(input, "glob")? {
        command.push_str(&format!(" --include={}", shell_quote(glob)));
    }
    command.push_str(&format!(" -- {} {}", shell_quote(pattern), shell_quote(root)));
    Ok((command, ScriptType::PatternSearch))
}

fn required_str<'a>(input: &'a Map<String, Value>, field: &str) -> Result<&'a str, String> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("input missing string field '{field}'"))
}

fn optional_str<'a>(input: &'a Map<String, Value>, field: &str) -> Result<Option<&'a str>, String> {
    match input.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.as_str())),
        Some(_) => Err(format!("input field '{field}' must be a string")),
    }
}

fn optional_u64(input: &Map<String, Value>, field: &str) -> Result<Option<u64>, String> {
    match input.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| format!("input field '{field}' must be a non-negative integer")),
    }
}

fn heredoc_delimiter(content: &str) -> String {
    let mut delimiter = HEREDOC_DELIMITER.to_string();
    let mut suffix = 0;
    while content.lines().any(|line| line == delimiter) {
        suffix += 1;
        delimiter = format!("{HEREDOC_DELIMITER}_{suffix}");
    }
    delimiter
}

/// Single-quote `input` for POSIX shells unless it is plainly safe.
pub fn shell_quote(input: &str) -> String {
    if !input.is_empty()
        && input
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':'))
    {
        return input.to_string();
    }
    let mut escaped = String::from("'");
    for ch in input.chars() {
        if ch == '\'' {
            escaped.push_str("'\"'\"'");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}
