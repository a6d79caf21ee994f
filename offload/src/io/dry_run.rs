//! Dry-run verification of generated scripts against recorded output hashes.
//!
//! Failing verification is an expected outcome, so every path returns a
//! [`DryRunResult`]; nothing here returns an error to the caller.

use std::io::Write;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{DryRunFailure, DryRunResult, GeneratedScript};
use crate::io::config::DryRunConfig;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Interpreter used for every generated script.
pub const SCRIPT_SHELL: &str = "bash";

#[derive(Debug, Clone)]
pub struct DryRunValidator {
    output_limit_bytes: usize,
}

impl Default for DryRunValidator {
    fn default() -> Self {
        Self::from_config(&DryRunConfig::default())
    }
}

impl DryRunValidator {
    pub fn from_config(config: &DryRunConfig) -> Self {
        Self {
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    /// Execute `script` in its working directory and compare stdout's hash with
    /// `expected_output_hash`.
    #[instrument(skip_all, fields(id = %script.id))]
    pub fn validate(&self, script: &GeneratedScript, expected_output_hash: &str) -> DryRunResult {
        if !script.is_valid {
            let failure = DryRunFailure::Invalid {
                id: script.id.to_string(),
                reason: script
                    .invalid_reason
                    .clone()
                    .unwrap_or_else(|| "no runnable script".to_string()),
            };
            debug!(reason = %failure, "skipping invalid script");
            return failed(expected_output_hash, None, None, Duration::ZERO, failure);
        }

        let output = match self.execute(script) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "dry run could not execute");
                let failure = DryRunFailure::SpawnFailed(format!("{err:#}"));
                return failed(expected_output_hash, None, None, Duration::ZERO, failure);
            }
        };

        let exit_code = output.exit_code();
        if output.timed_out {
            let failure = DryRunFailure::TimedOut {
                timeout_ms: script.timeout_ms,
            };
            return failed(expected_output_hash, None, exit_code, output.elapsed, failure);
        }
        if exit_code != Some(0) {
            let failure = DryRunFailure::NonZeroExit {
                code: exit_code.unwrap_or(-1),
            };
            debug!(stderr = %String::from_utf8_lossy(&output.stderr), "script failed");
            return failed(expected_output_hash, None, exit_code, output.elapsed, failure);
        }

        // Digest of the full stream; `output.stdout` may be truncated.
        let actual = output.stdout_sha256.clone();
        if actual != expected_output_hash {
            let failure = DryRunFailure::HashMismatch {
                expected: expected_output_hash.to_string(),
                actual: actual.clone(),
            };
            info!(reason = %failure, "dry run output drifted");
            return failed(expected_output_hash, Some(actual), exit_code, output.elapsed, failure);
        }

        debug!(elapsed_ms = output.elapsed.as_millis() as u64, "dry run passed");
        DryRunResult {
            passed: true,
            actual_output_hash: Some(actual),
            expected_output_hash: expected_output_hash.to_string(),
            exit_code,
            duration_ms: output.elapsed.as_millis() as u64,
            failure_kind: None,
            failure_reason: None,
        }
    }

    /// Stage the script in a temp file (removed on drop) and run it.
    fn execute(&self, script: &GeneratedScript) -> Result<CommandOutput> {
        let mut file = tempfile::Builder::new()
            .prefix("offload-dry-run-")
            .suffix(".sh")
            .tempfile()
            .context("create script file")?;
        file.write_all(script.script.as_bytes())
            .context("write script file")?;
        file.flush().context("flush script file")?;

        let mut cmd = Command::new(SCRIPT_SHELL);
        cmd.arg(file.path())
            .current_dir(&script.working_dir)
            .envs(&script.env);
        run_command_with_timeout(
            cmd,
            Duration::from_millis(script.timeout_ms),
            self.output_limit_bytes,
        )
    }
}

fn failed(
    expected_output_hash: &str,
    actual_output_hash: Option<String>,
    exit_code: Option<i32>,
    elapsed: Duration,
    failure: DryRunFailure,
) -> DryRunResult {
    DryRunResult {
        passed: false,
        actual_output_hash,
        expected_output_hash: expected_output_hash.to_string(),
        exit_code,
        duration_ms: elapsed.as_millis() as u64,
        failure_kind: Some(failure.kind()),
        failure_reason: Some(failure.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::core::hashing::{OperationKey, output_hash};
    use crate::core::types::{FailureKind, ScriptType};

    fn script(body: &str, dir: &std::path::Path) -> GeneratedScript {
        GeneratedScript {
            id: OperationKey::new("Bash", output_hash(body.as_bytes())),
            script: body.to_string(),
            script_type: Some(ScriptType::Command),
            working_dir: dir.to_path_buf(),
            timeout_ms: 10_000,
            env: BTreeMap::new(),
            is_valid: true,
            invalid_reason: None,
        }
    }

    #[test]
    fn matching_output_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = DryRunValidator::default()
            .validate(&script("printf hello", temp.path()), &output_hash(b"hello"));
        assert!(result.passed);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.actual_output_hash, Some(result.expected_output_hash.clone()));
        assert_eq!(result.failure_reason, None);
    }

    #[test]
    fn runs_in_working_dir_with_env() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker.txt"), "inside").expect("write");
        let mut generated = script("cat marker.txt; printf \"$OFFLOAD_TEST_VAR\"", temp.path());
        generated
            .env
            .insert("OFFLOAD_TEST_VAR".to_string(), "+env".to_string());
        let result = DryRunValidator::default().validate(&generated, &output_hash(b"inside+env"));
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn output_beyond_memory_limit_still_matches() {
        let temp = tempfile::tempdir().expect("tempdir");
        let body = "0123456789".repeat(200);
        std::fs::write(temp.path().join("big.txt"), &body).expect("write");
        let validator = DryRunValidator::from_config(&DryRunConfig {
            output_limit_bytes: 64,
            ..DryRunConfig::default()
        });

        let result = validator.validate(&script("cat big.txt", temp.path()), &output_hash(body.as_bytes()));
        assert!(result.passed, "{:?}", result.failure_reason);

        let result = validator.validate(
            &script("cat big.txt", temp.path()),
            &output_hash(&body.as_bytes()[..64]),
        );
        assert_eq!(result.failure_kind, Some(FailureKind::HashMismatch));
    }

    #[test]
    fn background_job_does_not_outlive_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut generated = script("sleep 8 &\nprintf hi", temp.path());
        generated.timeout_ms = 1_000;
        let started = std::time::Instant::now();
        let result = DryRunValidator::default().validate(&generated, &output_hash(b"hi"));
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn invalid_script_short_circuits() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut generated = script("", temp.path());
        generated.is_valid = false;
        generated.invalid_reason = Some("no generation strategy for tool 'Task'".to_string());
        let result = DryRunValidator::default().validate(&generated, "abc");
        assert!(!result.passed);
        assert_eq!(result.failure_kind, Some(FailureKind::Invalid));
        assert_eq!(result.exit_code, None);
        assert!(result.failure_reason.expect("reason").contains("unsupported"));
    }

    #[test]
    fn timeout_is_exit_code_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut generated = script("sleep 5", temp.path());
        generated.timeout_ms = 200;
        let result = DryRunValidator::default().validate(&generated, "abc");
        assert!(!result.passed);
        assert_eq!(result.failure_kind, Some(FailureKind::ExitCode));
        assert!(result.duration_ms < 5_000);
    }

    #[test]
    fn missing_working_dir_is_exit_code_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let generated = script("true", &temp.path().join("gone"));
        let result = DryRunValidator::default().validate(&generated, "abc");
        assert!(!result.passed);
        assert_eq!(result.failure_kind, Some(FailureKind::ExitCode));
    }
}
