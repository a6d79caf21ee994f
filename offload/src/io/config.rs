//! Offload configuration stored under `.offload/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::determinism::AnalysisConfig;
use crate::core::promotion::PromotionConfig;
use crate::core::rate_limit::RateLimitConfig;

pub const DEFAULT_CONFIG_PATH: &str = ".offload/config.toml";

/// Offload configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OffloadConfig {
    pub analysis: AnalysisConfig,
    /// Read by `Recorder::from_config` on the capture path.
    pub rate_limit: RateLimitConfig,
    /// Read by `consolidate_observations` on the observation path.
    pub promotion: PromotionConfig,
    pub dry_run: DryRunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DryRunConfig {
    /// Wall-clock budget per dry run before the script is killed.
    pub timeout_secs: u64,

    /// Stdout/stderr beyond this many bytes is drained but not kept.
    pub output_limit_bytes: usize,

    /// Directory scripts run in. Defaults to the current directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            output_limit_bytes: 1_000_000,
            working_dir: None,
        }
    }
}

impl DryRunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl OffloadConfig {
    pub fn validate(&self) -> Result<()> {
        let analysis = &self.analysis;
        if analysis.min_sample_size == 0 {
            return Err(anyhow!("analysis.min_sample_size must be > 0"));
        }
        for (name, value) in [
            ("analysis.deterministic_threshold", analysis.deterministic_threshold),
            (
                "analysis.semi_deterministic_threshold",
                analysis.semi_deterministic_threshold,
            ),
            ("analysis.min_confidence", analysis.min_confidence),
            ("promotion.min_score", self.promotion.min_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{name} must be within [0, 1], got {value}"));
            }
        }
        if analysis.semi_deterministic_threshold > analysis.deterministic_threshold {
            return Err(anyhow!(
                "analysis.semi_deterministic_threshold must not exceed deterministic_threshold"
            ));
        }
        if self.rate_limit.max_per_session == 0 {
            return Err(anyhow!("rate_limit.max_per_session must be > 0"));
        }
        if self.rate_limit.max_per_hour == 0 {
            return Err(anyhow!("rate_limit.max_per_hour must be > 0"));
        }
        if self.dry_run.timeout_secs == 0 {
            return Err(anyhow!("dry_run.timeout_secs must be > 0"));
        }
        if self.dry_run.output_limit_bytes == 0 {
            return Err(anyhow!("dry_run.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OffloadConfig::default()`.
pub fn load_config(path: &Path) -> Result<OffloadConfig> {
    if !path.exists() {
        let cfg = OffloadConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OffloadConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OffloadConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, OffloadConfig::default());
        assert_eq!(cfg.rate_limit.max_per_session, 50);
        assert_eq!(cfg.rate_limit.max_per_hour, 200);
        assert_eq!(cfg.promotion.min_score, 0.3);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("config.toml");
        let mut cfg = OffloadConfig::default();
        cfg.dry_run.working_dir = Some(temp.path().to_path_buf());
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[analysis]\nmin_sample_size = 5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.analysis.min_sample_size, 5);
        assert_eq!(cfg.analysis.deterministic_threshold, 0.95);
        assert_eq!(cfg.dry_run, DryRunConfig::default());
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut cfg = OffloadConfig::default();
        cfg.analysis.semi_deterministic_threshold = 0.99;
        let err = cfg.validate().expect_err("invalid");
        assert!(err.to_string().contains("semi_deterministic_threshold"));
    }

    #[test]
    fn rejects_out_of_range_and_zero_values() {
        let mut cfg = OffloadConfig::default();
        cfg.promotion.min_score = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = OffloadConfig::default();
        cfg.dry_run.timeout_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = OffloadConfig::default();
        cfg.rate_limit.max_per_hour = 0;
        assert!(cfg.validate().is_err());
    }
}
