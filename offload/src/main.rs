//! Deterministic tool-call offloading CLI.
//!
//! Reads the execution log (`.offload/executions.jsonl`), classifies
//! operations by output determinism, and emits verified replacement scripts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use offload::core::determinism::DeterminismAnalyzer;
use offload::core::script::ScriptGenerator;
use offload::exit_codes;
use offload::io::config::{DEFAULT_CONFIG_PATH, OffloadConfig, load_config, write_config};
use offload::io::dry_run::DryRunValidator;
use offload::io::execution_log::{DEFAULT_LOG_PATH, read_corpus, scan_log};
use offload::plan::{build_plan, verify_plan};

#[derive(Parser)]
#[command(
    name = "offload",
    version,
    about = "Find deterministic tool calls and verify cached replacements"
)]
struct Cli {
    /// Config file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify every sufficiently sampled operation by output determinism.
    Analyze {
        #[arg(long, default_value = DEFAULT_LOG_PATH)]
        log: PathBuf,
    },
    /// Score candidates and generate replacement scripts.
    Plan {
        #[arg(long, default_value = DEFAULT_LOG_PATH)]
        log: PathBuf,
        /// Execute each script and compare its output with the recording.
        #[arg(long)]
        dry_run: bool,
    },
    /// Verify shape and checksum of every log line.
    CheckLog {
        #[arg(long, default_value = DEFAULT_LOG_PATH)]
        log: PathBuf,
    },
    /// Write the default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    offload::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Analyze { log } => cmd_analyze(&load_config(&cli.config)?, &log),
        Command::Plan { log, dry_run } => cmd_plan(&load_config(&cli.config)?, &log, dry_run),
        Command::CheckLog { log } => cmd_check_log(&log),
        Command::InitConfig { force } => cmd_init_config(&cli.config, force),
    }
}

fn cmd_analyze(cfg: &OffloadConfig, log: &Path) -> Result<i32> {
    let corpus = read_corpus(log)?;
    report_skipped(corpus.skipped.len());
    let analyzer = DeterminismAnalyzer::new(cfg.analysis);
    let classified = analyzer.classify(&analyzer.analyze(&corpus.batches));
    print_json(&classified)?;
    Ok(exit_codes::OK)
}

fn cmd_plan(cfg: &OffloadConfig, log: &Path, dry_run: bool) -> Result<i32> {
    let corpus = read_corpus(log)?;
    report_skipped(corpus.skipped.len());

    let working_dir = match &cfg.dry_run.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let generator = ScriptGenerator::new(working_dir, cfg.dry_run.timeout());
    let mut plan = build_plan(&corpus.batches, &cfg.analysis, &generator);

    if !dry_run {
        print_json(&plan)?;
        return Ok(exit_codes::OK);
    }

    verify_plan(&mut plan, &DryRunValidator::from_config(&cfg.dry_run));
    print_json(&plan)?;
    if plan.entries.iter().all(|entry| entry.verified()) {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::UNVERIFIED)
    }
}

fn cmd_check_log(log: &Path) -> Result<i32> {
    let scan = scan_log(log)?;
    #[derive(Serialize)]
    struct CheckReport<'a> {
        valid: usize,
        skipped: &'a [offload::io::execution_log::SkippedLine],
    }
    print_json(&CheckReport {
        valid: scan.entries.len(),
        skipped: &scan.skipped,
    })?;
    if scan.skipped.is_empty() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::UNVERIFIED)
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &OffloadConfig::default())?;
    Ok(exit_codes::OK)
}

fn report_skipped(skipped: usize) {
    if skipped > 0 {
        eprintln!("warning: skipped {skipped} damaged log entries (run `offload check-log`)");
    }
}

/// Print `value` as pretty JSON to stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
