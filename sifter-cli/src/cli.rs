//! CLI argument parsing using clap derive API
//!
//! Every flag is optional and only overrides the value loaded from
//! `sifter.toml` (and `SIFTER_*` environment variables) when given.
//! [`Cli::apply`] folds the parsed flags into a [`SifterConfig`].

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use sifter_core::config::SifterConfig;

/// Sifter -- rule-driven payload dispatch and recursive processing.
///
/// Payloads are read by a source plugin, routed to worker plugins, and the
/// combined results are written to the configured output connectors.
#[derive(Parser, Debug)]
#[command(name = "sifter", version, about, long_about = None)]
pub struct Cli {
    /// Path to the sifter.toml configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level.
    #[arg(
        short = 'L',
        long,
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: Option<String>,

    /// Override log format.
    #[arg(long, value_parser = ["json", "pretty"])]
    pub log_format: Option<String>,

    /// Output template for result records.
    #[arg(short = 'T', long)]
    pub template: Option<Template>,

    /// Maximum number of concurrent plugin invocations.
    #[arg(short = 'M', long)]
    pub max_processes: Option<usize>,

    /// Maximum recursion depth for extracted payloads.
    #[arg(short = 'R', long)]
    pub max_recursion: Option<u32>,

    /// Output connector (repeatable).
    #[arg(short = 'C', long = "connector")]
    pub connectors: Vec<String>,

    /// Archive connector for extracted payloads.
    #[arg(short = 'A', long)]
    pub archive: Option<String>,

    /// Emit one record per plugin result instead of one combined record.
    #[arg(short = 'S', long)]
    pub split: bool,

    /// File or directory to ingest.
    #[arg(short = 'F', long)]
    pub file: Option<PathBuf>,

    /// Output file for the `file` connector.
    #[arg(short = 'O', long)]
    pub outfile: Option<PathBuf>,

    /// Source plugin name.
    #[arg(short = 'I', long)]
    pub ingest: Option<String>,

    /// Reprocess payloads recorded in the error queue (failures are queued again).
    #[arg(short = 'E', long)]
    pub errors: bool,

    /// Enable rule-based automatic dispatch.
    #[arg(short = 'D', long)]
    pub dispatch: bool,

    /// Dispatch rule file or directory.
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Default TLP classification for ingested payloads.
    #[arg(long, value_parser = ["white", "green", "amber", "red"])]
    pub tlp: Option<String>,

    /// Metadata attached to every payload, as key:value (repeatable).
    #[arg(long)]
    pub metadata: Vec<String>,

    /// Rate limit as count/seconds, e.g. 100/60.
    #[arg(long)]
    pub rate_limit: Option<String>,

    /// Record final failures in the error queue.
    #[arg(long)]
    pub queue_errors: bool,

    /// Error queue file (JSON Lines).
    #[arg(long)]
    pub error_queue: Option<PathBuf>,

    /// List the built-in plugins and exit.
    #[arg(long)]
    pub list_plugins: bool,

    /// Format of the run summary printed to stderr.
    #[arg(long, default_value = "text")]
    pub summary: OutputFormat,

    /// Worker plugins used when no dispatch rule matches.
    pub workers: Vec<String>,
}

/// Supported summary formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

/// Result record templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Template {
    /// Indented JSON.
    Json,
    /// One JSON object per line.
    Compact,
}

impl Template {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Compact => "compact",
        }
    }
}

impl Cli {
    /// Overrides `config` with every flag present on the command line.
    pub fn apply(&self, config: &mut SifterConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }

        if self.dispatch {
            config.dispatch.auto_dispatch = true;
        }
        if let Some(rules) = &self.rules {
            config.dispatch.rules_path = rules.display().to_string();
        }
        if !self.workers.is_empty() {
            config.dispatch.workers = self.workers.clone();
        }
        if let Some(max) = self.max_recursion {
            config.dispatch.max_recursion = max;
        }
        if let Some(max) = self.max_processes {
            config.dispatch.max_processes = max;
        }
        if let Some(limit) = &self.rate_limit {
            config.dispatch.rate_limit = limit.clone();
        }

        if let Some(template) = self.template {
            config.output.template = template.as_str().to_owned();
        }
        if !self.connectors.is_empty() {
            config.output.connectors = self.connectors.clone();
        }
        if let Some(archive) = &self.archive {
            config.output.archive = archive.clone();
        }
        if self.split {
            config.output.split = true;
        }
        if let Some(outfile) = &self.outfile {
            config.output.outfile = outfile.display().to_string();
        }

        if let Some(source) = &self.ingest {
            config.ingest.source = source.clone();
        }
        if let Some(path) = &self.file {
            config.ingest.path = path.display().to_string();
        }
        if self.errors {
            config.ingest.process_errors = true;
            config.error_queue.enabled = true;
        }
        if let Some(tlp) = &self.tlp {
            config.ingest.tlp = tlp.clone();
        }
        if !self.metadata.is_empty() {
            config.ingest.metadata = self.metadata.clone();
        }

        if self.queue_errors {
            config.error_queue.enabled = true;
        }
        if let Some(path) = &self.error_queue {
            config.error_queue.path = path.display().to_string();
        }
    }
}
