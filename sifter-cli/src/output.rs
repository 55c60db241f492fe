//! Output formatting for the run summary and plugin listing
//!
//! Result records go through output connectors. Everything the CLI itself
//! prints flows through [`OutputWriter`], which writes to stderr so that
//! records on stdout are never interleaved with human-oriented text.

use std::io::Write;

use colored::Colorize;
use serde::Serialize;

use sifter_core::plugin::{PluginInfo, PluginType};
use sifter_dispatch::RunStats;

use crate::cli::OutputFormat;
use crate::error::CliError;

/// Abstraction for writing CLI output in different formats.
pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Render a payload to stderr.
    pub fn render<T: Render + Serialize>(&self, payload: &T) -> Result<(), CliError> {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        self.render_to(payload, &mut handle)
    }

    /// Render a payload to an arbitrary writer.
    pub fn render_to<T: Render + Serialize>(
        &self,
        payload: &T,
        w: &mut dyn Write,
    ) -> Result<(), CliError> {
        match self.format {
            OutputFormat::Text => {
                payload.render_text(w)?;
            }
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut *w, payload)?;
                writeln!(w)?;
            }
        }
        Ok(())
    }
}

/// Trait for human-readable text rendering.
pub trait Render {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()>;
}

// ---- run summary ----

/// Summary of one `sifter` run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub source: String,
    pub elapsed_ms: u128,
    #[serde(flatten)]
    pub stats: RunStats,
}

impl RunSummary {
    /// True when some payload ended in a final failure.
    pub fn has_failures(&self) -> bool {
        self.stats.unmatched > 0 || self.stats.queued > 0 || self.stats.delivery_failures > 0
    }
}

impl Render for RunSummary {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        let s = &self.stats;
        writeln!(
            w,
            "Run Summary (source: {}, {} ms)",
            self.source.bold(),
            self.elapsed_ms
        )?;
        writeln!(
            w,
            "  Payloads:   {} ingested, {} processed",
            s.ingested.to_string().bold(),
            s.processed
        )?;
        writeln!(
            w,
            "  Plugins:    {} succeeded, {} failed, {} skipped",
            s.succeeded.to_string().green(),
            count_or_red(s.failed),
            s.skipped.to_string().yellow()
        )?;
        writeln!(
            w,
            "  Dispatch:   {} unmatched, {} dropped, {} rate limited",
            count_or_red(s.unmatched),
            s.dropped,
            s.rate_limited
        )?;
        writeln!(
            w,
            "  Delivery:   {} records, {} failures, {} archived",
            s.delivered.to_string().green(),
            count_or_red(s.delivery_failures),
            s.archived
        )?;
        if s.queued > 0 {
            writeln!(
                w,
                "  Error queue: {} request(s) queued for reprocessing",
                s.queued.to_string().red().bold()
            )?;
        }
        Ok(())
    }
}

fn count_or_red(count: usize) -> colored::ColoredString {
    if count > 0 {
        count.to_string().red()
    } else {
        count.to_string().normal()
    }
}

// ---- plugin listing ----

/// Registered plugins, in registration order.
#[derive(Debug, Serialize)]
pub struct PluginList {
    pub plugins: Vec<PluginInfo>,
}

impl Render for PluginList {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Plugins: {}", self.plugins.len().to_string().bold())?;
        writeln!(w, "{:<12} {:<10} DESCRIPTION", "NAME", "TYPE")?;
        for info in &self.plugins {
            let kind = match info.plugin_type {
                PluginType::Source => "source".cyan(),
                PluginType::Worker => "worker".green(),
                PluginType::Connector => "connector".blue(),
                PluginType::Archive => "archive".magenta(),
            };
            writeln!(w, "{:<12} {:<10} {}", info.name, kind, info.description)?;
        }
        Ok(())
    }
}
