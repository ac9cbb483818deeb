//! Run summary output
//!
//! Renders the outcome of a run as a human readable block or as JSON.

use anyhow::{Context, Result};
use serde::Serialize;
use sim_hook_bridge::{FixInfo, InterpreterStats, RunSummary};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::config::OutputFormat;

#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub summary: &'a RunSummary,
    pub fixes: Vec<FixInfo>,
    pub interpreter: InterpreterStats,
}

impl Report<'_> {
    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Text => Ok(self.render_text()),
            OutputFormat::Json => {
                serde_json::to_string_pretty(self).context("Failed to serialize run summary")
            }
        }
    }

    fn render_text(&self) -> String {
        let summary = self.summary;
        let elapsed = summary.finished_at - summary.started_at;
        let mut out = String::new();

        // Writing into a String cannot fail
        let _ = writeln!(out, "═══════════════════════════════════════════════");
        let _ = writeln!(out, "  Run Summary");
        let _ = writeln!(out, "═══════════════════════════════════════════════");
        let _ = writeln!(
            out,
            "  Started:    {}",
            summary.started_at.format("%Y-%m-%d %H:%M:%S%.3f UTC")
        );
        let _ = writeln!(out, "  Elapsed:    {} ms", elapsed.num_milliseconds());
        let _ = writeln!(out, "  Steps run:  {}", summary.steps_run);
        let _ = writeln!(out, "  Final step: {}", summary.final_step);
        let _ = writeln!(out, "  Final time: {:.6}", summary.final_time);

        let _ = writeln!(out, "\nFixes:");
        if self.fixes.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for fix in &self.fixes {
            let _ = writeln!(out, "  {:<16} {:<12} {}", fix.id, fix.hook, fix.callback);
        }

        let _ = writeln!(out, "\nCallback calls:");
        let _ = writeln!(out, "  post_force:  {}", summary.post_force_calls);
        let _ = writeln!(out, "  end_of_step: {}", summary.end_of_step_calls);

        if !summary.counters.is_empty() {
            let _ = writeln!(out, "\nCounters:");
            for (name, value) in &summary.counters {
                let _ = writeln!(out, "  {:<16} {}", name, value);
            }
        }

        let _ = writeln!(out, "\nInterpreter:");
        let _ = writeln!(out, "  resolutions:        {}", self.interpreter.resolutions);
        let _ = writeln!(out, "  invocations:        {}", self.interpreter.invocations);
        let _ = writeln!(out, "  failed invocations: {}", self.interpreter.failed_invocations);
        let _ = writeln!(out, "  gate acquisitions:  {}", self.interpreter.gate_acquisitions);

        out
    }
}

/// Write the rendered report to `output`, or stdout when none is given
pub fn emit(rendered: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("Failed to write summary to {:?}", path))?;
            log::info!("Summary written to {:?}", path);
        }
        None => print!("{}", rendered),
    }
    Ok(())
}
