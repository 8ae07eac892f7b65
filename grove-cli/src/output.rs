//! Output formatting abstraction for text vs JSON rendering
//!
//! All subcommand output flows through [`OutputWriter`], which keeps
//! format switching out of the command handlers.

use std::io::Write;

use serde::Serialize;

use crate::cli::OutputFormat;
use crate::error::CliError;

/// Writes command payloads to stdout in the selected format.
pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Render a payload to stdout.
    pub fn render<T: Render + Serialize>(&self, payload: &T) -> Result<(), CliError> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        self.render_to(&mut handle, payload)
    }

    /// Render a payload to an arbitrary writer.
    ///
    /// `Text` delegates to [`Render::render_text`]; `Json` serialises via `serde_json`.
    pub fn render_to<T: Render + Serialize>(
        &self,
        w: &mut dyn Write,
        payload: &T,
    ) -> Result<(), CliError> {
        match self.format {
            OutputFormat::Text => payload.render_text(w)?,
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut *w, payload)?;
                writeln!(w)?;
            }
        }
        Ok(())
    }
}

/// Human-readable text rendering.
///
/// Implemented by every CLI output payload alongside `serde::Serialize`.
pub trait Render {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::install::InstallReport;

    fn report() -> InstallReport {
        InstallReport {
            command: "install".to_owned(),
            dry_run: false,
            packages: 3,
            added: vec!["node_modules/left-pad".to_owned()],
            removed: Vec::new(),
            changed: vec!["node_modules/chalk".to_owned()],
            failed: Vec::new(),
            skipped: Vec::new(),
            problems: Vec::new(),
            scripts: 0,
            fetched_bytes: 2048,
            cache_hits: 1,
        }
    }

    #[test]
    fn test_render_to_text() {
        let writer = OutputWriter::new(OutputFormat::Text);
        let mut buffer = Vec::new();
        writer
            .render_to(&mut buffer, &report())
            .expect("text rendering should succeed");

        let output = String::from_utf8(buffer).expect("valid UTF-8");
        assert!(output.contains("node_modules/left-pad"));
        assert!(output.contains("node_modules/chalk"));
        assert!(output.contains("added 1, removed 0, changed 1; 3 packages in tree"));
        assert!(output.contains("fetched 2048 bytes, 1 cache hits"));
    }

    #[test]
    fn test_render_to_json() {
        let writer = OutputWriter::new(OutputFormat::Json);
        let mut buffer = Vec::new();
        writer
            .render_to(&mut buffer, &report())
            .expect("json rendering should succeed");

        let output = String::from_utf8(buffer).expect("valid UTF-8");
        assert!(output.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(&output).expect("valid JSON");
        assert_eq!(parsed["command"].as_str(), Some("install"));
        assert_eq!(parsed["dryRun"].as_bool(), Some(false));
        assert_eq!(parsed["added"][0].as_str(), Some("node_modules/left-pad"));
        assert_eq!(parsed["fetchedBytes"].as_u64(), Some(2048));
    }
}
