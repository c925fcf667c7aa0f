//! `vimd build` command implementation.

use std::path::{Path, PathBuf};

use clap::Args;

use crate::convert::{Converter, MarkdownConverter};
use crate::error::CliError;
use crate::output::Output;

/// Arguments for the build command.
#[derive(Args)]
pub(crate) struct BuildArgs {
    /// Markdown file to convert.
    file: PathBuf,

    /// Output HTML file (default: `<name>.html` next to the source).
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl BuildArgs {
    /// Execute the build command.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is missing, the output would replace
    /// the source, or conversion fails.
    pub(crate) fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        output.info("Building HTML...");

        let source = std::path::absolute(&self.file)?;
        if !source.is_file() {
            return Err(CliError::SourceNotFound(self.file));
        }
        let target = match self.output {
            Some(path) => std::path::absolute(path)?,
            None => default_output(&source),
        };
        output.info(&format!("Output: {}", target.display()));

        build(&MarkdownConverter, &source, &target)?;
        output.success(&format!("Build complete: {}", target.display()));
        Ok(())
    }
}

/// `<stem>.html` in the source's directory.
fn default_output(source: &Path) -> PathBuf {
    source.with_extension("html")
}

/// Write the standalone page for `source` to `target`.
fn build(converter: &dyn Converter, source: &Path, target: &Path) -> Result<(), CliError> {
    if target == source {
        return Err(CliError::OutputIsSource(target.to_path_buf()));
    }
    converter.convert_to_file(source, target)?;
    tracing::info!(source = %source.display(), target = %target.display(), "Built page");
    Ok(())
}
