//! Flash command implementation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use lumawear::{CHUNK_SIZE, FirmwareUpdate};

use super::{map_cancelled, open_session, wait_for_banner};
use crate::config::Config;
use crate::{Cli, CliError};

pub(crate) fn cmd_flash(cli: &Cli, config: &mut Config, image_path: &Path) -> Result<()> {
    let image = fs::read(image_path)
        .with_context(|| format!("reading firmware image {}", image_path.display()))?;
    if image.is_empty() {
        return Err(CliError::Usage(format!("{} is empty", image_path.display())).into());
    }

    let total_chunks = image.len().div_ceil(CHUNK_SIZE);
    if !cli.quiet {
        eprintln!(
            "{} {} ({} bytes, {} chunks)",
            style("→").cyan(),
            image_path.display(),
            image.len(),
            total_chunks
        );
    }

    let session = open_session(cli, config)?;
    wait_for_banner(&session, cli.quiet);

    let bar = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(total_chunks as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} chunks",
            )?
            .progress_chars("#>-"),
        );
        bar
    };

    let result = FirmwareUpdate::new(&session).flash(&image, |sent, _total| {
        bar.set_position(sent as u64);
    });
    bar.finish_and_clear();
    result.map_err(|e| map_cancelled(e, "firmware transfer"))?;

    if !cli.quiet {
        eprintln!("{} firmware flashed", style("✓").green());
    }
    Ok(())
}
