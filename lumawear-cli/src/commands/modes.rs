//! Mode push and pull command implementations.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use console::style;
use lumawear::ModeTransfer;

use super::{map_cancelled, open_session, wait_for_banner};
use crate::config::Config;
use crate::{Cli, CliError};

pub(crate) fn cmd_push(
    cli: &Cli,
    config: &mut Config,
    files: &[PathBuf],
    start_slot: u8,
) -> Result<()> {
    let mut slots = Vec::with_capacity(files.len());
    for (offset, file) in files.iter().enumerate() {
        let payload = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
        if payload.is_empty() {
            return Err(CliError::Usage(format!("{} is empty", file.display())).into());
        }

        let slot = u8::try_from(offset)
            .ok()
            .and_then(|o| start_slot.checked_add(o))
            .ok_or_else(|| CliError::Usage("slot index overflows 255".to_string()))?;
        slots.push((slot, payload));
    }

    let session = open_session(cli, config)?;
    wait_for_banner(&session, cli.quiet);

    ModeTransfer::new(&session)
        .push(&slots, |done, total| {
            if !cli.quiet {
                eprintln!("  {} slot {done}/{total} stored", style("✓").green());
            }
        })
        .map_err(|e| map_cancelled(e, "mode push"))?;

    if !cli.quiet {
        eprintln!("{} pushed {} mode(s)", style("✓").green(), slots.len());
    }
    Ok(())
}

pub(crate) fn cmd_pull(cli: &Cli, config: &mut Config, slots: &[u8], out: &Path) -> Result<()> {
    let session = open_session(cli, config)?;
    wait_for_banner(&session, cli.quiet);

    let payloads = ModeTransfer::new(&session)
        .pull(slots, |_, _| {})
        .map_err(|e| map_cancelled(e, "mode pull"))?;

    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    for (slot, payload) in slots.iter().zip(&payloads) {
        let path = out.join(format!("mode-{slot}.bin"));
        fs::write(&path, payload).with_context(|| format!("writing {}", path.display()))?;
        if !cli.quiet {
            eprintln!(
                "{} slot {slot} -> {} ({} bytes)",
                style("✓").green(),
                path.display(),
                payload.len()
            );
        }
    }
    Ok(())
}
