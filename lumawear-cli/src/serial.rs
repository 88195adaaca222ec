//! Interactive endpoint selection.
//!
//! Resolution order: explicit `--port`/environment, remembered config
//! endpoint, auto-detection, interactive prompt. Non-interactive mode
//! never prompts; ambiguity becomes a usage error (exit code 2) so CI
//! callers can branch on it.

use std::io::IsTerminal;

use anyhow::Result;
use console::style;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use log::debug;
use lumawear::host::format_port_list;
use lumawear::{DetectedPort, discover_ports};

use crate::config::Config;
use crate::{Cli, CliError};

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Resolve the endpoint to use for this invocation.
pub(crate) fn select_endpoint(cli: &Cli, config: &Config) -> Result<String> {
    if let Some(port) = &cli.port {
        return Ok(port.clone());
    }

    if let Some(endpoint) = &config.connection.endpoint {
        debug!("using endpoint from config: {endpoint}");
        return Ok(endpoint.clone());
    }

    let ports = discover_ports();
    if ports.is_empty() {
        return Err(usage_err(
            "no serial ports found; pass --port (or --port pipe:<path> for the simulator)",
        ));
    }

    // Prefer recognized dock bridges when any are present.
    let known: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| p.is_likely_badge())
        .cloned()
        .collect();
    let candidates = if known.is_empty() { ports } else { known };

    if candidates.len() == 1 {
        let port = &candidates[0];
        if !cli.quiet {
            eprintln!(
                "{} using {} [{}]",
                style("→").cyan(),
                port.name,
                port.bridge.name()
            );
        }
        return Ok(port.name.clone());
    }

    if cli.non_interactive || !std::io::stderr().is_terminal() {
        return Err(usage_err(
            "multiple candidate ports; pass --port to choose one",
        ));
    }

    let labels = format_port_list(&candidates);
    let picked = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select badge port")
        .items(&labels)
        .default(0)
        .interact()?;

    Ok(candidates[picked].name.clone())
}

/// Offer to remember an auto-selected endpoint in the global config.
pub(crate) fn ask_remember_endpoint(cli: &Cli, config: &mut Config, endpoint: &str) {
    if cli.non_interactive
        || cli.quiet
        || config.connection.endpoint.as_deref() == Some(endpoint)
        || !std::io::stderr().is_terminal()
    {
        return;
    }

    let remember = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {endpoint} as the default endpoint?"))
        .default(false)
        .interact()
        .unwrap_or(false);

    if remember {
        if let Err(e) = config.save_endpoint(endpoint) {
            debug!("failed to save config: {e}");
        }
    }
}
