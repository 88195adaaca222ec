//! Command implementations.
//!
//! Each subcommand lives in its own module; shared session plumbing sits
//! here.

pub(crate) mod completions;
pub(crate) mod flash;
pub(crate) mod list;
pub(crate) mod modes;
pub(crate) mod watch;

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use console::style;
use lumawear::{DeviceSession, TransportChannel};

use crate::config::Config;
use crate::serial::{ask_remember_endpoint, select_endpoint};
use crate::{Cli, CliError};

/// How long to wait for the badge reset banner before proceeding anyway.
const BANNER_WAIT: Duration = Duration::from_secs(3);

/// Open the transport channel for the selected endpoint.
pub(crate) fn open_channel(cli: &Cli, config: &mut Config) -> Result<TransportChannel> {
    let endpoint = select_endpoint(cli, config)?;

    let mut channel = TransportChannel::new();
    channel
        .connect(&endpoint)
        .with_context(|| format!("opening {endpoint}"))?;

    if cli.port.is_none() {
        ask_remember_endpoint(cli, config, &endpoint);
    }
    if !cli.quiet {
        eprintln!("{} connected to {endpoint}", style("→").cyan());
    }
    Ok(channel)
}

/// Open a session over the selected endpoint.
pub(crate) fn open_session(cli: &Cli, config: &mut Config) -> Result<DeviceSession> {
    Ok(DeviceSession::new(open_channel(cli, config)?))
}

/// Give the badge a moment to print its reset banner.
///
/// The listener consumes the banner so the directed exchange that follows
/// starts on a clean channel. A silent badge is not fatal; it may already
/// be sitting in its bootloader.
pub(crate) fn wait_for_banner(session: &DeviceSession, quiet: bool) {
    session.listen();

    let start = Instant::now();
    while start.elapsed() < BANNER_WAIT {
        if session.is_active() || crate::was_interrupted() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }

    if !quiet {
        eprintln!(
            "{} no badge banner seen; continuing anyway",
            style("!").yellow()
        );
    }
}

/// Map a library error to the right CLI error class.
pub(crate) fn map_cancelled(err: lumawear::Error, what: &str) -> anyhow::Error {
    match err {
        lumawear::Error::Cancelled => CliError::Cancelled(format!("{what} interrupted")).into(),
        e => anyhow::Error::new(e).context(format!("{what} failed")),
    }
}
