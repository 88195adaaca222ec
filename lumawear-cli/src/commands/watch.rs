//! Watch command: print badge session transitions as they happen.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use console::style;
use lumawear::{DeviceSession, SessionEvents};

use super::open_channel;
use crate::Cli;
use crate::config::Config;

struct PrintEvents;

impl SessionEvents for PrintEvents {
    fn session_changed(&self, active: bool) {
        if active {
            eprintln!("{} badge session active", style("●").green());
        } else {
            eprintln!("{} badge session inactive", style("○").yellow());
        }
    }
}

pub(crate) fn cmd_watch(cli: &Cli, config: &mut Config) -> Result<()> {
    let channel = open_channel(cli, config)?;
    let session = DeviceSession::with_events(channel, Box::new(PrintEvents));
    session.listen();

    if !cli.quiet {
        eprintln!("{} watching; Ctrl-C to stop", style("→").cyan());
    }

    while !crate::was_interrupted() {
        if !session.is_connected() {
            eprintln!("{} transport closed", style("✗").red());
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }

    session.disconnect();
    Ok(())
}
