//! List command implementation.

use anyhow::Result;
use lumawear::discover_ports;
use lumawear::host::format_port_list;

pub(crate) fn cmd_list(json: bool) -> Result<()> {
    let ports = discover_ports();

    if json {
        let entries: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "bridge": p.bridge.name(),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if ports.is_empty() {
        eprintln!("no serial ports found");
        return Ok(());
    }
    for line in format_port_list(&ports) {
        println!("{line}");
    }
    Ok(())
}
