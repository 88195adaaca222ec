//! Host-side serial port discovery and badge classification.
//!
//! Badges do not expose their own USB identity; they sit behind a USB-UART
//! bridge on the dock PCB. rev1 docks carry a CH340, rev2 a CP210x, so
//! discovery classifies bridges by VID/PID and prefers those two during
//! auto-selection.

use crate::error::{Error, Result};
use log::{debug, info, trace};

/// Known USB-UART bridge kinds found on badge docks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    /// CH340/CH341 (rev1 docks).
    Ch340,
    /// Silicon Labs CP210x (rev2 docks).
    Cp210x,
    /// FTDI FT232-family.
    Ftdi,
    /// Prolific PL2303.
    Prolific,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs for common USB-to-UART bridges.
const KNOWN_BRIDGES: &[(u16, &[u16], BridgeKind)] = &[
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        BridgeKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], BridgeKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        BridgeKind::Ftdi,
    ),
    (
        0x067B,
        &[0x2303, 0x23A3, 0x23C3, 0x23D3],
        BridgeKind::Prolific,
    ),
];

impl BridgeKind {
    /// Classify a VID/PID combination.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, bridge) in KNOWN_BRIDGES {
            if vid == *known_vid && pids.contains(&pid) {
                return *bridge;
            }
        }
        Self::Unknown
    }

    /// Human-readable name for the bridge kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether this is a known bridge kind.
    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Whether this bridge kind ships on a badge dock revision.
    #[must_use]
    pub fn is_dock_bridge(&self) -> bool {
        matches!(self, Self::Ch340 | Self::Cp210x)
    }
}

/// Discovered serial endpoint information.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    /// Endpoint name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Classified bridge kind.
    pub bridge: BridgeKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Whether this endpoint is plausibly a docked badge.
    #[must_use]
    pub fn is_likely_badge(&self) -> bool {
        self.bridge.is_known()
    }
}

/// Detect all available serial endpoints with metadata.
#[must_use]
pub fn discover_ports() -> Vec<DetectedPort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut detected = DetectedPort {
                    name: port_info.port_name.clone(),
                    bridge: BridgeKind::Unknown,
                    vid: None,
                    pid: None,
                    manufacturer: None,
                    product: None,
                    serial: None,
                };

                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    detected.vid = Some(usb_info.vid);
                    detected.pid = Some(usb_info.pid);
                    detected.manufacturer = usb_info.manufacturer;
                    detected.product = usb_info.product;
                    detected.serial = usb_info.serial_number;
                    detected.bridge = BridgeKind::from_vid_pid(usb_info.vid, usb_info.pid);

                    trace!(
                        "found USB port: {} (VID: {:04X}, PID: {:04X}, bridge: {:?})",
                        port_info.port_name, usb_info.vid, usb_info.pid, detected.bridge
                    );
                }

                result.push(detected);
            }
        }
        Err(e) => {
            debug!("failed to enumerate serial ports: {e}");
        }
    }

    result
}

/// Auto-detect a single badge endpoint candidate.
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = discover_ports();

    if let Some(port) = ports.iter().find(|p| p.bridge.is_dock_bridge()) {
        info!(
            "auto-detected {} dock bridge: {}",
            port.bridge.name(),
            port.name
        );
        return Ok(port.clone());
    }

    if let Some(port) = ports.iter().find(|p| p.bridge.is_known()) {
        info!(
            "auto-detected {} USB-UART bridge: {}",
            port.bridge.name(),
            port.name
        );
        return Ok(port.clone());
    }

    if let Some(port) = ports.into_iter().next() {
        info!("using first available port: {}", port.name);
        return Ok(port);
    }

    Err(Error::DeviceNotFound)
}

/// Find an endpoint by name pattern.
pub fn find_port_by_pattern(pattern: &str) -> Result<DetectedPort> {
    discover_ports()
        .into_iter()
        .find(|p| p.name.contains(pattern))
        .ok_or(Error::DeviceNotFound)
}

/// Format a list of detected endpoints for display.
#[must_use]
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    let mut result = Vec::new();

    for port in ports {
        let bridge_info = if port.bridge.is_known() {
            format!(" [{}]", port.bridge.name())
        } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };

        let product_info = port
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        result.push(format!("{}{}{}", port.name, bridge_info, product_info));
    }

    result
}
