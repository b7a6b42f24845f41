//! Device catalog snapshots
//!
//! A snapshot is the ordered device list returned by one enumeration. Ports
//! are addressed by a flattened ordinal: the concatenation of every device's
//! counted ports, device order first, then ascending port index. Ordinals are
//! only meaningful against the snapshot that produced them.

use serde::{Deserialize, Serialize};

use crate::types::Direction;

/// Highest number of ports counted per device and direction
pub const MAX_PORTS_PER_DEVICE: usize = 16;

/// One enumerated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Opaque backend key used to open the device
    pub id: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    /// Ports the device accepts data on (we transmit into these)
    pub input_ports: usize,
    /// Ports the device emits data on (we receive from these)
    pub output_ports: usize,
}

impl DeviceDescriptor {
    /// Human-readable description: `manufacturer - product`, trimmed, with
    /// `|` removed so the text can sit inside `|`-separated lists. A missing
    /// side counts as empty; with neither present the device is `Unknown`.
    pub fn description(&self) -> String {
        if self.manufacturer.is_none() && self.product.is_none() {
            return "Unknown".to_string();
        }
        let manufacturer = self.manufacturer.as_deref().unwrap_or("").trim();
        let product = self.product.as_deref().unwrap_or("").trim();

        format!("{} - {}", manufacturer, product).replace('|', "")
    }

    /// Port count relevant to `basis`, clamped to [`MAX_PORTS_PER_DEVICE`]
    pub fn ports(&self, basis: Direction) -> usize {
        let raw = match basis {
            Direction::Rx => self.output_ports,
            Direction::Tx => self.input_ports,
        };
        raw.min(MAX_PORTS_PER_DEVICE)
    }
}

/// Which per-device port count resolves an ordinal when opening a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortCounting {
    /// RX counts device output ports, TX counts device input ports, both when
    /// listing and when opening.
    #[default]
    DeviceDirection,
    /// Listing counts as above but opening uses the opposite count.
    Legacy,
}

impl PortCounting {
    /// Basis used to resolve an ordinal when opening a `direction` slot
    pub fn open_basis(self, direction: Direction) -> Direction {
        match self {
            PortCounting::DeviceDirection => direction,
            PortCounting::Legacy => direction.flip(),
        }
    }
}

/// A device and a port on it, resolved from an ordinal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRef {
    /// Position of the device within the snapshot
    pub device: usize,
    /// Port index on that device
    pub port: usize,
}

/// Point-in-time capture of the devices available in one direction
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    direction: Direction,
    devices: Vec<DeviceDescriptor>,
}

impl CatalogSnapshot {
    pub fn new(direction: Direction, devices: Vec<DeviceDescriptor>) -> Self {
        Self { direction, devices }
    }

    pub fn empty(direction: Direction) -> Self {
        Self::new(direction, Vec::new())
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn device(&self, index: usize) -> Option<&DeviceDescriptor> {
        self.devices.get(index)
    }

    /// Total ports counted with `basis`
    pub fn port_count(&self, basis: Direction) -> usize {
        self.devices.iter().map(|d| d.ports(basis)).sum()
    }

    /// Resolve a flattened ordinal against this snapshot
    pub fn resolve(&self, ordinal: u32, basis: Direction) -> Option<PortRef> {
        let mut remaining = ordinal as usize;
        for (device, descriptor) in self.devices.iter().enumerate() {
            let ports = descriptor.ports(basis);
            if remaining < ports {
                return Some(PortRef {
                    device,
                    port: remaining,
                });
            }
            remaining -= ports;
        }
        None
    }

    /// One description per counted port, in ordinal order
    pub fn descriptions(&self, basis: Direction) -> impl Iterator<Item = String> + '_ {
        self.devices.iter().flat_map(move |d| {
            let text = d.description();
            std::iter::repeat(text).take(d.ports(basis))
        })
    }

    /// Port names made unique: any `#` suffix is stripped, then repeats get
    /// `#1`, `#2`, ... appended in ordinal order.
    pub fn unique_port_names(&self, basis: Direction) -> Vec<String> {
        let base: Vec<String> = self
            .descriptions(basis)
            .map(|name| match name.find('#') {
                Some(pos) => name[..pos].to_string(),
                None => name,
            })
            .collect();

        let mut seen: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        base.iter()
            .map(|name| {
                let count = seen.entry(name.as_str()).or_insert(0);
                let unique = if *count == 0 {
                    name.clone()
                } else {
                    format!("{}#{}", name, count)
                };
                *count += 1;
                unique
            })
            .collect()
    }
}
