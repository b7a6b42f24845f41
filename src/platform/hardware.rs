//! Hardware backend built on `midir`
//!
//! midir exposes flat port lists rather than devices, so ports sharing a
//! name are grouped into one device. midir input ports are the device's
//! output ports (we receive from them) and midir output ports are its input
//! ports (we send to them).

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::{debug, warn};

use super::{MidiPlatform, OpenCompletion, RxAdapter};
use crate::catalog::DeviceDescriptor;
use crate::error::{PlatformError, Result};
use crate::midi::format_hex;

/// Opened midir "device": the shared port name
#[derive(Debug, Clone)]
pub struct MidirDevice {
    name: String,
}

/// `MidiPlatform` backed by the system MIDI API through midir
pub struct MidirPlatform {
    client_name: String,
}

impl MidirPlatform {
    /// Create the backend and check that the system MIDI API is reachable
    pub fn new(client_name: impl Into<String>) -> Result<Self> {
        let client_name = client_name.into();
        // Probe both directions once so init failures surface on the init action
        MidiInput::new(&client_name)?;
        MidiOutput::new(&client_name)?;
        debug!("midir backend ready as '{}'", client_name);
        Ok(Self { client_name })
    }

    fn input_names(client_name: &str) -> Result<Vec<String>> {
        let midi_in = MidiInput::new(&format!("{}-scan", client_name))?;
        Ok(midi_in
            .ports()
            .iter()
            .filter_map(|p| midi_in.port_name(p).ok())
            .collect())
    }

    fn output_names(client_name: &str) -> Result<Vec<String>> {
        let midi_out = MidiOutput::new(&format!("{}-scan", client_name))?;
        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|p| midi_out.port_name(p).ok())
            .collect())
    }
}

fn device_position(devices: &mut Vec<DeviceDescriptor>, name: &str) -> usize {
    if let Some(pos) = devices.iter().position(|d| d.id == name) {
        return pos;
    }
    devices.push(DeviceDescriptor {
        id: name.to_string(),
        manufacturer: None,
        product: Some(name.to_string()),
        input_ports: 0,
        output_ports: 0,
    });
    devices.len() - 1
}

/// Group port names into devices, keeping first-seen order
fn group_devices(input_names: &[String], output_names: &[String]) -> Vec<DeviceDescriptor> {
    let mut devices = Vec::new();

    // midir inputs are what the device sends out
    for name in input_names {
        let pos = device_position(&mut devices, name);
        devices[pos].output_ports += 1;
    }
    for name in output_names {
        let pos = device_position(&mut devices, name);
        devices[pos].input_ports += 1;
    }

    devices
}

impl MidiPlatform for MidirPlatform {
    type Device = MidirDevice;
    type RxPort = MidiInputConnection<()>;
    type TxPort = MidiOutputConnection;

    fn enumerate_devices(&mut self) -> Result<Vec<DeviceDescriptor>> {
        let inputs = Self::input_names(&self.client_name)?;
        let outputs = Self::output_names(&self.client_name)?;
        let devices = group_devices(&inputs, &outputs);
        debug!(
            "Enumerated {} MIDI devices ({} in / {} out ports)",
            devices.len(),
            inputs.len(),
            outputs.len()
        );
        Ok(devices)
    }

    fn open_device_async(
        &mut self,
        descriptor: &DeviceDescriptor,
        completion: OpenCompletion<Self::Device>,
    ) {
        let name = descriptor.id.clone();
        let client_name = self.client_name.clone();

        // The completion is dropped (reporting failure) if the thread cannot start
        let spawned = std::thread::Builder::new()
            .name("midir-open".to_string())
            .spawn(move || {
                let present = Self::input_names(&client_name)
                    .map(|names| names.contains(&name))
                    .unwrap_or(false)
                    || Self::output_names(&client_name)
                        .map(|names| names.contains(&name))
                        .unwrap_or(false);

                if present {
                    completion.complete(Some(MidirDevice { name }));
                } else {
                    warn!("MIDI device '{}' disappeared before open", name);
                    completion.complete(None);
                }
            });

        if let Err(e) = spawned {
            warn!("Failed to spawn device open thread: {}", e);
        }
    }

    fn open_rx_port(
        &mut self,
        device: &mut Self::Device,
        port: usize,
        adapter: RxAdapter<Self::Device>,
    ) -> Result<Self::RxPort> {
        let mut midi_in = MidiInput::new(&self.client_name)?;
        midi_in.ignore(Ignore::None);

        let target = midi_in
            .ports()
            .into_iter()
            .filter(|p| midi_in.port_name(p).map(|n| n == device.name).unwrap_or(false))
            .nth(port)
            .ok_or_else(|| {
                PlatformError::Port(format!("'{}' has no output port {}", device.name, port))
            })?;

        let slot = adapter.slot();
        let connection = midi_in.connect(
            &target,
            &format!("{}-rx{}", self.client_name, slot),
            move |_timestamp, data, _| {
                tracing::trace!("RX slot {} <- {}", slot, format_hex(data));
                adapter.deliver(data);
            },
            (),
        )?;

        debug!("Opened RX port {} on '{}'", port, device.name);
        Ok(connection)
    }

    fn open_tx_port(&mut self, device: &mut Self::Device, port: usize) -> Result<Self::TxPort> {
        let midi_out = MidiOutput::new(&self.client_name)?;

        let target = midi_out
            .ports()
            .into_iter()
            .filter(|p| midi_out.port_name(p).map(|n| n == device.name).unwrap_or(false))
            .nth(port)
            .ok_or_else(|| {
                PlatformError::Port(format!("'{}' has no input port {}", device.name, port))
            })?;

        let connection = midi_out.connect(&target, &format!("{}-tx", self.client_name))?;
        debug!("Opened TX port {} on '{}'", port, device.name);
        Ok(connection)
    }

    fn write(&mut self, port: &mut Self::TxPort, bytes: &[u8]) -> Result<()> {
        port.send(bytes)?;
        Ok(())
    }

    fn close_rx_port(&mut self, port: Self::RxPort) -> Result<()> {
        let _ = port.close();
        Ok(())
    }

    fn close_tx_port(&mut self, port: Self::TxPort) -> Result<()> {
        let _ = port.close();
        Ok(())
    }

    fn close_device(&mut self, device: Self::Device) -> Result<()> {
        // midir has no device-level handle to release
        debug!("Released MIDI device '{}'", device.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_group_devices_merges_directions() {
        let devices = group_devices(
            &names(&["X-Touch", "Keys", "Keys"]),
            &names(&["Synth", "X-Touch"]),
        );

        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].id, "X-Touch");
        assert_eq!((devices[0].input_ports, devices[0].output_ports), (1, 1));
        assert_eq!(devices[1].id, "Keys");
        assert_eq!((devices[1].input_ports, devices[1].output_ports), (0, 2));
        assert_eq!(devices[2].id, "Synth");
        assert_eq!((devices[2].input_ports, devices[2].output_ports), (1, 0));
    }

    #[test]
    fn test_group_devices_description_is_port_name() {
        let devices = group_devices(&names(&["Launchpad|Mini"]), &[]);
        assert_eq!(devices[0].description(), " - LaunchpadMini");
    }
}
