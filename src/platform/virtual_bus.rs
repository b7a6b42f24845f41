//! In-memory MIDI backend
//!
//! A [`VirtualBus`] holds a configurable device list and records everything
//! written to it. Device opens complete on a helper thread, like a real
//! asynchronous platform, and can be told to fail or never complete. Bytes
//! can be injected into any device output port to exercise RX slots.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::{MidiPlatform, OpenCompletion, RxAdapter};
use crate::catalog::DeviceDescriptor;
use crate::error::{PlatformError, Result};

const ID_PREFIX: &str = "virtual:";

/// How a virtual device answers an open request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpenBehavior {
    /// Open succeeds
    #[default]
    Ok,
    /// Completion reports no device
    Refuse,
    /// Completion is held and never delivered unless released
    Hang,
    /// Device opens but every port open fails
    NoPorts,
}

/// Static description of a virtual device
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VirtualDevice {
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    /// Ports we can transmit into
    #[serde(default)]
    pub inputs: usize,
    /// Ports we can receive from
    #[serde(default)]
    pub outputs: usize,
    #[serde(default)]
    pub open: OpenBehavior,
}

impl VirtualDevice {
    pub fn new(manufacturer: &str, product: &str, inputs: usize, outputs: usize) -> Self {
        Self {
            manufacturer: Some(manufacturer.to_string()),
            product: Some(product.to_string()),
            inputs,
            outputs,
            open: OpenBehavior::Ok,
        }
    }

    pub fn with_open(mut self, open: OpenBehavior) -> Self {
        self.open = open;
        self
    }
}

/// Handle to an opened virtual device
#[derive(Debug)]
pub struct VirtualDeviceHandle {
    index: usize,
}

/// Opened virtual RX port
#[derive(Debug)]
pub struct VirtualRxPort {
    device: usize,
    port: usize,
    binding: u64,
}

/// Opened virtual TX port
#[derive(Debug)]
pub struct VirtualTxPort {
    device: usize,
    port: usize,
}

type PortKey = (usize, usize);

#[derive(Default)]
struct BusState {
    devices: Vec<VirtualDevice>,
    open_devices: usize,
    next_binding: u64,
    rx_bindings: HashMap<PortKey, Vec<(u64, RxAdapter<VirtualDeviceHandle>)>>,
    writes: HashMap<PortKey, Vec<Vec<u8>>>,
    held: Vec<(usize, OpenCompletion<VirtualDeviceHandle>)>,
}

/// Shared view of the virtual bus, usable from any thread
#[derive(Clone, Default)]
pub struct VirtualBus {
    state: Arc<Mutex<BusState>>,
}

impl VirtualBus {
    pub fn new(devices: Vec<VirtualDevice>) -> Self {
        let bus = Self::default();
        bus.set_devices(devices);
        bus
    }

    /// A platform handle operating on this bus
    pub fn platform(&self) -> VirtualPlatform {
        VirtualPlatform { bus: self.clone() }
    }

    /// Replace the device list seen by the next enumeration
    pub fn set_devices(&self, devices: Vec<VirtualDevice>) {
        self.state.lock().devices = devices;
    }

    pub fn add_device(&self, device: VirtualDevice) {
        self.state.lock().devices.push(device);
    }

    /// Push bytes out of a device output port. Returns how many RX bindings
    /// received them.
    pub fn inject(&self, device: usize, port: usize, bytes: &[u8]) -> usize {
        // Clone the adapters so delivery happens outside the lock
        let adapters: Vec<RxAdapter<VirtualDeviceHandle>> = self
            .state
            .lock()
            .rx_bindings
            .get(&(device, port))
            .map(|list| list.iter().map(|(_, a)| a.clone()).collect())
            .unwrap_or_default();

        for adapter in &adapters {
            adapter.deliver(bytes);
        }
        adapters.len()
    }

    /// Everything written to a device input port, one entry per write
    pub fn writes(&self, device: usize, port: usize) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .writes
            .get(&(device, port))
            .cloned()
            .unwrap_or_default()
    }

    /// Device handles handed out and not yet closed
    pub fn open_device_count(&self) -> usize {
        self.state.lock().open_devices
    }

    /// RX ports currently bound
    pub fn rx_binding_count(&self) -> usize {
        self.state.lock().rx_bindings.values().map(Vec::len).sum()
    }

    /// Open requests held by [`OpenBehavior::Hang`] devices
    pub fn held_open_count(&self) -> usize {
        self.state.lock().held.len()
    }

    /// Deliver every held open request, successfully or not
    pub fn release_held(&self, succeed: bool) {
        let held: Vec<_> = std::mem::take(&mut self.state.lock().held);
        for (index, completion) in held {
            let device = if succeed {
                self.state.lock().open_devices += 1;
                Some(VirtualDeviceHandle { index })
            } else {
                None
            };
            completion.complete(device);
        }
    }

    fn descriptors(&self) -> Vec<DeviceDescriptor> {
        self.state
            .lock()
            .devices
            .iter()
            .enumerate()
            .map(|(index, d)| DeviceDescriptor {
                id: format!("{}{}", ID_PREFIX, index),
                manufacturer: d.manufacturer.clone(),
                product: d.product.clone(),
                input_ports: d.inputs,
                output_ports: d.outputs,
            })
            .collect()
    }
}

/// `MidiPlatform` over a [`VirtualBus`]
pub struct VirtualPlatform {
    bus: VirtualBus,
}

impl VirtualPlatform {
    pub fn bus(&self) -> &VirtualBus {
        &self.bus
    }

    fn device(&self, index: usize) -> Result<VirtualDevice> {
        self.bus
            .state
            .lock()
            .devices
            .get(index)
            .cloned()
            .ok_or_else(|| PlatformError::Device(format!("virtual device {} is gone", index)))
    }
}

impl MidiPlatform for VirtualPlatform {
    type Device = VirtualDeviceHandle;
    type RxPort = VirtualRxPort;
    type TxPort = VirtualTxPort;

    fn enumerate_devices(&mut self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self.bus.descriptors())
    }

    fn open_device_async(
        &mut self,
        descriptor: &DeviceDescriptor,
        completion: OpenCompletion<Self::Device>,
    ) {
        let index = match descriptor
            .id
            .strip_prefix(ID_PREFIX)
            .and_then(|n| n.parse::<usize>().ok())
        {
            Some(index) => index,
            None => {
                warn!("Not a virtual device id: {}", descriptor.id);
                completion.complete(None);
                return;
            }
        };

        let behavior = match self.device(index) {
            Ok(device) => device.open,
            Err(_) => OpenBehavior::Refuse,
        };

        if behavior == OpenBehavior::Hang {
            debug!("Virtual device {} holds open request {:?}", index, completion.ticket());
            self.bus.state.lock().held.push((index, completion));
            return;
        }

        let bus = self.bus.clone();
        let spawned = std::thread::Builder::new()
            .name("virtual-open".to_string())
            .spawn(move || {
                if behavior == OpenBehavior::Refuse {
                    completion.complete(None);
                    return;
                }
                bus.state.lock().open_devices += 1;
                completion.complete(Some(VirtualDeviceHandle { index }));
            });

        if let Err(e) = spawned {
            warn!("Failed to spawn virtual open thread: {}", e);
        }
    }

    fn open_rx_port(
        &mut self,
        device: &mut Self::Device,
        port: usize,
        adapter: RxAdapter<Self::Device>,
    ) -> Result<Self::RxPort> {
        let spec = self.device(device.index)?;
        if spec.open == OpenBehavior::NoPorts || port >= spec.outputs {
            return Err(PlatformError::Port(format!(
                "virtual device {} has no output port {}",
                device.index, port
            )));
        }

        let mut state = self.bus.state.lock();
        let binding = state.next_binding;
        state.next_binding += 1;
        state
            .rx_bindings
            .entry((device.index, port))
            .or_default()
            .push((binding, adapter));

        trace!("Bound virtual RX {}:{} as #{}", device.index, port, binding);
        Ok(VirtualRxPort {
            device: device.index,
            port,
            binding,
        })
    }

    fn open_tx_port(&mut self, device: &mut Self::Device, port: usize) -> Result<Self::TxPort> {
        let spec = self.device(device.index)?;
        if spec.open == OpenBehavior::NoPorts || port >= spec.inputs {
            return Err(PlatformError::Port(format!(
                "virtual device {} has no input port {}",
                device.index, port
            )));
        }
        Ok(VirtualTxPort {
            device: device.index,
            port,
        })
    }

    fn write(&mut self, port: &mut Self::TxPort, bytes: &[u8]) -> Result<()> {
        self.bus
            .state
            .lock()
            .writes
            .entry((port.device, port.port))
            .or_default()
            .push(bytes.to_vec());
        Ok(())
    }

    fn close_rx_port(&mut self, port: Self::RxPort) -> Result<()> {
        let mut state = self.bus.state.lock();
        let key = (port.device, port.port);
        if let Some(list) = state.rx_bindings.get_mut(&key) {
            list.retain(|(binding, _)| *binding != port.binding);
            if list.is_empty() {
                state.rx_bindings.remove(&key);
            }
        }
        Ok(())
    }

    fn close_tx_port(&mut self, _port: Self::TxPort) -> Result<()> {
        Ok(())
    }

    fn close_device(&mut self, _device: Self::Device) -> Result<()> {
        let mut state = self.bus.state.lock();
        state.open_devices = state.open_devices.saturating_sub(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{OpenTicket, PlatformEvent};
    use crate::types::{Direction, SlotIndex};
    use crossbeam::channel::unbounded;
    use std::time::Duration;

    fn open_sync(
        platform: &mut VirtualPlatform,
        descriptor: &DeviceDescriptor,
    ) -> Option<VirtualDeviceHandle> {
        let (tx, rx) = unbounded();
        let slot = SlotIndex::new(0).unwrap();
        platform.open_device_async(
            descriptor,
            OpenCompletion::new(OpenTicket(1), Direction::Tx, slot, tx),
        );
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            PlatformEvent::DeviceOpened { device, .. } => device,
            PlatformEvent::BytesReceived { .. } => panic!("unexpected bytes"),
        }
    }

    #[test]
    fn test_enumerate_reports_configured_devices() {
        let bus = VirtualBus::new(vec![VirtualDevice::new("Acme", "Synth", 2, 1)]);
        let devices = bus.platform().enumerate_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "virtual:0");
        assert_eq!(devices[0].input_ports, 2);
        assert_eq!(devices[0].output_ports, 1);
        assert_eq!(devices[0].description(), "Acme - Synth");
    }

    #[test]
    fn test_open_write_close() {
        let bus = VirtualBus::new(vec![VirtualDevice::new("Acme", "Synth", 2, 0)]);
        let mut platform = bus.platform();
        let descriptor = platform.enumerate_devices().unwrap().remove(0);

        let mut device = open_sync(&mut platform, &descriptor).unwrap();
        assert_eq!(bus.open_device_count(), 1);

        let mut port = platform.open_tx_port(&mut device, 1).unwrap();
        platform.write(&mut port, &[0x90, 0x40, 0x7F]).unwrap();
        assert_eq!(bus.writes(0, 1), vec![vec![0x90, 0x40, 0x7F]]);

        assert!(platform.open_tx_port(&mut device, 2).is_err());

        platform.close_tx_port(port).unwrap();
        platform.close_device(device).unwrap();
        assert_eq!(bus.open_device_count(), 0);
    }

    #[test]
    fn test_refused_open() {
        let bus = VirtualBus::new(vec![
            VirtualDevice::new("Acme", "Broken", 1, 1).with_open(OpenBehavior::Refuse)
        ]);
        let mut platform = bus.platform();
        let descriptor = platform.enumerate_devices().unwrap().remove(0);
        assert!(open_sync(&mut platform, &descriptor).is_none());
        assert_eq!(bus.open_device_count(), 0);
    }

    #[test]
    fn test_inject_reaches_bound_rx_port() {
        let bus = VirtualBus::new(vec![VirtualDevice::new("Acme", "Keys", 0, 1)]);
        let mut platform = bus.platform();
        let descriptor = platform.enumerate_devices().unwrap().remove(0);
        let mut device = open_sync(&mut platform, &descriptor).unwrap();

        let (tx, rx) = unbounded();
        let adapter = RxAdapter::new(SlotIndex::new(4).unwrap(), tx);
        let port = platform.open_rx_port(&mut device, 0, adapter).unwrap();

        assert_eq!(bus.inject(0, 0, &[0xF8]), 1);
        match rx.try_recv().unwrap() {
            PlatformEvent::BytesReceived { slot, bytes } => {
                assert_eq!(slot.get(), 4);
                assert_eq!(bytes, vec![0xF8]);
            }
            PlatformEvent::DeviceOpened { .. } => panic!("unexpected open event"),
        }

        platform.close_rx_port(port).unwrap();
        assert_eq!(bus.rx_binding_count(), 0);
        assert_eq!(bus.inject(0, 0, &[0xF8]), 0);
    }

    #[test]
    fn test_hang_holds_completion() {
        let bus = VirtualBus::new(vec![
            VirtualDevice::new("Acme", "Sleepy", 1, 0).with_open(OpenBehavior::Hang)
        ]);
        let mut platform = bus.platform();
        let descriptor = platform.enumerate_devices().unwrap().remove(0);

        let (tx, rx) = unbounded();
        platform.open_device_async(
            &descriptor,
            OpenCompletion::new(OpenTicket(3), Direction::Tx, SlotIndex::new(0).unwrap(), tx),
        );
        assert_eq!(bus.held_open_count(), 1);
        assert!(rx.try_recv().is_err());

        bus.release_held(false);
        match rx.try_recv().unwrap() {
            PlatformEvent::DeviceOpened { ticket, device, .. } => {
                assert_eq!(ticket, OpenTicket(3));
                assert!(device.is_none());
            }
            PlatformEvent::BytesReceived { .. } => panic!("unexpected bytes"),
        }
    }

    #[test]
    fn test_virtual_device_yaml() {
        let yaml = "manufacturer: Acme\nproduct: Synth\ninputs: 2\nopen: no-ports\n";
        let device: VirtualDevice = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(device.inputs, 2);
        assert_eq!(device.outputs, 0);
        assert_eq!(device.open, OpenBehavior::NoPorts);
    }
}
