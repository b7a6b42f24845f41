//! Platform collaborator: device enumeration, asynchronous device open and
//! raw byte I/O.
//!
//! Backends report back to the dispatcher through a single channel of
//! [`PlatformEvent`]s. Device-open completions and RX byte arrivals may be
//! produced on any thread.

pub mod hardware;
pub mod virtual_bus;

use crossbeam::channel::Sender;
use tracing::trace;

use crate::catalog::DeviceDescriptor;
use crate::error::Result;
use crate::types::{Direction, SlotIndex};

pub use hardware::MidirPlatform;
pub use virtual_bus::{OpenBehavior, VirtualBus, VirtualDevice, VirtualPlatform};

/// Identifies one Open request. Completions carrying any other ticket are
/// stale and must be released by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpenTicket(pub u64);

/// Event delivered from a backend into the dispatch loop
#[derive(Debug)]
pub enum PlatformEvent<D> {
    /// An asynchronous device open finished; `device` is `None` on failure
    DeviceOpened {
        ticket: OpenTicket,
        direction: Direction,
        slot: SlotIndex,
        device: Option<D>,
    },
    /// Bytes arrived on the port bound to an RX slot
    BytesReceived { slot: SlotIndex, bytes: Vec<u8> },
}

/// One-shot completion handed to [`MidiPlatform::open_device_async`].
///
/// `complete` consumes the handle, so it fires at most once. Dropping it
/// without completing reports a failed open.
pub struct OpenCompletion<D> {
    ticket: OpenTicket,
    direction: Direction,
    slot: SlotIndex,
    events: Sender<PlatformEvent<D>>,
    fired: bool,
}

impl<D> OpenCompletion<D> {
    pub fn new(
        ticket: OpenTicket,
        direction: Direction,
        slot: SlotIndex,
        events: Sender<PlatformEvent<D>>,
    ) -> Self {
        Self {
            ticket,
            direction,
            slot,
            events,
            fired: false,
        }
    }

    pub fn ticket(&self) -> OpenTicket {
        self.ticket
    }

    /// Deliver the open result to the waiting dispatcher
    pub fn complete(mut self, device: Option<D>) {
        self.fire(device);
    }

    fn fire(&mut self, device: Option<D>) {
        if self.fired {
            return;
        }
        self.fired = true;
        trace!(
            ticket = self.ticket.0,
            slot = %self.slot,
            ok = device.is_some(),
            "Device open completed"
        );
        // The dispatcher owns the receiver for its whole life; a send error
        // only happens during teardown.
        let _ = self.events.send(PlatformEvent::DeviceOpened {
            ticket: self.ticket,
            direction: self.direction,
            slot: self.slot,
            device,
        });
    }
}

impl<D> Drop for OpenCompletion<D> {
    fn drop(&mut self) {
        self.fire(None);
    }
}

/// Receive adapter bound to an RX port. Forwards bytes tagged with the slot
/// index and never touches slot state.
pub struct RxAdapter<D> {
    slot: SlotIndex,
    events: Sender<PlatformEvent<D>>,
}

impl<D> Clone for RxAdapter<D> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot,
            events: self.events.clone(),
        }
    }
}

impl<D> RxAdapter<D> {
    pub fn new(slot: SlotIndex, events: Sender<PlatformEvent<D>>) -> Self {
        Self { slot, events }
    }

    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// Forward a received byte range unmodified
    pub fn deliver(&self, bytes: &[u8]) {
        // A send error means the dispatcher is tearing down; the bytes have
        // nowhere to go.
        let _ = self.events.send(PlatformEvent::BytesReceived {
            slot: self.slot,
            bytes: bytes.to_vec(),
        });
    }
}

/// Capability set a MIDI backend provides to the dispatcher.
///
/// Port naming is from this application's point of view: an RX port reads
/// from one of the device's output ports, a TX port writes to one of its
/// input ports.
pub trait MidiPlatform {
    /// Opened device handle; travels back from the completion thread
    type Device: Send + 'static;
    /// Opened receive port
    type RxPort;
    /// Opened transmit port
    type TxPort;

    /// List currently available devices in a stable order
    fn enumerate_devices(&mut self) -> Result<Vec<DeviceDescriptor>>;

    /// Start opening a device; the result arrives through `completion`,
    /// possibly on another thread.
    fn open_device_async(
        &mut self,
        descriptor: &DeviceDescriptor,
        completion: OpenCompletion<Self::Device>,
    );

    /// Open the `port`-th output port of `device` and bind `adapter` to it
    fn open_rx_port(
        &mut self,
        device: &mut Self::Device,
        port: usize,
        adapter: RxAdapter<Self::Device>,
    ) -> Result<Self::RxPort>;

    /// Open the `port`-th input port of `device` for writing
    fn open_tx_port(&mut self, device: &mut Self::Device, port: usize) -> Result<Self::TxPort>;

    /// Write raw bytes to a TX port
    fn write(&mut self, port: &mut Self::TxPort, bytes: &[u8]) -> Result<()>;

    fn close_rx_port(&mut self, port: Self::RxPort) -> Result<()>;

    fn close_tx_port(&mut self, port: Self::TxPort) -> Result<()>;

    fn close_device(&mut self, device: Self::Device) -> Result<()>;
}
