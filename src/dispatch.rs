//! Dispatch loop
//!
//! One thread owns every slot and both catalog snapshots. It fetches an
//! action word, executes it to completion, and fetches the next. Opening a
//! slot blocks this thread until the backend's asynchronous completion for
//! that exact request arrives; meanwhile received bytes keep flowing to the
//! reporter and stale completions are released.
//!
//! ```text
//!   ActionSender ──u32──►┐
//!                        │   ┌───────────────────────────────┐
//!                        ├──►│ Dispatcher (midi-dispatch)    │──► Reporter
//!                        │   │  rx_slots[16]  tx_slots[16]   │
//!   backend threads ─────┘   │  rx_catalog    tx_catalog     │
//!   PlatformEvent            └───────────────┬───────────────┘
//!                                            ▼
//!                                       MidiPlatform
//! ```

use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, trace, warn};

use crate::action::Action;
use crate::catalog::{CatalogSnapshot, PortRef};
use crate::config::DispatchConfig;
use crate::error::{DispatcherGone, Result};
use crate::midi::{format_hex, pack_payload, unpack_payload};
use crate::platform::{MidiPlatform, OpenCompletion, OpenTicket, PlatformEvent, RxAdapter};
use crate::report::Reporter;
use crate::slot::{slot_array, PortSlot, SlotStatus};
use crate::types::{Direction, SlotIndex, SLOT_COUNT};

/// Acquires the platform on every init action
pub type Connector<P> = Box<dyn FnMut() -> Result<P> + Send>;

/// Feeds action words into a dispatcher. Cheap to clone.
#[derive(Clone)]
pub struct ActionSender {
    tx: Sender<u32>,
}

impl ActionSender {
    /// Queue a raw action word
    pub fn send(&self, word: u32) -> std::result::Result<(), DispatcherGone> {
        self.tx.send(word).map_err(|_| DispatcherGone)
    }

    pub fn send_action(&self, action: Action) -> std::result::Result<(), DispatcherGone> {
        self.send(action.encode())
    }

    /// Queue a send action followed by its payload word.
    ///
    /// The two words must not be interleaved with words from other clones;
    /// callers sharing a sender across threads must serialize sends.
    pub fn send_bytes(&self, slot: SlotIndex, bytes: &[u8]) -> std::result::Result<bool, DispatcherGone> {
        let Some((word, len)) = pack_payload(bytes) else {
            return Ok(false);
        };
        self.send_action(Action::Send { slot, len })?;
        self.send(word)?;
        Ok(true)
    }
}

type RxSlot<P> = PortSlot<<P as MidiPlatform>::Device, <P as MidiPlatform>::RxPort>;
type TxSlot<P> = PortSlot<<P as MidiPlatform>::Device, <P as MidiPlatform>::TxPort>;

/// State created by the init action
struct Context<P: MidiPlatform> {
    platform: P,
    rx_slots: Vec<RxSlot<P>>,
    tx_slots: Vec<TxSlot<P>>,
    rx_catalog: CatalogSnapshot,
    tx_catalog: CatalogSnapshot,
}

impl<P: MidiPlatform> Context<P> {
    fn new(platform: P) -> Self {
        Self {
            platform,
            rx_slots: slot_array(),
            tx_slots: slot_array(),
            rx_catalog: CatalogSnapshot::empty(Direction::Rx),
            tx_catalog: CatalogSnapshot::empty(Direction::Tx),
        }
    }

    fn catalog(&self, direction: Direction) -> &CatalogSnapshot {
        match direction {
            Direction::Rx => &self.rx_catalog,
            Direction::Tx => &self.tx_catalog,
        }
    }

    fn set_catalog(&mut self, snapshot: CatalogSnapshot) {
        match snapshot.direction() {
            Direction::Rx => self.rx_catalog = snapshot,
            Direction::Tx => self.tx_catalog = snapshot,
        }
    }

    fn status(&self, direction: Direction, slot: SlotIndex) -> SlotStatus {
        match direction {
            Direction::Rx => self.rx_slots[slot.as_usize()].status(),
            Direction::Tx => self.tx_slots[slot.as_usize()].status(),
        }
    }

    fn begin_open(&mut self, direction: Direction, slot: SlotIndex, ticket: OpenTicket) -> bool {
        match direction {
            Direction::Rx => self.rx_slots[slot.as_usize()].begin_open(ticket),
            Direction::Tx => self.tx_slots[slot.as_usize()].begin_open(ticket),
        }
    }

    fn abort_open(&mut self, direction: Direction, slot: SlotIndex, ticket: OpenTicket) {
        match direction {
            Direction::Rx => self.rx_slots[slot.as_usize()].abort_open(ticket),
            Direction::Tx => self.tx_slots[slot.as_usize()].abort_open(ticket),
        };
    }

    /// Best-effort device release; failures are only logged
    fn release_device(&mut self, device: P::Device) {
        if let Err(e) = self.platform.close_device(device) {
            debug!("Ignoring device close failure: {}", e);
        }
    }

    /// Open -> Closed. Returns false when the slot was not open.
    fn close(&mut self, direction: Direction, slot: SlotIndex) -> bool {
        let result = match direction {
            Direction::Rx => self.rx_slots[slot.as_usize()]
                .take_open()
                .map(|(device, port)| (device, self.platform.close_rx_port(port))),
            Direction::Tx => self.tx_slots[slot.as_usize()]
                .take_open()
                .map(|(device, port)| (device, self.platform.close_tx_port(port))),
        };

        let Some((device, port_closed)) = result else {
            return false;
        };
        if let Err(e) = port_closed {
            debug!("Ignoring port close failure on {}{}: {}", direction, slot, e);
        }
        self.release_device(device);
        true
    }

    fn close_all(&mut self) {
        let mut closed = 0;
        for slot in SlotIndex::all() {
            for direction in [Direction::Rx, Direction::Tx] {
                if self.close(direction, slot) {
                    closed += 1;
                }
            }
        }
        if closed > 0 {
            info!("Closed {} open slots", closed);
        }
    }

    /// Bind a freshly opened device to its slot, or release it on failure
    fn bind(
        &mut self,
        direction: Direction,
        slot: SlotIndex,
        ticket: OpenTicket,
        mut device: P::Device,
        port: usize,
        adapter: RxAdapter<P::Device>,
    ) -> bool {
        let index = slot.as_usize();
        match direction {
            Direction::Rx => match self.platform.open_rx_port(&mut device, port, adapter) {
                Ok(rx_port) => match self.rx_slots[index].finish_open(ticket, device, rx_port) {
                    Ok(()) => return true,
                    Err((device, rx_port)) => {
                        let _ = self.platform.close_rx_port(rx_port);
                        self.release_device(device);
                    }
                },
                Err(e) => {
                    warn!("Failed to open RX port {} for slot {}: {}", port, slot, e);
                    self.release_device(device);
                }
            },
            Direction::Tx => match self.platform.open_tx_port(&mut device, port) {
                Ok(tx_port) => match self.tx_slots[index].finish_open(ticket, device, tx_port) {
                    Ok(()) => return true,
                    Err((device, tx_port)) => {
                        let _ = self.platform.close_tx_port(tx_port);
                        self.release_device(device);
                    }
                },
                Err(e) => {
                    warn!("Failed to open TX port {} for slot {}: {}", port, slot, e);
                    self.release_device(device);
                }
            },
        }
        self.abort_open(direction, slot, ticket);
        false
    }
}

/// The single-threaded action processor
pub struct Dispatcher<P: MidiPlatform, R: Reporter> {
    config: DispatchConfig,
    connector: Connector<P>,
    context: Option<Context<P>>,
    reporter: R,
    actions: Receiver<u32>,
    events_tx: Sender<PlatformEvent<P::Device>>,
    events_rx: Receiver<PlatformEvent<P::Device>>,
    next_ticket: u64,
    /// Platform kept after a failed re-init so late devices can be released
    retired: Option<P>,
}

impl<P: MidiPlatform, R: Reporter> Dispatcher<P, R> {
    /// Create a dispatcher and the sender that feeds it
    pub fn new<F>(config: DispatchConfig, connector: F, reporter: R) -> (ActionSender, Self)
    where
        F: FnMut() -> Result<P> + Send + 'static,
    {
        let (tx, rx) = channel::unbounded();
        (
            ActionSender { tx },
            Self::with_receiver(config, Box::new(connector), reporter, rx),
        )
    }

    fn with_receiver(
        config: DispatchConfig,
        connector: Connector<P>,
        reporter: R,
        actions: Receiver<u32>,
    ) -> Self {
        let (events_tx, events_rx) = channel::unbounded();
        Self {
            config,
            connector,
            context: None,
            reporter,
            actions,
            events_tx,
            events_rx,
            next_ticket: 0,
            retired: None,
        }
    }

    /// Whether an init action has acquired the platform
    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// Current state of a slot, `None` before initialization
    pub fn slot_status(&self, direction: Direction, slot: SlotIndex) -> Option<SlotStatus> {
        self.context.as_ref().map(|ctx| ctx.status(direction, slot))
    }

    /// Platform acquired by the last init action
    pub fn platform(&self) -> Option<&P> {
        self.context.as_ref().map(|ctx| &ctx.platform)
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Process actions until every [`ActionSender`] is dropped, then close
    /// all slots.
    pub fn run(mut self) {
        info!("Dispatch loop started");
        let actions = self.actions.clone();
        let events = self.events_rx.clone();

        loop {
            channel::select! {
                recv(actions) -> word => match word {
                    Ok(word) => self.dispatch(word),
                    Err(_) => break,
                },
                recv(events) -> event => {
                    if let Ok(event) = event {
                        self.handle_event(event);
                    }
                },
            }
        }

        info!("Command source closed, stopping dispatch loop");
        if let Some(ctx) = self.context.as_mut() {
            ctx.close_all();
        }
    }

    /// Execute one action word to completion
    pub fn dispatch(&mut self, word: u32) {
        let action = Action::decode(word);
        debug!("Action {:#010X}: {}", word, action);

        match action {
            Action::Init => self.init(),
            Action::Refresh(direction) => self.refresh(direction),
            Action::Send { slot, len } => self.send(slot, len),
            Action::Open {
                direction,
                slot,
                ordinal,
            } => self.open(direction, slot, ordinal),
            Action::Close { direction, slot } => self.close(direction, slot),
            Action::Unknown(op) => trace!("Ignoring unknown opcode {}", op),
        }
    }

    /// Handle every platform event already queued, without blocking
    pub fn pump_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    fn handle_event(&mut self, event: PlatformEvent<P::Device>) {
        match event {
            PlatformEvent::BytesReceived { slot, bytes } => {
                trace!("RX slot {} <- {}", slot, format_hex(&bytes));
                self.reporter.bytes_received(slot, &bytes);
            }
            PlatformEvent::DeviceOpened {
                ticket,
                direction,
                slot,
                device,
            } => {
                debug!(
                    "Discarding stale open completion #{} for {}{}",
                    ticket.0, direction, slot
                );
                if let Some(device) = device {
                    self.release_stale(device);
                }
            }
        }
    }

    fn release_stale(&mut self, device: P::Device) {
        if let Some(ctx) = self.context.as_mut() {
            ctx.release_device(device);
        } else if let Some(platform) = self.retired.as_mut() {
            if let Err(e) = platform.close_device(device) {
                debug!("Ignoring device close failure: {}", e);
            }
        } else {
            debug!("No platform left to release a late device");
        }
    }

    fn init(&mut self) {
        if let Some(mut previous) = self.context.take() {
            previous.close_all();
            self.retired = Some(previous.platform);
        }

        match (self.connector)() {
            Ok(platform) => {
                self.context = Some(Context::new(platform));
                self.retired = None;
                info!("MIDI context initialized: {} RX + {} TX slots", SLOT_COUNT, SLOT_COUNT);
            }
            Err(e) => warn!("Failed to acquire MIDI platform: {}", e),
        }
    }

    fn refresh(&mut self, direction: Direction) {
        let Some(ctx) = self.context.as_mut() else {
            self.reporter.port_count(direction, 0);
            return;
        };

        let devices = ctx.platform.enumerate_devices().unwrap_or_else(|e| {
            warn!("Device enumeration failed: {}", e);
            Vec::new()
        });
        let snapshot = CatalogSnapshot::new(direction, devices);

        let count = snapshot.port_count(direction);
        debug!("{} catalog: {} devices, {} ports", direction, snapshot.devices().len(), count);

        self.reporter.port_count(direction, count);
        for (ordinal, description) in snapshot.descriptions(direction).enumerate() {
            self.reporter.port_description(direction, ordinal, &description);
        }

        ctx.set_catalog(snapshot);
    }

    fn send(&mut self, slot: SlotIndex, len: u8) {
        // The payload word is consumed even if the slot cannot use it
        let payload = match self.actions.recv() {
            Ok(word) => word,
            Err(_) => {
                warn!("Command source closed before send payload");
                return;
            }
        };

        let Some(ctx) = self.context.as_mut() else {
            warn!("Send before init ignored");
            return;
        };
        let Some(bytes) = unpack_payload(payload, len as usize) else {
            debug!("Dropping send on tx{} with byte count {}", slot, len);
            return;
        };
        let Some(port) = ctx.tx_slots[slot.as_usize()].port_mut() else {
            trace!("TX slot {} not open, dropping {}", slot, format_hex(&bytes));
            return;
        };

        trace!("TX slot {} -> {}", slot, format_hex(&bytes));
        if let Err(e) = ctx.platform.write(port, &bytes) {
            debug!("Ignoring write failure on tx{}: {}", slot, e);
        }
    }

    fn open(&mut self, direction: Direction, slot: SlotIndex, ordinal: u32) {
        let basis = self.config.port_counting.open_basis(direction);
        let ticket = OpenTicket(self.next_ticket);
        self.next_ticket += 1;

        let Some(ctx) = self.context.as_mut() else {
            warn!("Open before init ignored");
            return;
        };

        let status = ctx.status(direction, slot);
        if status != SlotStatus::Closed {
            debug!("{}{} is {:?}, ignoring open", direction, slot, status);
            return;
        }

        let catalog = ctx.catalog(direction);
        let Some(PortRef { device, port }) = catalog.resolve(ordinal, basis) else {
            debug!(
                "Ordinal {} not in {} catalog ({} ports), {}{} stays closed",
                ordinal,
                direction,
                catalog.port_count(basis),
                direction,
                slot
            );
            return;
        };
        let Some(descriptor) = catalog.device(device).cloned() else {
            return;
        };

        ctx.begin_open(direction, slot, ticket);
        debug!(
            "Opening {}{} on '{}' port {} (ticket #{})",
            direction,
            slot,
            descriptor.description(),
            port,
            ticket.0
        );
        let completion = OpenCompletion::new(ticket, direction, slot, self.events_tx.clone());
        ctx.platform.open_device_async(&descriptor, completion);

        let opened = self.await_device(ticket);

        let adapter = RxAdapter::new(slot, self.events_tx.clone());
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        let Some(device) = opened else {
            info!("Device '{}' did not open, {}{} stays closed", descriptor.description(), direction, slot);
            ctx.abort_open(direction, slot, ticket);
            return;
        };

        if ctx.bind(direction, slot, ticket, device, port, adapter) {
            info!("Opened {}{} on '{}' port {}", direction, slot, descriptor.description(), port);
        }
    }

    /// Block until the completion for `ticket` arrives or the open timeout
    /// elapses. Other events are handled while waiting.
    fn await_device(&mut self, ticket: OpenTicket) -> Option<P::Device> {
        let deadline = self.config.open_timeout().map(|timeout| Instant::now() + timeout);

        loop {
            let event = match deadline {
                Some(deadline) => match self.events_rx.recv_deadline(deadline) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        warn!(
                            "Device open #{} timed out after {} ms",
                            ticket.0, self.config.open_timeout_ms
                        );
                        return None;
                    }
                    Err(RecvTimeoutError::Disconnected) => return None,
                },
                // No timeout configured: wait as long as it takes
                None => match self.events_rx.recv() {
                    Ok(event) => event,
                    Err(_) => return None,
                },
            };

            match event {
                PlatformEvent::DeviceOpened {
                    ticket: done,
                    device,
                    ..
                } if done == ticket => return device,
                other => self.handle_event(other),
            }
        }
    }

    fn close(&mut self, direction: Direction, slot: SlotIndex) {
        let Some(ctx) = self.context.as_mut() else {
            warn!("Close before init ignored");
            return;
        };
        if ctx.close(direction, slot) {
            info!("Closed {}{}", direction, slot);
        } else {
            trace!("{}{} already closed", direction, slot);
        }
    }
}

/// Start a dispatcher on its own `midi-dispatch` thread
pub fn spawn<P, R, F>(
    config: DispatchConfig,
    connector: F,
    reporter: R,
) -> std::io::Result<(ActionSender, JoinHandle<()>)>
where
    P: MidiPlatform + 'static,
    R: Reporter + 'static,
    F: FnMut() -> Result<P> + Send + 'static,
{
    let (tx, rx) = channel::unbounded();
    let handle = std::thread::Builder::new()
        .name("midi-dispatch".to_string())
        .spawn(move || {
            Dispatcher::with_receiver(config, Box::new(connector), reporter, rx).run();
        })?;
    Ok((ActionSender { tx }, handle))
}
