//! midislot - MIDI port-slot multiplexer
//!
//! Sixteen RX and sixteen TX slots, each bindable to one port of one MIDI
//! device, driven by a stream of 32-bit action words. A single dispatch
//! thread executes the actions; the platform backend opens devices
//! asynchronously and delivers received bytes back to that thread.

pub mod action;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod midi;
pub mod platform;
pub mod report;
pub mod slot;
pub mod types;

pub use action::Action;
pub use catalog::{CatalogSnapshot, DeviceDescriptor, PortCounting};
pub use config::{AppConfig, BackendKind, DispatchConfig};
pub use dispatch::{spawn, ActionSender, Dispatcher};
pub use error::{DispatcherGone, PlatformError};
pub use platform::{MidiPlatform, MidirPlatform, VirtualBus, VirtualPlatform};
pub use report::{ChannelReporter, ConsoleReporter, Report, Reporter};
pub use types::{Direction, SlotIndex, SLOT_COUNT};
