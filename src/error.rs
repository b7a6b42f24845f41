//! Error types for the platform layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MIDI backend init failed: {0}")]
    Init(String),

    #[error("MIDI device error: {0}")]
    Device(String),

    #[error("MIDI port error: {0}")]
    Port(String),

    #[error("MIDI send failed: {0}")]
    Send(String),
}

impl From<midir::InitError> for PlatformError {
    fn from(e: midir::InitError) -> Self {
        PlatformError::Init(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiInput>> for PlatformError {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        PlatformError::Port(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiOutput>> for PlatformError {
    fn from(e: midir::ConnectError<midir::MidiOutput>) -> Self {
        PlatformError::Port(e.to_string())
    }
}

impl From<midir::SendError> for PlatformError {
    fn from(e: midir::SendError) -> Self {
        PlatformError::Send(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// The dispatch loop has stopped and no longer accepts actions
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("dispatch loop has stopped")]
pub struct DispatcherGone;
