//! Outbound reporting: catalog results and received bytes

use std::io::Write;

use crossbeam::channel::Sender;
use tracing::warn;

use crate::midi::format_hex;
use crate::types::{Direction, SlotIndex};

/// Sink for everything the dispatcher reports back to its caller
pub trait Reporter: Send {
    /// Number of ports found by a catalog refresh
    fn port_count(&mut self, direction: Direction, count: usize);

    /// Description of the port at `ordinal`, sent after `port_count`
    fn port_description(&mut self, direction: Direction, ordinal: usize, description: &str);

    /// Raw bytes received on an RX slot
    fn bytes_received(&mut self, slot: SlotIndex, bytes: &[u8]);
}

/// Typed report values, as sent by [`ChannelReporter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    PortCount {
        direction: Direction,
        count: usize,
    },
    PortDescription {
        direction: Direction,
        ordinal: usize,
        description: String,
    },
    BytesReceived {
        slot: SlotIndex,
        bytes: Vec<u8>,
    },
}

impl Report {
    /// One line of the console protocol
    pub fn to_line(&self) -> String {
        match self {
            Report::PortCount { direction, count } => format!("{}-count {}", direction, count),
            Report::PortDescription {
                direction,
                ordinal,
                description,
            } => format!("{}-port {} {}", direction, ordinal, description),
            Report::BytesReceived { slot, bytes } => {
                format!("rx-data {} {}", slot, format_hex(bytes))
            }
        }
    }
}

/// Forwards reports over a channel
pub struct ChannelReporter {
    tx: Sender<Report>,
}

impl ChannelReporter {
    pub fn new(tx: Sender<Report>) -> Self {
        Self { tx }
    }

    fn send(&self, report: Report) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(report);
    }
}

impl Reporter for ChannelReporter {
    fn port_count(&mut self, direction: Direction, count: usize) {
        self.send(Report::PortCount { direction, count });
    }

    fn port_description(&mut self, direction: Direction, ordinal: usize, description: &str) {
        self.send(Report::PortDescription {
            direction,
            ordinal,
            description: description.to_string(),
        });
    }

    fn bytes_received(&mut self, slot: SlotIndex, bytes: &[u8]) {
        self.send(Report::BytesReceived {
            slot,
            bytes: bytes.to_vec(),
        });
    }
}

/// Writes the line protocol to any writer (stdout for the binary)
pub struct ConsoleReporter<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, report: Report) {
        if let Err(e) = writeln!(self.out, "{}", report.to_line()).and_then(|_| self.out.flush()) {
            warn!("Failed to write report: {}", e);
        }
    }
}

impl<W: Write + Send> Reporter for ConsoleReporter<W> {
    fn port_count(&mut self, direction: Direction, count: usize) {
        self.emit(Report::PortCount { direction, count });
    }

    fn port_description(&mut self, direction: Direction, ordinal: usize, description: &str) {
        self.emit(Report::PortDescription {
            direction,
            ordinal,
            description: description.to_string(),
        });
    }

    fn bytes_received(&mut self, slot: SlotIndex, bytes: &[u8]) {
        self.emit(Report::BytesReceived {
            slot,
            bytes: bytes.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    #[test]
    fn test_console_lines() {
        let mut reporter = ConsoleReporter::new(Vec::new());
        reporter.port_count(Direction::Tx, 2);
        reporter.port_description(Direction::Tx, 0, "Acme - Synth");
        reporter.bytes_received(SlotIndex::new(1).unwrap(), &[0x90, 0x40, 0x7F]);

        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(
            text,
            "tx-count 2\ntx-port 0 Acme - Synth\nrx-data 1 90 40 7F\n"
        );
    }

    #[test]
    fn test_channel_reporter() {
        let (tx, rx) = unbounded();
        let mut reporter = ChannelReporter::new(tx);
        reporter.port_count(Direction::Rx, 0);

        assert_eq!(
            rx.try_recv().unwrap(),
            Report::PortCount {
                direction: Direction::Rx,
                count: 0
            }
        );
    }

    #[test]
    fn test_channel_reporter_survives_closed_receiver() {
        let (tx, rx) = unbounded();
        drop(rx);
        let mut reporter = ChannelReporter::new(tx);
        reporter.bytes_received(SlotIndex::new(0).unwrap(), &[0xFE]);
    }
}
