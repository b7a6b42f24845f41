//! Command-line interface and REPL
//!
//! Each line is turned into one or more action words and pushed to the
//! dispatcher. Reports come back on stdout through the console reporter.

use anyhow::{anyhow, bail, Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::debug;

use crate::action::{Action, MAX_ORDINAL};
use crate::dispatch::ActionSender;
use crate::midi::{pack_payload, parse_hex_byte, MAX_PAYLOAD_LEN};
use crate::types::{Direction, SlotIndex};

const HELP: &str = "\
Commands:
  init                     acquire the MIDI platform
  rx-list | tx-list        refresh and list RX / TX ports
  open-rx SLOT ORDINAL     bind an RX slot to a port
  open-tx SLOT ORDINAL     bind a TX slot to a port
  close-rx SLOT            release an RX slot
  close-tx SLOT            release a TX slot
  send SLOT BYTE...        send 1-4 hex bytes on a TX slot
  raw WORD...              push action words verbatim (decimal or 0x hex)
  help                     show this text
  quit                     leave";

/// A parsed REPL line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Words to push to the dispatcher, in order
    Words(Vec<u32>),
    Help,
    Quit,
    Empty,
}

/// Parse one REPL line
pub fn parse_command(line: &str) -> Result<Command> {
    let mut parts = line.split_whitespace();
    let Some(name) = parts.next() else {
        return Ok(Command::Empty);
    };
    let args: Vec<&str> = parts.collect();

    let action = match name {
        "help" | "?" => return Ok(Command::Help),
        "quit" | "exit" => return Ok(Command::Quit),
        "init" => Action::Init,
        "rx-list" => Action::Refresh(Direction::Rx),
        "tx-list" => Action::Refresh(Direction::Tx),
        "open-rx" | "open-tx" => {
            let [slot, ordinal] = expect_args::<2>(name, &args)?;
            Action::Open {
                direction: direction_of(name),
                slot: parse_slot(slot)?,
                ordinal: parse_ordinal(ordinal)?,
            }
        }
        "close-rx" | "close-tx" => {
            let [slot] = expect_args::<1>(name, &args)?;
            Action::Close {
                direction: direction_of(name),
                slot: parse_slot(slot)?,
            }
        }
        "send" => return parse_send(&args),
        "raw" => {
            if args.is_empty() {
                bail!("raw needs at least one word");
            }
            let words = args
                .iter()
                .map(|w| parse_word(w))
                .collect::<Result<Vec<u32>>>()?;
            return Ok(Command::Words(words));
        }
        other => bail!("unknown command '{}', try 'help'", other),
    };

    Ok(Command::Words(vec![action.encode()]))
}

fn parse_send(args: &[&str]) -> Result<Command> {
    let Some((slot, bytes)) = args.split_first() else {
        bail!("usage: send SLOT BYTE...");
    };
    let slot = parse_slot(slot)?;
    if bytes.is_empty() || bytes.len() > MAX_PAYLOAD_LEN {
        bail!("send takes 1 to {} bytes", MAX_PAYLOAD_LEN);
    }

    let bytes = bytes
        .iter()
        .map(|b| parse_hex_byte(b).ok_or_else(|| anyhow!("'{}' is not a hex byte", b)))
        .collect::<Result<Vec<u8>>>()?;
    let (payload, len) =
        pack_payload(&bytes).ok_or_else(|| anyhow!("cannot pack {} bytes", bytes.len()))?;

    Ok(Command::Words(vec![
        Action::Send { slot, len }.encode(),
        payload,
    ]))
}

fn expect_args<'a, const N: usize>(name: &str, args: &[&'a str]) -> Result<[&'a str; N]> {
    <[&str; N]>::try_from(args)
        .map_err(|_| anyhow!("{} takes {} argument(s), got {}", name, N, args.len()))
}

fn direction_of(name: &str) -> Direction {
    if name.ends_with("-rx") {
        Direction::Rx
    } else {
        Direction::Tx
    }
}

fn parse_slot(text: &str) -> Result<SlotIndex> {
    let value: u8 = text
        .parse()
        .with_context(|| format!("invalid slot '{}'", text))?;
    SlotIndex::new(value).ok_or_else(|| anyhow!("slot {} out of range 0-15", value))
}

fn parse_ordinal(text: &str) -> Result<u32> {
    let value: u32 = text
        .parse()
        .with_context(|| format!("invalid port ordinal '{}'", text))?;
    if value > MAX_ORDINAL {
        bail!("port ordinal {} exceeds {}", value, MAX_ORDINAL);
    }
    Ok(value)
}

fn parse_word(text: &str) -> Result<u32> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.with_context(|| format!("invalid action word '{}'", text))
}

/// Blocking REPL; returns when the user quits, input ends, or the dispatcher
/// stops.
pub fn run_repl(sender: ActionSender) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("Type 'help' for commands");

    loop {
        let line = match rl.readline("midislot> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        match parse_command(&line) {
            Ok(Command::Empty) => continue,
            Ok(Command::Help) => println!("{}", HELP),
            Ok(Command::Quit) => break,
            Ok(Command::Words(words)) => {
                let _ = rl.add_history_entry(line.as_str());
                for word in words {
                    debug!("Queue action word {:#010X}", word);
                    sender.send(word)?;
                }
            }
            Err(e) => eprintln!("{}", e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(line: &str) -> Vec<u32> {
        match parse_command(line).unwrap() {
            Command::Words(words) => words,
            other => panic!("expected words, got {:?}", other),
        }
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(words("init"), vec![7]);
        assert_eq!(words("rx-list"), vec![0]);
        assert_eq!(words("  tx-list  "), vec![1]);
        assert_eq!(parse_command("").unwrap(), Command::Empty);
        assert_eq!(parse_command("help").unwrap(), Command::Help);
        assert_eq!(parse_command("quit").unwrap(), Command::Quit);
    }

    #[test]
    fn test_open_and_close() {
        assert_eq!(words("open-tx 3 2"), vec![0x0000_2303]);
        assert_eq!(words("open-rx 15 1"), vec![0x0000_1F04]);
        assert_eq!(words("close-tx 1"), vec![0x0000_0105]);
        assert_eq!(words("close-rx 0"), vec![0x0000_0006]);
    }

    #[test]
    fn test_send_packs_payload() {
        assert_eq!(words("send 2 90 40 7F"), vec![0x0000_3202, 0x0090_407F]);
        assert_eq!(words("send 0 0xF8"), vec![0x0000_1002, 0x0000_00F8]);
    }

    #[test]
    fn test_raw_words() {
        assert_eq!(words("raw 7 0x3002 0xDEADBEEF"), vec![7, 0x3002, 0xDEAD_BEEF]);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse_command("open-tx 16 0").is_err());
        assert!(parse_command("open-tx 1").is_err());
        assert!(parse_command("open-rx 1 1048576").is_err());
        assert!(parse_command("close-rx x").is_err());
        assert!(parse_command("send 1").is_err());
        assert!(parse_command("send 1 01 02 03 04 05").is_err());
        assert!(parse_command("send 1 GG").is_err());
        assert!(parse_command("raw").is_err());
        assert!(parse_command("raw 0xZZ").is_err());
        assert!(parse_command("frobnicate").is_err());
    }
}
