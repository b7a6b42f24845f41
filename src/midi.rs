//! Raw MIDI byte helpers
//!
//! Bytes are passed through opaquely; the only structure is the count.
//! A send payload travels as a 32-bit word, least significant byte first.

/// Maximum number of bytes a payload word can carry
pub const MAX_PAYLOAD_LEN: usize = 4;

/// Serialize a payload word and keep its first `len` bytes.
///
/// Returns `None` when `len` is outside `1..=4`.
pub fn unpack_payload(word: u32, len: usize) -> Option<Vec<u8>> {
    if len == 0 || len > MAX_PAYLOAD_LEN {
        return None;
    }
    Some(word.to_le_bytes()[..len].to_vec())
}

/// Pack up to four bytes into a payload word and its byte count
pub fn pack_payload(bytes: &[u8]) -> Option<(u32, u8)> {
    if bytes.is_empty() || bytes.len() > MAX_PAYLOAD_LEN {
        return None;
    }
    let mut buf = [0u8; MAX_PAYLOAD_LEN];
    buf[..bytes.len()].copy_from_slice(bytes);
    Some((u32::from_le_bytes(buf), bytes.len() as u8))
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a byte written as hex, with or without a `0x` prefix
pub fn parse_hex_byte(text: &str) -> Option<u8> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u8::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_note_on() {
        // Note On ch1, note 0x40, velocity 0x7F stored LSB first
        let bytes = unpack_payload(0x0090_407F, 3).unwrap();
        assert_eq!(bytes, vec![0x7F, 0x40, 0x90]);
    }

    #[test]
    fn test_unpack_keeps_only_prefix() {
        assert_eq!(unpack_payload(0xAABB_CCDD, 1).unwrap(), vec![0xDD]);
        assert_eq!(
            unpack_payload(0xAABB_CCDD, 4).unwrap(),
            vec![0xDD, 0xCC, 0xBB, 0xAA]
        );
    }

    #[test]
    fn test_unpack_rejects_bad_length() {
        assert!(unpack_payload(0x1234, 0).is_none());
        assert!(unpack_payload(0x1234, 5).is_none());
        assert!(unpack_payload(0x1234, 15).is_none());
    }

    #[test]
    fn test_pack_payload() {
        assert_eq!(pack_payload(&[0x90, 0x40, 0x7F]), Some((0x007F_4090, 3)));
        assert_eq!(pack_payload(&[0xF8]), Some((0xF8, 1)));
        assert!(pack_payload(&[]).is_none());
        assert!(pack_payload(&[1, 2, 3, 4, 5]).is_none());
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x90, 0x3C, 0x64]), "90 3C 64");
        assert_eq!(format_hex(&[]), "");
    }

    #[test]
    fn test_parse_hex_byte() {
        assert_eq!(parse_hex_byte("7f"), Some(0x7F));
        assert_eq!(parse_hex_byte("0x90"), Some(0x90));
        assert_eq!(parse_hex_byte("100"), None);
        assert_eq!(parse_hex_byte("zz"), None);
    }
}
