//! Little-endian and hex text helpers shared by the patch model and the codecs.

pub(crate) fn le_value(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .enumerate()
        .fold(0u32, |acc, (i, &b)| acc | ((b as u32) << (i * 8)))
}

pub(crate) fn le_bytes(value: u32, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| if i < 4 { (value >> (i * 8)) as u8 } else { 0 })
        .collect()
}

pub(crate) fn read_u16(bytes: &[u8], pos: usize) -> Option<u16> {
    let b = bytes.get(pos..pos + 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

/// Parses hex text such as `"AA BB\n0C"` into bytes. Whitespace is ignored;
/// an odd digit count or a non-hex character yields `None`.
pub(crate) fn parse_hex_bytes(text: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return None;
    }

    digits
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some(((hi << 4) | lo) as u8)
        })
        .collect()
}

pub(crate) fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02X}", b));
    }
    out
}

/// Parses a hex number, with or without a `0x` prefix.
pub(crate) fn parse_hex_u32(text: &str) -> Option<u32> {
    let t = text.trim();
    let t = t
        .strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .unwrap_or(t);
    u32::from_str_radix(t, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn le_value_reads_at_most_four_bytes() {
        assert_eq!(le_value(&[0x78, 0x56, 0x34, 0x12]), 0x1234_5678);
        assert_eq!(le_value(&[0x10]), 0x10);
        assert_eq!(le_value(&[1, 0, 0, 0, 0xFF]), 1);
    }

    #[test]
    fn le_bytes_truncates_and_pads() {
        assert_eq!(le_bytes(0x1234, 1), vec![0x34]);
        assert_eq!(le_bytes(0x1234, 3), vec![0x34, 0x12, 0x00]);
    }

    #[test]
    fn hex_text_ignores_whitespace() {
        assert_eq!(parse_hex_bytes("AA bb\n 0c"), Some(vec![0xAA, 0xBB, 0x0C]));
        assert_eq!(parse_hex_bytes("ABC"), None);
        assert_eq!(parse_hex_bytes("ZZ"), None);
        assert_eq!(parse_hex_bytes(""), Some(Vec::new()));
    }

    #[test]
    fn hex_numbers_accept_prefix() {
        assert_eq!(parse_hex_u32("0x1F"), Some(0x1F));
        assert_eq!(parse_hex_u32(" 100 "), Some(0x100));
        assert_eq!(parse_hex_u32("xyz"), None);
    }
}
