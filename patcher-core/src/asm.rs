//! The boundary between the patch model and an assembler.
//!
//! Patches carry assembly source that is encoded at the unit's RAM address.
//! Labels and variables are handed to the assembler as a text prefix of
//! `.label` / `.eqv` lines, so any assembler that understands those two
//! directives can sit behind [`Assembler`].

use serde::Serialize;
use std::fmt::Write;

use crate::sector::{AddressSpace, Sector};

/// Output of one [`Assembler::encode`] call. A non-empty `error_text` does not
/// make the bytes unusable; diagnostics are attached to the patch instead.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub error_text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodeCheck {
    pub is_code: bool,
    pub error_text: String,
}

/// One relocation: RAM addresses in `[location, end_location)` moved by `offset`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct BlockMove {
    pub location: u32,
    pub end_location: u32,
    pub offset: i32,
}

impl BlockMove {
    pub fn contains(&self, address: u32) -> bool {
        address >= self.location && address < self.end_location
    }

    pub fn relocate(&self, address: u32) -> u32 {
        address.wrapping_add_signed(self.offset)
    }
}

/// A relocation request in file terms: bytes `[start, end)` of `sector`
/// move by `offset`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MovePatchRange {
    pub sector: Sector,
    pub start: u32,
    pub end: u32,
    pub offset: i32,
}

impl MovePatchRange {
    pub fn new(sector: Sector, start: u32, end: u32, offset: i32) -> Self {
        Self {
            sector,
            start,
            end,
            offset,
        }
    }

    pub fn to_block_move(&self, space: &dyn AddressSpace) -> BlockMove {
        BlockMove {
            location: space.file_to_ram(self.sector, self.start),
            end_location: space.file_to_ram(self.sector, self.end),
            offset: self.offset,
        }
    }

    /// True when `len` bytes at `offset` in `sector` intersect this range.
    /// Empty spans count as one byte so that a zero-length unit sitting
    /// inside the range still moves with it.
    pub fn overlaps(&self, sector: Sector, offset: u32, len: usize) -> bool {
        if sector != self.sector {
            return false;
        }
        let start = offset as u64;
        let end = start + (len.max(1) as u64);
        start < self.end as u64 && (self.start as u64) < end
    }
}

/// Encoder contract consumed by the patch pipeline.
pub trait Assembler {
    fn encode(&self, text: &str, address: u32) -> Encoded;

    /// Rewrites address-bearing content in `bytes` (located at `address`) so
    /// that references into any moved block follow it.
    fn update_references(&self, bytes: &[u8], address: u32, moves: &[BlockMove]) -> Vec<u8>;

    fn check_code(&self, bytes: &[u8], address: u32) -> CodeCheck;

    /// Substitutes `@label` references inside literal hex text.
    fn replace_labels_in_hex(&self, text: &str, symbols: &Symbols) -> String;
}

/// Removes the characters the `.eqv` syntax cannot carry in a name.
pub fn equate_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect()
}

/// Label and equate bindings visible to a piece of assembly source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Symbols {
    labels: Vec<(String, u32)>,
    equates: Vec<(String, u32)>,
}

impl Symbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_label(&mut self, name: &str, address: u32) {
        self.labels.push((name.to_string(), address));
    }

    pub fn add_equate(&mut self, name: &str, value: u32) {
        self.equates.push((equate_name(name), value));
    }

    /// Later bindings shadow earlier ones with the same name.
    pub fn label(&self, name: &str) -> Option<u32> {
        self.labels
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn equate(&self, name: &str) -> Option<u32> {
        self.equates
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn labels(&self) -> impl Iterator<Item = (&str, u32)> {
        self.labels.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.equates.is_empty()
    }

    /// Renders the bindings as assembler directives, labels first.
    pub fn prefix(&self) -> String {
        let mut out = String::new();
        for (name, address) in &self.labels {
            let _ = writeln!(out, ".label @{}, {}", name, address);
        }
        for (name, value) in &self.equates {
            let _ = writeln!(out, ".eqv %{}, {}", name, value);
        }
        out
    }

    pub fn with_source(&self, source: &str) -> String {
        let mut text = self.prefix();
        text.push_str(source);
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::SectorTable;

    #[test]
    fn prefix_lists_labels_then_equates() {
        let mut symbols = Symbols::new();
        symbols.add_equate("Max HP, cap", 0x270F);
        symbols.add_label("hook", 0x8006_7000);

        assert_eq!(
            symbols.prefix(),
            ".label @hook, 2147905536\n.eqv %MaxHPcap, 9999\n"
        );
        assert_eq!(symbols.equate("MaxHPcap"), Some(9999));
    }

    #[test]
    fn later_labels_shadow_earlier_ones() {
        let mut symbols = Symbols::new();
        symbols.add_label("a", 1);
        symbols.add_label("a", 2);
        assert_eq!(symbols.label("a"), Some(2));
        assert_eq!(symbols.label("b"), None);
    }

    #[test]
    fn move_ranges_translate_to_ram() {
        let table = SectorTable::psx();
        let scus = Sector::psx(24);
        let range = MovePatchRange::new(scus, 0x800, 0x900, 0x40);
        let mv = range.to_block_move(&table);

        assert_eq!(mv.location, 0x8001_0000);
        assert_eq!(mv.end_location, 0x8001_0100);
        assert!(mv.contains(0x8001_00FF));
        assert!(!mv.contains(0x8001_0100));
        assert_eq!(mv.relocate(0x8001_0010), 0x8001_0050);
    }

    #[test]
    fn negative_moves_wrap_downwards() {
        let mv = BlockMove {
            location: 0x100,
            end_location: 0x200,
            offset: -0x10,
        };
        assert_eq!(mv.relocate(0x150), 0x140);
    }

    #[test]
    fn overlap_checks_sector_and_span() {
        let range = MovePatchRange::new(Sector::psx(24), 0x100, 0x200, 4);
        assert!(range.overlaps(Sector::psx(24), 0xFC, 8));
        assert!(range.overlaps(Sector::psx(24), 0x1FF, 0));
        assert!(!range.overlaps(Sector::psx(24), 0x200, 4));
        assert!(!range.overlaps(Sector::psx(25), 0x100, 4));
    }
}
