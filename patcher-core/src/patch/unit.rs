use std::path::{Path, PathBuf};

use crate::image::PatchEdit;
use crate::sector::Sector;

/// Where a unit's bytes come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitSource {
    /// Hex text or assembly given in the description.
    Inline,
    /// A user-selected file of a fixed length, loaded before applying.
    InputFile {
        path: Option<PathBuf>,
        expected_length: u32,
    },
    /// A whole file streamed over the sector from offset 0.
    Stream { path: PathBuf },
}

/// One addressable byte range of a patch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchUnit {
    pub(crate) sector: Sector,
    pub(crate) offset: u32,
    pub(crate) ram_offset: u32,
    pub(crate) bytes: Vec<u8>,
    pub(crate) source: UnitSource,
    pub(crate) asm_text: Option<String>,
    /// Hex text with `@label` references, re-resolved on every update.
    pub(crate) label_source: Option<String>,
    pub(crate) marked_as_data: bool,
    pub(crate) sequential: bool,
    pub(crate) move_simple: bool,
    pub(crate) checked_code: bool,
    pub(crate) label: Option<String>,
    pub(crate) error_text: String,
    pub(crate) check_text: String,
}

impl PatchUnit {
    pub fn new(sector: Sector, offset: u32, bytes: Vec<u8>) -> Self {
        Self {
            sector,
            offset,
            ram_offset: offset,
            bytes,
            source: UnitSource::Inline,
            asm_text: None,
            label_source: None,
            marked_as_data: false,
            sequential: false,
            move_simple: false,
            checked_code: false,
            label: None,
            error_text: String::new(),
            check_text: String::new(),
        }
    }

    pub fn input_file(sector: Sector, offset: u32, expected_length: u32) -> Self {
        let mut unit = Self::new(sector, offset, Vec::new());
        unit.source = UnitSource::InputFile {
            path: None,
            expected_length,
        };
        unit
    }

    pub fn stream(sector: Sector, path: PathBuf, bytes: Vec<u8>) -> Self {
        let mut unit = Self::new(sector, 0, bytes);
        unit.source = UnitSource::Stream { path };
        unit
    }

    pub fn with_ram_offset(mut self, ram_offset: u32) -> Self {
        self.ram_offset = ram_offset;
        self
    }

    /// Marks the unit as assembled from `text`. Assembly units are simple
    /// moves unless told otherwise.
    pub fn with_asm(mut self, text: impl Into<String>) -> Self {
        self.asm_text = Some(text.into());
        self.move_simple = true;
        self
    }

    pub fn with_label_source(mut self, text: impl Into<String>) -> Self {
        self.label_source = Some(text.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        self.label = if label.is_empty() { None } else { Some(label) };
        self
    }

    pub fn with_sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    pub fn with_move_simple(mut self, move_simple: bool) -> Self {
        self.move_simple = move_simple;
        self
    }

    pub fn with_data_marker(mut self, marked_as_data: bool) -> Self {
        self.marked_as_data = marked_as_data;
        self
    }

    pub fn with_checked_code(mut self, checked_code: bool) -> Self {
        self.checked_code = checked_code;
        self
    }

    pub fn sector(&self) -> Sector {
        self.sector
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn ram_offset(&self) -> u32 {
        self.ram_offset
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn end(&self) -> u64 {
        self.offset as u64 + self.bytes.len() as u64
    }

    pub fn source(&self) -> &UnitSource {
        &self.source
    }

    pub fn is_input_file(&self) -> bool {
        matches!(self.source, UnitSource::InputFile { .. })
    }

    pub fn input_path(&self) -> Option<&Path> {
        match &self.source {
            UnitSource::InputFile { path, .. } => path.as_deref(),
            UnitSource::Stream { path } => Some(path),
            UnitSource::Inline => None,
        }
    }

    pub fn is_asm(&self) -> bool {
        self.asm_text.is_some()
    }

    pub fn asm_text(&self) -> Option<&str> {
        self.asm_text.as_deref()
    }

    pub fn label_source(&self) -> Option<&str> {
        self.label_source.as_deref()
    }

    pub fn is_marked_as_data(&self) -> bool {
        self.marked_as_data
    }

    /// Offset was computed as the end of the previous unit.
    pub fn is_sequential(&self) -> bool {
        self.sequential
    }

    pub fn is_move_simple(&self) -> bool {
        self.move_simple
    }

    pub fn is_checked_code(&self) -> bool {
        self.checked_code
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn error_text(&self) -> &str {
        &self.error_text
    }

    pub fn check_text(&self) -> &str {
        &self.check_text
    }

    pub(crate) fn shift(&mut self, by: i32) {
        self.offset = self.offset.wrapping_add_signed(by);
        self.ram_offset = self.ram_offset.wrapping_add_signed(by);
    }

    pub fn to_edit(&self) -> PatchEdit {
        PatchEdit::new(self.sector, self.offset, self.bytes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asm_units_default_to_simple_moves() {
        let unit = PatchUnit::new(Sector::psx(24), 0x10, vec![0; 4]).with_asm(".word 0");
        assert!(unit.is_asm());
        assert!(unit.is_move_simple());

        let unit = unit.with_move_simple(false);
        assert!(!unit.is_move_simple());
    }

    #[test]
    fn empty_labels_are_dropped() {
        let unit = PatchUnit::new(Sector::psx(24), 0, Vec::new()).with_label("");
        assert_eq!(unit.label(), None);
    }

    #[test]
    fn shifting_moves_both_offsets() {
        let mut unit = PatchUnit::new(Sector::psx(24), 0x100, vec![1, 2])
            .with_ram_offset(0x8001_0100);
        unit.shift(-0x10);
        assert_eq!(unit.offset(), 0xF0);
        assert_eq!(unit.ram_offset(), 0x8001_00F0);
        assert_eq!(unit.end(), 0xF2);
    }
}
