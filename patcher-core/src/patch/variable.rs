use std::fmt;

use crate::bytes::le_bytes;
use crate::image::PatchEdit;
use crate::sector::Sector;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    /// No (or an unrecognised) operator: the referent's value is copied.
    Copy,
}

impl Operator {
    pub fn parse(symbol: &str) -> Self {
        match symbol.trim() {
            "+" => Operator::Add,
            "-" => Operator::Subtract,
            "*" => Operator::Multiply,
            "/" => Operator::Divide,
            _ => Operator::Copy,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Copy => "",
        }
    }

    /// Unsigned 32-bit arithmetic with wraparound. `None` on division by zero.
    pub fn apply(self, value: u32, operand: u32) -> Option<u32> {
        match self {
            Operator::Add => Some(value.wrapping_add(operand)),
            Operator::Subtract => Some(value.wrapping_sub(operand)),
            Operator::Multiply => Some(value.wrapping_mul(operand)),
            Operator::Divide => value.checked_div(operand),
            Operator::Copy => Some(value),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableReference {
    pub name: String,
    pub operator: Operator,
    pub operand: u32,
}

/// A place in the image that mirrors a variable's value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VariableLocation {
    pub sector: Sector,
    pub offset: u32,
    pub ram_offset: u32,
}

/// A named little-endian value written to zero or more locations.
///
/// The value is held once; every location receives the same bytes when the
/// edit list is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    name: String,
    size: u8,
    value: u32,
    pub(crate) locations: Vec<VariableLocation>,
    reference: Option<VariableReference>,
}

impl Variable {
    /// `size` is the byte width, 1 to 4.
    pub fn new(name: impl Into<String>, size: u8, value: u32) -> Self {
        let mut var = Self {
            name: name.into(),
            size,
            value: 0,
            locations: Vec::new(),
            reference: None,
        };
        var.set_value(value);
        var
    }

    pub fn with_locations(mut self, locations: Vec<VariableLocation>) -> Self {
        self.locations = locations;
        self
    }

    pub fn with_reference(mut self, reference: VariableReference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn bytes(&self) -> Vec<u8> {
        le_bytes(self.value, self.size as usize)
    }

    pub fn locations(&self) -> &[VariableLocation] {
        &self.locations
    }

    pub fn reference(&self) -> Option<&VariableReference> {
        self.reference.as_ref()
    }

    pub fn is_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Equate-only variables have no backing location.
    pub fn is_symbol(&self) -> bool {
        self.locations.is_empty()
    }

    fn mask(&self) -> u32 {
        match self.size {
            0 => 0,
            1..=3 => (1u32 << (self.size as u32 * 8)) - 1,
            _ => u32::MAX,
        }
    }

    pub(crate) fn set_value(&mut self, value: u32) {
        self.value = value & self.mask();
    }

    pub fn edits(&self) -> Vec<PatchEdit> {
        let bytes = self.bytes();
        self.locations
            .iter()
            .map(|loc| PatchEdit::new(loc.sector, loc.offset, bytes.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_wrap_like_unsigned_words() {
        assert_eq!(Operator::Add.apply(0xFFFF_FFFF, 2), Some(1));
        assert_eq!(Operator::Subtract.apply(0, 1), Some(0xFFFF_FFFF));
        assert_eq!(Operator::Multiply.apply(0x10, 0x10), Some(0x100));
        assert_eq!(Operator::Divide.apply(0x10, 3), Some(5));
        assert_eq!(Operator::Divide.apply(0x10, 0), None);
        assert_eq!(Operator::parse("%"), Operator::Copy);
        assert_eq!(Operator::Copy.apply(7, 9), Some(7));
    }

    #[test]
    fn values_are_truncated_to_size() {
        let var = Variable::new("Damage", 1, 0x1234);
        assert_eq!(var.value(), 0x34);
        assert_eq!(var.bytes(), vec![0x34]);

        let var = Variable::new("Pointer", 4, 0x8001_0000);
        assert_eq!(var.bytes(), vec![0x00, 0x00, 0x01, 0x80]);
    }

    #[test]
    fn every_location_gets_the_same_bytes() {
        let loc = |offset| VariableLocation {
            sector: Sector::psx(24),
            offset,
            ram_offset: offset,
        };
        let var = Variable::new("Cost", 2, 0x0102).with_locations(vec![loc(0x10), loc(0x40)]);
        let edits = var.edits();
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0].offset, 0x10);
        assert_eq!(edits[1].offset, 0x40);
        assert!(edits.iter().all(|e| e.bytes == vec![0x02, 0x01]));
    }
}
