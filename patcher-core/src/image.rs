use serde::Serialize;

use crate::sector::{AddressSpace, Sector};
use crate::{Error, Result};

/// One contiguous write: `bytes` at `offset` within `sector`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PatchEdit {
    pub sector: Sector,
    pub offset: u32,
    pub bytes: Vec<u8>,
}

impl PatchEdit {
    pub fn new(sector: Sector, offset: u32, bytes: Vec<u8>) -> Self {
        Self {
            sector,
            offset,
            bytes,
        }
    }

    pub fn end(&self) -> u64 {
        self.offset as u64 + self.bytes.len() as u64
    }

    fn out_of_bounds(&self) -> Error {
        Error::OutOfBounds {
            sector: self.sector,
            offset: self.offset as u64,
            len: self.bytes.len(),
        }
    }

    /// Writes into a buffer holding just this edit's sector file.
    pub fn apply_to(&self, buf: &mut [u8]) -> Result<()> {
        let start = self.offset as usize;
        let target = buf
            .get_mut(start..start + self.bytes.len())
            .ok_or_else(|| self.out_of_bounds())?;
        target.copy_from_slice(&self.bytes);
        Ok(())
    }
}

/// Writes `edits` into a whole disc image. Every edit is checked against the
/// image before the first byte is written, so a failing call leaves the
/// image untouched.
pub fn apply_edits(image: &mut [u8], edits: &[PatchEdit], space: &dyn AddressSpace) -> Result<()> {
    let mut placed = Vec::with_capacity(edits.len());
    for edit in edits {
        let base = space
            .file_base(edit.sector)
            .ok_or_else(|| Error::UnknownSector(edit.sector.to_string()))?;
        let start = base + edit.offset as u64;
        let end = start + edit.bytes.len() as u64;
        if end > image.len() as u64 {
            return Err(Error::OutOfBounds {
                sector: edit.sector,
                offset: edit.offset as u64,
                len: edit.bytes.len(),
            });
        }
        placed.push((start as usize, edit));
    }

    for (start, edit) in placed {
        image[start..start + edit.bytes.len()].copy_from_slice(&edit.bytes);
    }
    Ok(())
}
