use serde::Serialize;

use super::codec::{decode_commands, encode_commands, Command};
use super::template::TemplateTable;
use super::CodecError;
use crate::bytes::read_u16;

/// One entry of a conditional table: blocks of commands, addressed only by
/// position.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConditionalSet {
    pub blocks: Vec<Vec<Command>>,
}

impl ConditionalSet {
    pub fn new(blocks: Vec<Vec<Command>>) -> Self {
        Self { blocks }
    }
}

fn u16_at(bytes: &[u8], pos: usize, what: &'static str) -> Result<usize, CodecError> {
    read_u16(bytes, pos)
        .map(usize::from)
        .ok_or(CodecError::Truncated {
            what,
            pos,
            len: bytes.len(),
        })
}

/// Start of the command region: the first nonzero block offset at or after
/// `from`, or the end of the buffer when every block list is empty.
fn command_region_start(bytes: &[u8], from: usize) -> usize {
    (from..bytes.len().saturating_sub(1))
        .step_by(2)
        .filter_map(|pos| read_u16(bytes, pos))
        .find(|&offset| offset != 0)
        .map_or(bytes.len(), usize::from)
}

/// Decodes a set table, its block tables and their command regions.
///
/// A block runs from its offset to the next block offset. The last block of
/// a set ends at the first block of the next nonempty set, or at the end of
/// the buffer.
pub fn decode_conditional_sets(table: &TemplateTable, bytes: &[u8]) -> Result<Vec<ConditionalSet>, CodecError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let set_count = u16_at(bytes, 0, "set table")? / 2;
    let set_offsets = (0..set_count)
        .map(|i| u16_at(bytes, i * 2, "set table"))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(&bad) = set_offsets.iter().find(|&&o| o >= bytes.len()) {
        return Err(CodecError::OffsetOutOfRange {
            what: "set",
            offset: bad,
            len: bytes.len(),
        });
    }
    let Some(&first_set) = set_offsets.first() else {
        return Ok(Vec::new());
    };
    let region_start = command_region_start(bytes, first_set);

    let mut sets = Vec::with_capacity(set_count);
    for (index, &start) in set_offsets.iter().enumerate() {
        let end = set_offsets.get(index + 1).copied().unwrap_or(region_start);

        let mut blocks = Vec::new();
        let mut prev = 0;
        for pos in (start..end).step_by(2) {
            let block = u16_at(bytes, pos, "block table")?;
            if prev != 0 {
                let mut stop = block;
                let mut next = index + 1;
                while stop == 0 {
                    stop = match set_offsets.get(next) {
                        Some(&o) => u16_at(bytes, o, "block table")?,
                        None => bytes.len(),
                    };
                    next += 1;
                }
                if prev > stop || stop > bytes.len() {
                    return Err(CodecError::OffsetOutOfRange {
                        what: "block",
                        offset: stop.max(prev),
                        len: bytes.len(),
                    });
                }
                blocks.push(decode_commands(table, &bytes[prev..stop], &[]));
            }
            prev = block;
        }
        sets.push(ConditionalSet { blocks });
    }
    Ok(sets)
}

fn offset16(value: usize) -> Result<[u8; 2], CodecError> {
    u16::try_from(value)
        .map(u16::to_le_bytes)
        .map_err(|_| CodecError::OffsetOverflow(value))
}

/// Lays out the set table, then every set's block offsets with a zero
/// terminator each, then the commands of every block in order.
pub fn encode_conditional_sets(sets: &[ConditionalSet]) -> Result<Vec<u8>, CodecError> {
    let set_count = sets.len();
    let block_count: usize = sets.iter().map(|s| s.blocks.len()).sum();

    let mut set_table = Vec::with_capacity(set_count * 2);
    let mut block_table = Vec::with_capacity((block_count + set_count) * 2);
    let mut commands = Vec::new();

    let mut set_ref = set_count * 2;
    let mut block_ref = set_ref + (block_count + set_count) * 2;
    for set in sets {
        set_table.extend(offset16(set_ref)?);
        for block in &set.blocks {
            block_table.extend(offset16(block_ref)?);
            let bytes = encode_commands(block);
            block_ref += bytes.len();
            commands.extend(bytes);
            set_ref += 2;
        }
        block_table.extend([0, 0]);
        set_ref += 2;
    }

    let mut out = set_table;
    out.extend(block_table);
    out.extend(commands);
    Ok(out)
}
