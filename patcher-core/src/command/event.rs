use serde::Serialize;

use super::codec::{decode_commands, encode_commands, Command};
use super::template::TemplateTable;
use super::CodecError;
use crate::bytes::le_value;

/// Size of one event slot in an event file.
pub const EVENT_SLOT_SIZE: usize = 0x2000;
/// Text offset of an event without a text section.
pub const NO_TEXT_OFFSET: u32 = 0xF2F2_F2F2;

/// One event script: `[text offset][commands][between][end]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Event {
    pub text_offset: u32,
    pub commands: Vec<Command>,
    pub between: Vec<u8>,
    pub end: Vec<u8>,
}

impl Event {
    pub fn has_text(&self) -> bool {
        self.text_offset != NO_TEXT_OFFSET
    }

    /// Where the command list ends, relative to the start of the event.
    pub fn natural_text_offset(&self) -> usize {
        4 + self.commands.iter().map(Command::byte_length).sum::<usize>()
    }
}

/// Decodes one event. Commands stop at the table's sentinel IDs.
pub fn decode_event(table: &TemplateTable, bytes: &[u8]) -> Result<Event, CodecError> {
    let header = bytes.get(..4).ok_or(CodecError::Truncated {
        what: "event text offset",
        pos: 0,
        len: bytes.len(),
    })?;
    let text_offset = le_value(header);
    let commands = decode_commands(table, &bytes[4..], table.kind().sentinel_ids());
    let natural = 4 + commands.iter().map(Command::byte_length).sum::<usize>();
    if natural > bytes.len() {
        return Err(CodecError::Truncated {
            what: "event commands",
            pos: natural,
            len: bytes.len(),
        });
    }

    let (between, end) = if text_offset == NO_TEXT_OFFSET {
        (Vec::new(), bytes[natural..].to_vec())
    } else {
        let text = text_offset as usize;
        if text > bytes.len() {
            return Err(CodecError::OffsetOutOfRange {
                what: "event text",
                offset: text,
                len: bytes.len(),
            });
        }
        let between = if text > natural {
            bytes[natural..text].to_vec()
        } else {
            Vec::new()
        };
        (between, bytes[text..].to_vec())
    };

    Ok(Event {
        text_offset,
        commands,
        between,
        end,
    })
}

pub fn encode_event(event: &Event) -> Vec<u8> {
    let mut out = event.text_offset.to_le_bytes().to_vec();
    out.extend(encode_commands(&event.commands));
    out.extend_from_slice(&event.between);
    out.extend_from_slice(&event.end);
    out
}

/// Decodes an event file slot by slot. A short final slot is decoded as it
/// is.
pub fn decode_events(table: &TemplateTable, bytes: &[u8]) -> Result<Vec<Event>, CodecError> {
    bytes
        .chunks(EVENT_SLOT_SIZE)
        .map(|slot| decode_event(table, slot))
        .collect()
}

/// Writes every event at the start of its own zero-padded slot.
pub fn encode_events(events: &[Event]) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![0u8; events.len() * EVENT_SLOT_SIZE];
    for (index, event) in events.iter().enumerate() {
        let bytes = encode_event(event);
        if bytes.len() > EVENT_SLOT_SIZE {
            return Err(CodecError::EventTooLarge {
                index,
                size: bytes.len(),
                slot: EVENT_SLOT_SIZE,
            });
        }
        let start = index * EVENT_SLOT_SIZE;
        out[start..start + bytes.len()].copy_from_slice(&bytes);
    }
    Ok(out)
}
