//! Template-driven codecs for the script command streams stored in the
//! image's data files: flat command lists, two-level conditional-set tables
//! and fixed-size event slots.

mod codec;
mod conditional;
mod event;
mod template;

use thiserror::Error;

pub use codec::{decode_command, decode_commands, encode_command, encode_commands, Command, CommandParameter};
pub use conditional::{decode_conditional_sets, encode_conditional_sets, ConditionalSet};
pub use event::{decode_event, decode_events, encode_event, encode_events, Event, EVENT_SLOT_SIZE, NO_TEXT_OFFSET};
pub use template::{
    CommandTemplate, CommandType, DisplayMode, ParameterTemplate, ParameterType, TemplateTable,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer of {len:#X} bytes is too short to read {what} at {pos:#X}")]
    Truncated {
        what: &'static str,
        pos: usize,
        len: usize,
    },
    #[error("{what} offset {offset:#X} is outside the {len:#X}-byte buffer")]
    OffsetOutOfRange {
        what: &'static str,
        offset: usize,
        len: usize,
    },
    #[error("conditional-set table needs offset {0:#X}, which does not fit in 16 bits")]
    OffsetOverflow(usize),
    #[error("event {index} encodes to {size:#X} bytes, larger than its {slot:#X}-byte slot")]
    EventTooLarge { index: usize, size: usize, slot: usize },
}
