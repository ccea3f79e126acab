use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

pub mod asm;
mod bytes;
pub mod command;
pub mod description;
pub mod directive;
pub mod image;
pub mod patch;
pub mod sector;
pub mod settings;

pub use asm::{Assembler, BlockMove, CodeCheck, Encoded, MovePatchRange, Symbols};
pub use command::{
    decode_command, decode_commands, decode_conditional_sets, decode_event, decode_events,
    encode_command, encode_commands, encode_conditional_sets, encode_event, encode_events,
    CodecError, Command, CommandParameter, CommandTemplate, CommandType, ConditionalSet,
    DisplayMode, Event, ParameterTemplate, ParameterType, TemplateTable, EVENT_SLOT_SIZE,
    NO_TEXT_OFFSET,
};
pub use description::PatchReader;
pub use directive::{DirectiveAssembler, DirectiveError};
pub use image::{apply_edits, PatchEdit};
pub use patch::{
    write_patches_xml, Operator, PatchSet, PatchSetBuilder, PatchUnit, UnitSource, Variable,
    VariableLocation, VariableReference,
};
pub use sector::{AddressSpace, Platform, Sector, SectorEntry, SectorTable};
pub use settings::{CommandTablePaths, PatcherSettings};

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed patch XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("description error: {0}")]
    Description(String),
    #[error("address error: {0}")]
    Address(String),
    #[error("unknown sector '{0}'")]
    UnknownSector(String),
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("input file is {actual:#X} bytes, expected {expected:#X}")]
    InputLength { expected: u32, actual: usize },
    #[error("edit of {len:#X} bytes at {sector} offset {offset:#X} is outside the target")]
    OutOfBounds { sector: Sector, offset: u64, len: usize },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for failures that drop a whole description file.
    pub fn is_description_failure(&self) -> bool {
        matches!(
            self,
            Error::Xml(_)
                | Error::Description(_)
                | Error::Address(_)
                | Error::UnknownSector(_)
                | Error::UnknownVariable(_)
                | Error::Io(_)
        )
    }
}

fn is_xml_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("xml"))
}

/// Loads every `*.xml` patch description below `dir`.
///
/// Files are read in path order. A file that fails to parse contributes no
/// patches; the failure is logged and loading carries on with the next file.
pub fn load_patch_directory(
    dir: &Path,
    space: &dyn AddressSpace,
    assembler: &dyn Assembler,
) -> Result<Vec<PatchSet>> {
    if !dir.is_dir() {
        return Err(Error::Description(format!(
            "patch directory does not exist: {}",
            dir.display()
        )));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_xml_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();

    let reader = PatchReader::new(space, assembler);
    let mut patches = Vec::new();
    for file in &files {
        match reader.read_file(file) {
            Ok(loaded) => {
                info!("Loaded {} patches from {}", loaded.len(), file.display());
                patches.extend(loaded);
            }
            Err(err) if err.is_description_failure() => {
                warn!("Skipping {}: {}", file.display(), err);
            }
            Err(err) => return Err(err),
        }
    }

    Ok(patches)
}
