//! Disc sectors and the address spaces they are loaded into.
//!
//! A patch names its target by sector (a file on the disc image). Each sector
//! has a byte position inside the image and, for executables and overlays, a
//! RAM base the console loads it at. Addresses handed to the assembler also
//! carry the CPU's uncached-segment bits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::bytes::parse_hex_u32;
use crate::{Error, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Psx,
    Psp,
}

impl Platform {
    pub const SECTOR_SIZE: u64 = 2048;

    /// High bits OR'd into RAM addresses used for assembly (KSEG0 on the PSX).
    pub fn uncached_mask(self) -> u32 {
        match self {
            Platform::Psx => 0x8000_0000,
            Platform::Psp => 0x0000_0000,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Psx => write!(f, "psx"),
            Platform::Psp => write!(f, "psp"),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Sector {
    pub platform: Platform,
    pub id: u32,
}

impl Sector {
    pub fn new(platform: Platform, id: u32) -> Self {
        Self { platform, id }
    }

    pub fn psx(id: u32) -> Self {
        Self::new(Platform::Psx, id)
    }

    pub fn psp(id: u32) -> Self {
        Self::new(Platform::Psp, id)
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#X}", self.platform, self.id)
    }
}

/// Sector lookups for one platform.
pub trait AddressSpace {
    fn platform(&self) -> Platform;

    /// Byte position of the sector's first byte inside the disc image.
    fn file_base(&self, sector: Sector) -> Option<u64>;

    /// RAM address the sector's first byte is loaded at, if it is loaded.
    fn ram_base(&self, sector: Sector) -> Option<u32>;

    fn sector_by_name(&self, name: &str) -> Option<Sector>;

    fn sector_name(&self, sector: Sector) -> Option<&str>;

    fn uncached_mask(&self) -> u32 {
        self.platform().uncached_mask()
    }

    fn file_to_ram(&self, sector: Sector, file_offset: u32) -> u32 {
        let ram = match self.ram_base(sector) {
            Some(base) => file_offset.wrapping_add(base),
            None => file_offset,
        };
        ram | self.uncached_mask()
    }

    fn ram_to_file(&self, sector: Sector, ram: u32) -> u32 {
        let ram = ram & !self.uncached_mask();
        match self.ram_base(sector) {
            Some(base) => ram.wrapping_sub(base),
            None => ram,
        }
    }

    /// Resolves a sector given by name, as in `file="BATTLE_BIN"`.
    fn parse_name(&self, name: &str) -> Result<Sector> {
        self.sector_by_name(name)
            .ok_or_else(|| Error::UnknownSector(name.trim().to_string()))
    }

    /// Resolves a sector given as a hex id, as in `sector="3E8"`.
    fn parse_hex_id(&self, text: &str) -> Result<Sector> {
        parse_hex_u32(text)
            .map(|id| Sector::new(self.platform(), id))
            .ok_or_else(|| Error::Description(format!("invalid sector number '{}'", text.trim())))
    }

    /// Resolves the sector half of a `specific` entry: a decimal id or a name.
    fn parse_specific(&self, text: &str) -> Result<Sector> {
        match text.trim().parse::<u32>() {
            Ok(id) => Ok(Sector::new(self.platform(), id)),
            Err(_) => self.parse_name(text),
        }
    }

    /// Name used when writing descriptions back out.
    fn display_name(&self, sector: Sector) -> String {
        match self.sector_name(sector) {
            Some(name) => name.to_string(),
            None => sector.id.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectorEntry {
    pub name: String,
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_base: Option<u32>,
    /// Overrides `id * 2048` for files that do not start on a sector boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_base: Option<u64>,
}

impl SectorEntry {
    fn new(name: &str, id: u32, ram_base: Option<u32>) -> Self {
        Self {
            name: name.to_string(),
            id,
            ram_base,
            file_base: None,
        }
    }
}

/// A platform's sector table, either built in or loaded from JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectorTable {
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncached_mask: Option<u32>,
    pub sectors: Vec<SectorEntry>,
}

impl SectorTable {
    pub fn new(platform: Platform, sectors: Vec<SectorEntry>) -> Self {
        Self {
            platform,
            uncached_mask: None,
            sectors,
        }
    }

    pub fn psx() -> Self {
        Self::new(
            Platform::Psx,
            vec![
                SectorEntry::new("SCUS_942_21", 24, Some(0xF800)),
                SectorEntry::new("BATTLE_BIN", 1000, Some(0x67000)),
                SectorEntry::new("WORLD_WORLD_BIN", 62, Some(0xE0000)),
                SectorEntry::new("EVENT_TEST_EVT", 3707, None),
                SectorEntry::new("EVENT_ATTACK_OUT", 2448, Some(0x1BF000)),
            ],
        )
    }

    pub fn psp() -> Self {
        Self::new(
            Platform::Psp,
            vec![
                SectorEntry::new("PSP_GAME_SYSDIR_BOOT_BIN", 0x5C4, Some(0x0880_3F60)),
                SectorEntry::new("PSP_GAME_SYSDIR_EBOOT_BIN", 0x3A2, Some(0x0880_3F60)),
            ],
        )
    }

    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Psx => Self::psx(),
            Platform::Psp => Self::psp(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    fn entry(&self, sector: Sector) -> Option<&SectorEntry> {
        if sector.platform != self.platform {
            return None;
        }
        self.sectors.iter().find(|e| e.id == sector.id)
    }
}

impl AddressSpace for SectorTable {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn file_base(&self, sector: Sector) -> Option<u64> {
        if sector.platform != self.platform {
            return None;
        }
        match self.entry(sector).and_then(|e| e.file_base) {
            Some(base) => Some(base),
            None => Some(sector.id as u64 * Platform::SECTOR_SIZE),
        }
    }

    fn ram_base(&self, sector: Sector) -> Option<u32> {
        self.entry(sector).and_then(|e| e.ram_base)
    }

    fn sector_by_name(&self, name: &str) -> Option<Sector> {
        let name = name.trim();
        self.sectors
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .map(|e| Sector::new(self.platform, e.id))
    }

    fn sector_name(&self, sector: Sector) -> Option<&str> {
        self.entry(sector).map(|e| e.name.as_str())
    }

    fn uncached_mask(&self) -> u32 {
        self.uncached_mask
            .unwrap_or_else(|| self.platform.uncached_mask())
    }
}
