use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::command::{CommandType, TemplateTable};
use crate::sector::{Platform, SectorTable};
use crate::Result;

/// Template XML files, one per command type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTablePaths {
    pub battle: Option<PathBuf>,
    pub world: Option<PathBuf>,
    pub event: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatcherSettings {
    pub platform: Platform,
    /// JSON sector table; the built-in table for `platform` when unset.
    pub sector_table: Option<PathBuf>,
    pub command_tables: CommandTablePaths,
    pub patch_dir: Option<PathBuf>,
}

impl Default for PatcherSettings {
    fn default() -> Self {
        Self {
            platform: Platform::Psx,
            sector_table: None,
            command_tables: CommandTablePaths::default(),
            patch_dir: None,
        }
    }
}

impl PatcherSettings {
    /// Reads settings from `path`. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn sector_table(&self) -> Result<SectorTable> {
        match &self.sector_table {
            Some(path) => SectorTable::load(path),
            None => Ok(SectorTable::for_platform(self.platform)),
        }
    }

    pub fn command_table_path(&self, kind: CommandType) -> Option<&Path> {
        let paths = &self.command_tables;
        match kind {
            CommandType::BattleConditional => paths.battle.as_deref(),
            CommandType::WorldConditional => paths.world.as_deref(),
            CommandType::EventCommand => paths.event.as_deref(),
        }
    }

    /// The configured template table for `kind`, if one is set.
    pub fn command_table(&self, kind: CommandType) -> Result<Option<TemplateTable>> {
        self.command_table_path(kind)
            .map(|path| TemplateTable::load(kind, path))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::AddressSpace;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = PatcherSettings::load(&dir.path().join("none.json")).unwrap();
        assert_eq!(settings, PatcherSettings::default());
        assert_eq!(settings.sector_table().unwrap().platform(), Platform::Psx);
        assert!(settings.command_table(CommandType::EventCommand).unwrap().is_none());
    }

    #[test]
    fn settings_round_trip_and_accept_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("patcher.json");
        let settings = PatcherSettings {
            platform: Platform::Psp,
            patch_dir: Some(PathBuf::from("patches")),
            ..PatcherSettings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(PatcherSettings::load(&path).unwrap(), settings);

        fs::write(&path, r#"{ "platform": "psp", "command_tables": { "event": "ev.xml" } }"#).unwrap();
        let partial = PatcherSettings::load(&path).unwrap();
        assert_eq!(partial.platform, Platform::Psp);
        assert_eq!(
            partial.command_table_path(CommandType::EventCommand),
            Some(Path::new("ev.xml"))
        );
        assert!(partial.patch_dir.is_none());

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(PatcherSettings::load(&path), Err(crate::Error::Json(_))));
    }

    #[test]
    fn command_tables_load_from_configured_paths() {
        let dir = tempfile::tempdir().unwrap();
        let xml = dir.path().join("battle.xml");
        fs::write(&xml, r#"<Commands><Command hex="19" name="Check" /></Commands>"#).unwrap();
        let settings = PatcherSettings {
            command_tables: CommandTablePaths {
                battle: Some(xml),
                ..CommandTablePaths::default()
            },
            ..PatcherSettings::default()
        };

        let table = settings
            .command_table(CommandType::BattleConditional)
            .unwrap()
            .unwrap();
        assert_eq!(table.get(0x19).unwrap().name, "Check");
    }
}
