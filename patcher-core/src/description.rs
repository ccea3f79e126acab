//! Reads XML patch descriptions into [`PatchSet`]s.
//!
//! A document is `<Patches>` holding `<Patch>` and `<ImportFilePatch>`
//! elements. A patch's locations are resolved in order: an omitted offset
//! continues where the previous location ended, an omitted sector falls back
//! to the patch default and then to the previous location's sector.
//! Any structural problem rejects the whole document.

use roxmltree::{Document, Node};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::asm::Assembler;
use crate::bytes::{parse_hex_bytes, parse_hex_u32};
use crate::patch::{
    aggregate_errors, symbols_for, Operator, PatchSet, PatchSetBuilder, PatchUnit, Variable,
    VariableLocation, VariableReference,
};
use crate::sector::{AddressSpace, Sector};
use crate::{Error, Result};

fn children<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |c| c.is_element() && c.has_tag_name(tag))
}

fn inner_text(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

/// Attribute flags are on only for a literal `true`.
fn flag(node: Node<'_, '_>, attr: &str) -> bool {
    node.attribute(attr)
        .map_or(false, |v| v.trim().eq_ignore_ascii_case("true"))
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn required<'a>(node: Node<'a, '_>, attr: &str) -> Result<&'a str> {
    node.attribute(attr).ok_or_else(|| {
        Error::Description(format!(
            "<{}> is missing the '{}' attribute",
            node.tag_name().name(),
            attr
        ))
    })
}

fn hex_attr(text: &str, what: &str) -> Result<u32> {
    parse_hex_u32(text).ok_or_else(|| Error::Description(format!("invalid {} '{}'", what, text)))
}

/// `align` as written; a missing, unparsable or negative value means none.
fn alignment(node: Node<'_, '_>, default: u32) -> u32 {
    match node.attribute("align") {
        Some(text) => text
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|a| *a > 0 && *a <= u32::MAX as i64)
            .map_or(0, |a| a as u32),
        None => default,
    }
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Where the previous location ended, for chaining.
#[derive(Copy, Clone)]
struct Previous {
    sector: Sector,
    end: u64,
}

struct Target {
    sector: Sector,
    offset: u32,
    ram_offset: u32,
}

struct Placement {
    targets: Vec<Target>,
    sequential: bool,
}

/// Parses patch descriptions against one address space and assembler.
pub struct PatchReader<'a> {
    space: &'a dyn AddressSpace,
    assembler: &'a dyn Assembler,
    base_dir: Option<PathBuf>,
}

impl<'a> PatchReader<'a> {
    pub fn new(space: &'a dyn AddressSpace, assembler: &'a dyn Assembler) -> Self {
        Self {
            space,
            assembler,
            base_dir: None,
        }
    }

    /// Directory that `inputFile` and `STRLocation input` paths are relative to.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<PatchSet>> {
        let text = fs::read_to_string(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base = self
            .base_dir
            .clone()
            .or_else(|| path.parent().map(Path::to_path_buf));
        self.read_document(&text, &filename, base.as_deref())
    }

    /// Parses `xml`; `filename` is recorded on every resulting patch.
    pub fn read(&self, xml: &str, filename: &str) -> Result<Vec<PatchSet>> {
        self.read_document(xml, filename, self.base_dir.as_deref())
    }

    fn read_document(&self, xml: &str, filename: &str, base_dir: Option<&Path>) -> Result<Vec<PatchSet>> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();
        if !root.has_tag_name("Patches") {
            return Err(Error::Description(format!(
                "expected <Patches> root, found <{}>",
                root.tag_name().name()
            )));
        }

        let ctx = DocReader {
            space: self.space,
            assembler: self.assembler,
            base_dir,
            filename,
            root_hide_in_default: flag(root, "hideInDefault"),
            root_hidden: flag(root, "hidden"),
        };

        let mut result: Vec<PatchSet> = Vec::new();
        for node in children(root, "Patch") {
            if let Some(ignore) = node.attribute("ignore") {
                let ignore = parse_bool(ignore).ok_or_else(|| {
                    Error::Description(format!("invalid ignore value '{}'", ignore))
                })?;
                if ignore {
                    continue;
                }
            }
            let patch = ctx.patch(node, &result)?;
            result.push(patch);
        }

        for node in children(root, "ImportFilePatch") {
            if let Some(patch) = ctx.import_file_patch(node)? {
                result.push(patch);
            }
        }

        Ok(result)
    }
}

struct DocReader<'a> {
    space: &'a dyn AddressSpace,
    assembler: &'a dyn Assembler,
    base_dir: Option<&'a Path>,
    filename: &'a str,
    root_hide_in_default: bool,
    root_hidden: bool,
}

impl DocReader<'_> {
    fn resolve(&self, path: &str) -> PathBuf {
        match self.base_dir {
            Some(dir) => dir.join(path.trim()),
            None => PathBuf::from(path.trim()),
        }
    }

    fn name_and_description(&self, node: Node<'_, '_>) -> Result<(String, String)> {
        let name = required(node, "name")?.to_string();
        let description = children(node, "Description")
            .next()
            .map(|d| inner_text(d).trim().to_string())
            .unwrap_or_else(|| name.clone());
        Ok((name, description))
    }

    /// The sector named by a `file` (name) or `sector` (hex id) attribute.
    fn explicit_sector(&self, node: Node<'_, '_>) -> Result<Option<Sector>> {
        if let Some(name) = node.attribute("file") {
            return self.space.parse_name(name).map(Some);
        }
        if let Some(id) = node.attribute("sector") {
            return self.space.parse_hex_id(id).map(Some);
        }
        Ok(None)
    }

    /// Entries of a `specific="FILE:OFFSET,OFFSET,..."` list. An entry
    /// without a sector reuses the one before it.
    fn specifics(&self, node: Node<'_, '_>, default: Option<Sector>) -> Result<Vec<(Sector, String)>> {
        let text = strip_whitespace(node.attribute("specific").unwrap_or(""));
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let mut last = default;
        let mut out = Vec::new();
        for entry in text.split(',') {
            let (sector, offset) = match entry.split_once(':') {
                Some((sector, offset)) => (self.space.parse_specific(sector)?, offset),
                None => {
                    let sector = last.ok_or_else(|| {
                        Error::Address(format!("specific entry '{}' has no sector", entry))
                    })?;
                    (sector, entry)
                }
            };
            last = Some(sector);
            out.push((sector, offset.to_string()));
        }
        Ok(out)
    }

    fn place(
        &self,
        node: Node<'_, '_>,
        default_sector: Option<Sector>,
        previous: Option<Previous>,
        align: u32,
    ) -> Result<Placement> {
        let tag = node.tag_name().name();
        let specifics = self.specifics(node, default_sector)?;
        let offset_text = strip_whitespace(node.attribute("offset").unwrap_or(""));

        let mut chained = false;
        let mut sequential = false;
        let offsets: Vec<u32> = if !specifics.is_empty() {
            specifics
                .iter()
                .map(|(_, o)| hex_attr(o, "offset"))
                .collect::<Result<_>>()?
        } else if offset_text.is_empty() {
            let prev = previous
                .ok_or_else(|| Error::Address(format!("<{}> has no offset", tag)))?;
            let mut offset = prev.end;
            chained = true;
            sequential = true;
            if align > 0 && offset % align as u64 != 0 {
                offset += align as u64 - offset % align as u64;
                sequential = false;
            }
            let offset = u32::try_from(offset)
                .map_err(|_| Error::Address(format!("<{}> chained past the address range", tag)))?;
            vec![offset]
        } else {
            offset_text
                .split(',')
                .map(|o| hex_attr(o, "offset"))
                .collect::<Result<_>>()?
        };

        let sector = match specifics.first() {
            Some((sector, _)) => *sector,
            None => self
                .explicit_sector(node)?
                .or(default_sector)
                .or(previous.map(|p| p.sector))
                .ok_or_else(|| Error::Address(format!("<{}> has no file or sector", tag)))?,
        };

        let ram_mode = !chained
            && node
                .attribute("offsetMode")
                .map_or(false, |m| m.trim().eq_ignore_ascii_case("ram"));

        let targets = offsets
            .into_iter()
            .enumerate()
            .map(|(i, offset)| {
                let sector = specifics.get(i).map_or(sector, |(s, _)| *s);
                if ram_mode {
                    Target {
                        sector,
                        offset: self.space.ram_to_file(sector, offset),
                        ram_offset: offset | self.space.uncached_mask(),
                    }
                } else {
                    Target {
                        sector,
                        offset,
                        ram_offset: self.space.file_to_ram(sector, offset),
                    }
                }
            })
            .collect();

        Ok(Placement { targets, sequential })
    }

    fn patch(&self, node: Node<'_, '_>, earlier: &[PatchSet]) -> Result<PatchSet> {
        let (name, description) = self.name_and_description(node)?;
        let default_sector = self.explicit_sector(node)?;

        let mut variables: Vec<Variable> = Vec::new();
        let mut included: Vec<PatchUnit> = Vec::new();
        for include in children(node, "Include") {
            let Some(target) = include.attribute("patch") else {
                continue;
            };
            let key = target.trim().to_lowercase();
            let mut found = false;
            for other in earlier.iter().filter(|p| p.name().trim().to_lowercase() == key) {
                found = true;
                for var in other.variables() {
                    if !variables.iter().any(|v| v.name() == var.name()) {
                        variables.push(var.clone());
                    }
                }
                included.extend(other.includable_units().cloned());
            }
            if !found {
                warn!("{}: patch '{}' includes unknown patch '{}'", self.filename, name, target.trim());
            }
        }

        for var_node in children(node, "Variable") {
            let var = self.variable(var_node, default_sector, variables.last())?;
            variables.push(var);
        }

        let (own, error_text) = self.locations(node, &name, default_sector, &included, &variables)?;

        let mut builder = PatchSetBuilder::new(name.as_str())
            .filename(self.filename)
            .description(description)
            .hide_in_default(flag(node, "hideInDefault") || self.root_hide_in_default)
            .hidden(flag(node, "hidden") || self.root_hidden);
        for unit in included.into_iter().chain(own) {
            builder.push_unit(unit);
        }
        for str_node in children(node, "STRLocation") {
            builder.push_unit(self.stream_location(str_node)?);
        }
        for var in variables {
            builder.push_variable(var);
        }
        builder.append_error(&error_text);

        let patch = builder.build()?;
        debug!(
            "Parsed patch '{}' ({} units, {} variables)",
            patch.name(),
            patch.units().len(),
            patch.variables().len()
        );
        Ok(patch)
    }

    fn variable(
        &self,
        node: Node<'_, '_>,
        default_sector: Option<Sector>,
        last: Option<&Variable>,
    ) -> Result<Variable> {
        let name = required(node, "name")?;
        let size = match node.attribute("bytes") {
            Some(text) => text
                .trim()
                .parse::<u32>()
                .map(|n| (n & 0xFF) as u8)
                .map_err(|_| Error::Description(format!("invalid bytes '{}' on variable '{}'", text, name)))?,
            None => 1,
        };
        if !(1..=4).contains(&size) {
            return Err(Error::Description(format!(
                "variable '{}' must be 1 to 4 bytes, got {}",
                name, size
            )));
        }

        let is_symbol = node
            .attribute("symbol")
            .map_or(false, |s| matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"));

        let locations = if is_symbol {
            Vec::new()
        } else {
            let previous = last.and_then(|v| {
                v.locations().last().map(|loc| Previous {
                    sector: loc.sector,
                    end: loc.offset as u64 + v.size() as u64,
                })
            });
            self.place(node, default_sector, previous, alignment(node, 0))?
                .targets
                .into_iter()
                .map(|t| VariableLocation {
                    sector: t.sector,
                    offset: t.offset,
                    ram_offset: t.ram_offset,
                })
                .collect()
        };

        let value = match node.attribute("default") {
            Some(text) => hex_attr(text, "default")?,
            None => 0,
        };

        let mut var = Variable::new(name, size, value).with_locations(locations);
        if let Some(reference) = node.attribute("reference") {
            var = var.with_reference(VariableReference {
                name: reference.trim().to_string(),
                operator: Operator::parse(node.attribute("operator").unwrap_or("")),
                operand: node
                    .attribute("operand")
                    .and_then(parse_hex_u32)
                    .unwrap_or(0),
            });
        }
        Ok(var)
    }

    /// Builds the patch's own `<Location>` units and returns them with the
    /// patch's diagnostic text.
    ///
    /// Assembly is encoded twice: once while reading, with the labels known
    /// so far (which fixes each unit's length for chaining), and once at the
    /// end with every label, which is the encoding kept.
    fn locations(
        &self,
        node: Node<'_, '_>,
        patch_name: &str,
        default_sector: Option<Sector>,
        included: &[PatchUnit],
        variables: &[Variable],
    ) -> Result<(Vec<PatchUnit>, String)> {
        let mut own: Vec<PatchUnit> = Vec::new();

        for loc in children(node, "Location") {
            let mode = loc.attribute("mode").map(|m| m.trim().to_ascii_lowercase());
            let is_asm = mode.as_deref() == Some("asm");
            let marked_as_data = mode.as_deref() == Some("data");
            let align = alignment(loc, if is_asm { 4 } else { 0 });

            let previous = own.last().map(|u| Previous {
                sector: u.sector(),
                end: u.end(),
            });
            let placement = self.place(loc, default_sector, previous, align)?;

            let content = match loc.attribute("inputFile") {
                Some(path) => fs::read_to_string(self.resolve(path))?,
                None => inner_text(loc),
            };
            let replace_labels = !is_asm && flag(loc, "replaceLabels");
            let label = loc.attribute("label").map(|l| l.replace(' ', "")).unwrap_or_default();
            let move_simple = match loc.attribute("movable") {
                Some(text) => parse_bool(text).unwrap_or(false),
                None => is_asm,
            };

            for target in placement.targets {
                let mut known = included.to_vec();
                known.extend(own.iter().cloned());
                let symbols = symbols_for(&known, variables);

                let mut unit = if is_asm {
                    let encoded = self
                        .assembler
                        .encode(&symbols.with_source(&content), target.ram_offset);
                    let mut unit = PatchUnit::new(target.sector, target.offset, encoded.bytes)
                        .with_asm(content.as_str());
                    unit.error_text = encoded.error_text;
                    unit
                } else {
                    let text = if replace_labels {
                        self.assembler.replace_labels_in_hex(&content, &symbols)
                    } else {
                        content.clone()
                    };
                    let bytes = parse_hex_bytes(&text).ok_or_else(|| {
                        Error::Description(format!("invalid hex content in patch '{}'", patch_name))
                    })?;
                    let unit = PatchUnit::new(target.sector, target.offset, bytes);
                    if replace_labels {
                        unit.with_label_source(content.as_str())
                    } else {
                        unit
                    }
                };
                unit = unit
                    .with_ram_offset(target.ram_offset)
                    .with_sequential(placement.sequential)
                    .with_move_simple(move_simple)
                    .with_data_marker(marked_as_data)
                    .with_label(label.as_str());

                own.push(unit);
            }
        }

        let mut known = included.to_vec();
        known.extend(own.iter().cloned());
        let symbols = symbols_for(&known, variables);

        for unit in own.iter_mut() {
            if let Some(source) = unit.label_source.as_deref().filter(|s| !s.trim().is_empty()) {
                let text = self.assembler.replace_labels_in_hex(source, &symbols);
                unit.bytes = parse_hex_bytes(&text).ok_or_else(|| {
                    Error::Description(format!("invalid hex content in patch '{}'", patch_name))
                })?;
            }

            if let Some(source) = unit.asm_text.as_deref() {
                let encoded = self
                    .assembler
                    .encode(&symbols.with_source(source), unit.ram_offset);
                unit.bytes = encoded.bytes;
                unit.error_text = encoded.error_text;
            }

            if !unit.marked_as_data {
                let check = self.assembler.check_code(&unit.bytes, unit.ram_offset);
                if check.is_code {
                    unit.checked_code = true;
                    unit.check_text = check.error_text;
                }
            }
        }

        let error_text = aggregate_errors(&own);
        if !error_text.is_empty() {
            warn!("{}: patch '{}' has diagnostics:\n{}", self.filename, patch_name, error_text.trim_end());
        }
        Ok((own, error_text))
    }

    fn stream_location(&self, node: Node<'_, '_>) -> Result<PatchUnit> {
        let sector = self
            .explicit_sector(node)?
            .ok_or_else(|| Error::Address("<STRLocation> has no file or sector".to_string()))?;
        let path = self.resolve(required(node, "input")?);
        let bytes = fs::read(&path)?;
        Ok(PatchUnit::stream(sector, path, bytes).with_ram_offset(self.space.file_to_ram(sector, 0)))
    }

    fn import_file_patch(&self, node: Node<'_, '_>) -> Result<Option<PatchSet>> {
        let (name, description) = self.name_and_description(node)?;
        let files: Vec<Node<'_, '_>> = children(node, "ImportFile").collect();
        if files.len() != 1 {
            warn!(
                "{}: import patch '{}' needs exactly one <ImportFile>, found {}",
                self.filename,
                name,
                files.len()
            );
            return Ok(None);
        }

        let file = files[0];
        let sector = self
            .explicit_sector(file)?
            .ok_or_else(|| Error::Address(format!("import patch '{}' has no file or sector", name)))?;
        let offset = hex_attr(required(file, "offset")?, "offset")?;
        let expected = hex_attr(required(file, "expectedLength")?, "expectedLength")?;

        let mut builder = PatchSetBuilder::new(name)
            .filename(self.filename)
            .description(description)
            .hide_in_default(self.root_hide_in_default)
            .hidden(self.root_hidden);
        builder.push_unit(
            PatchUnit::input_file(sector, offset, expected)
                .with_ram_offset(self.space.file_to_ram(sector, offset)),
        );
        builder.build().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::DirectiveAssembler;
    use crate::patch::write_patches_xml;
    use crate::sector::SectorTable;

    const SCUS: Sector = Sector {
        platform: crate::Platform::Psx,
        id: 24,
    };
    const BATTLE: Sector = Sector {
        platform: crate::Platform::Psx,
        id: 1000,
    };

    fn read(xml: &str) -> Result<Vec<PatchSet>> {
        let table = SectorTable::psx();
        let asm = DirectiveAssembler::new();
        PatchReader::new(&table, &asm).read(xml, "test.xml")
    }

    fn offsets(patch: &PatchSet) -> Vec<u32> {
        patch.units().iter().map(PatchUnit::offset).collect()
    }

    #[test]
    fn omitted_offsets_chain_from_the_previous_location() {
        let patches = read(
            r#"<Patches>
                <Patch name="Chain" file="SCUS_942_21">
                    <Location offset="100">00000000</Location>
                    <Location>11111111</Location>
                    <Location>22222222</Location>
                    <Location>33333333</Location>
                </Patch>
            </Patches>"#,
        )
        .unwrap();

        let patch = &patches[0];
        assert_eq!(offsets(patch), vec![0x100, 0x104, 0x108, 0x10C]);
        let sequential: Vec<bool> = patch.units().iter().map(PatchUnit::is_sequential).collect();
        assert_eq!(sequential, vec![false, true, true, true]);
        assert_eq!(patch.combined_edits().len(), 1);
        assert_eq!(patch.filename(), "test.xml");
        assert_eq!(patch.description(), "Chain");
    }

    #[test]
    fn alignment_advances_chained_offsets() {
        let patches = read(
            r#"<Patches>
                <Patch name="Align" file="SCUS_942_21">
                    <Location offset="100">AA</Location>
                    <Location align="4">BB</Location>
                    <Location>CC</Location>
                    <Location mode="asm">.byte 1</Location>
                </Patch>
            </Patches>"#,
        )
        .unwrap();

        let patch = &patches[0];
        assert_eq!(offsets(patch), vec![0x100, 0x104, 0x105, 0x108]);
        assert!(!patch.units()[1].is_sequential());
        assert!(patch.units()[2].is_sequential());
        assert!(!patch.units()[3].is_sequential());
    }

    #[test]
    fn ram_offsets_are_translated_to_file_offsets() {
        let patches = read(
            r#"<Patches>
                <Patch name="Ram">
                    <Location file="SCUS_942_21" offsetMode="ram" offset="80010000">01</Location>
                    <Location file="SCUS_942_21" offset="800">02</Location>
                </Patch>
            </Patches>"#,
        )
        .unwrap();

        let units = patches[0].units();
        assert_eq!(units[0].offset(), 0x800);
        assert_eq!(units[0].ram_offset(), 0x8001_0000);
        assert_eq!(units[1].ram_offset(), 0x8001_0000);
    }

    #[test]
    fn specific_lists_create_one_unit_per_entry() {
        let patches = read(
            r#"<Patches>
                <Patch name="Everywhere">
                    <Location specific="SCUS_942_21:100, 200, 1000:10">ABCD</Location>
                </Patch>
            </Patches>"#,
        )
        .unwrap();

        let units = patches[0].units();
        let placed: Vec<(Sector, u32)> = units.iter().map(|u| (u.sector(), u.offset())).collect();
        assert_eq!(placed, vec![(SCUS, 0x100), (SCUS, 0x200), (BATTLE, 0x10)]);
        assert!(units.iter().all(|u| u.bytes() == [0xAB, 0xCD]));
    }

    #[test]
    fn missing_sector_rejects_the_document() {
        let err = read(
            r#"<Patches>
                <Patch name="Fine" file="SCUS_942_21"><Location offset="0">00</Location></Patch>
                <Patch name="Broken"><Location offset="0">00</Location></Patch>
            </Patches>"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Address(_)));

        assert!(matches!(read("<Patches><Patch"), Err(Error::Xml(_))));
        assert!(matches!(
            read(r#"<Patches><Patch name="x" file="NOPE"/></Patches>"#),
            Err(Error::UnknownSector(_))
        ));
        assert!(matches!(
            read(r#"<Patches><Patch name="x" file="SCUS_942_21"><Location offset="0">XYZ</Location></Patch></Patches>"#),
            Err(Error::Description(_))
        ));
    }

    #[test]
    fn variables_parse_defaults_references_and_symbols() {
        let patches = read(
            r#"<Patches>
                <Patch name="Vars" file="SCUS_942_21">
                    <Variable name="Base" bytes="2" offset="300" default="1234" />
                    <Variable name="Next" bytes="1" default="7" />
                    <Variable name="Derived" symbol="true" reference="Base" operator="+" operand="10" />
                    <Variable name="Everywhere" specific="SCUS_942_21:10,20" />
                </Patch>
            </Patches>"#,
        )
        .unwrap();

        let mut patch = patches[0].clone();
        let base = patch.variable("Base").unwrap();
        assert_eq!(base.value(), 0x1234);
        assert_eq!(base.locations()[0].offset, 0x300);
        assert_eq!(base.locations()[0].ram_offset, 0x8000_FB00);
        assert_eq!(patch.variable("Next").unwrap().locations()[0].offset, 0x302);
        assert!(patch.variable("Derived").unwrap().is_symbol());
        assert_eq!(patch.variable("Everywhere").unwrap().locations().len(), 2);
        assert_eq!(patch.count_non_reference_variables(), 3);

        patch.update(&DirectiveAssembler::new());
        assert_eq!(patch.variable("Derived").unwrap().value(), 0x44);
    }

    #[test]
    fn includes_copy_units_and_variables() {
        let patches = read(
            r#"<Patches>
                <Patch name="Shared" file="SCUS_942_21">
                    <Variable name="Count" offset="40" default="3" />
                    <Location offset="10" label="helper">AABB</Location>
                </Patch>
                <Patch name="User" file="BATTLE_BIN">
                    <Include patch=" shared " />
                    <Include patch="Nowhere" />
                    <Location offset="20" mode="asm">.word @helper
.byte %Count</Location>
                </Patch>
            </Patches>"#,
        )
        .unwrap();

        let user = &patches[1];
        assert_eq!(user.units().len(), 2);
        assert_eq!(user.units()[0].sector(), SCUS);
        assert_eq!(user.units()[1].bytes(), &[0x10, 0xF8, 0x00, 0x80, 0x03]);
        assert_eq!(user.variable("Count").unwrap().value(), 3);
        assert!(!user.has_errors());
    }

    #[test]
    fn labels_defined_later_resolve_in_the_final_pass() {
        let patches = read(
            r#"<Patches>
                <Patch name="Forward" file="SCUS_942_21">
                    <Location offset="100" mode="asm">.word @later</Location>
                    <Location offset="180" replaceLabels="true">AABB@later</Location>
                    <Location offset="200" label="later">00</Location>
                </Patch>
            </Patches>"#,
        )
        .unwrap();

        let units = patches[0].units();
        assert_eq!(units[0].bytes(), &[0x00, 0xFA, 0x00, 0x80]);
        assert_eq!(units[1].bytes(), &[0xAA, 0xBB, 0x00, 0xFA, 0x00, 0x80]);
        assert!(!patches[0].has_errors());
    }

    #[test]
    fn encode_problems_become_diagnostics() {
        let patches = read(
            r#"<Patches>
                <Patch name="Typo" file="SCUS_942_21">
                    <Location offset="100" mode="asm">.wrod 1</Location>
                </Patch>
            </Patches>"#,
        )
        .unwrap();
        assert!(patches[0].error_text().contains(".wrod"));
    }

    #[test]
    fn flags_ignore_and_import_patches() {
        let patches = read(
            r#"<Patches hidden="true">
                <Patch name="Skipped" ignore="true" file="SCUS_942_21" />
                <Patch name="Shown" hideInDefault="TRUE" file="SCUS_942_21" movable="x">
                    <Description> Does things </Description>
                    <Location offset="0" mode="asm" movable="false">.word 0</Location>
                </Patch>
                <ImportFilePatch name="Font">
                    <ImportFile file="BATTLE_BIN" offset="40" expectedLength="800" />
                </ImportFilePatch>
                <ImportFilePatch name="Broken" />
            </Patches>"#,
        )
        .unwrap();

        assert_eq!(patches.len(), 2);
        let shown = &patches[0];
        assert_eq!(shown.name(), "Shown");
        assert_eq!(shown.description(), "Does things");
        assert!(shown.hide_in_default());
        assert!(shown.is_hidden());
        assert!(!shown.units()[0].is_move_simple());

        let font = &patches[1];
        assert!(font.is_import_file());
        assert_eq!(font.units()[0].offset(), 0x40);

        assert!(matches!(
            read(r#"<Patches><Patch name="x" ignore="maybe" /></Patches>"#),
            Err(Error::Description(_))
        ));
    }

    #[test]
    fn external_files_resolve_against_the_description_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("code.asm"), ".half 0x1234").unwrap();
        fs::write(dir.path().join("movie.str"), [9u8, 8, 7]).unwrap();
        let xml = r#"<Patches>
            <Patch name="Files" file="SCUS_942_21">
                <Location offset="10" mode="asm" inputFile="code.asm" />
                <STRLocation file="BATTLE_BIN" input="movie.str" />
            </Patch>
        </Patches>"#;
        let path = dir.path().join("files.xml");
        fs::write(&path, xml).unwrap();

        let table = SectorTable::psx();
        let asm = DirectiveAssembler::new();
        let patches = PatchReader::new(&table, &asm).read_file(&path).unwrap();

        let units = patches[0].units();
        assert_eq!(units[0].bytes(), &[0x34, 0x12]);
        assert_eq!(units[1].sector(), BATTLE);
        assert_eq!(units[1].offset(), 0);
        assert_eq!(units[1].bytes(), &[9, 8, 7]);
        assert_eq!(patches[0].filename(), "files.xml");

        let missing = r#"<Patches><Patch name="x" file="SCUS_942_21">
            <STRLocation file="BATTLE_BIN" input="absent.str" /></Patch></Patches>"#;
        assert!(matches!(
            PatchReader::new(&table, &asm).with_base_dir(dir.path()).read(missing, "x.xml"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn written_descriptions_read_back_the_same() {
        let xml = r#"<Patches>
            <Patch name="Everything" file="SCUS_942_21" hideInDefault="true">
                <Description>Round &amp; round</Description>
                <Variable name="Speed" bytes="2" offset="300" default="1F" />
                <Variable name="Half" symbol="true" reference="Speed" operator="/" operand="2" />
                <Location offset="100" label="start">0102</Location>
                <Location>03</Location>
                <Location mode="asm" movable="false">.word @start + %Half</Location>
                <Location offset="180" replaceLabels="true">AABB@start</Location>
                <Location specific="BATTLE_BIN:10,20" mode="data">FF</Location>
            </Patch>
        </Patches>"#;
        let table = SectorTable::psx();
        let asm = DirectiveAssembler::new();
        let reader = PatchReader::new(&table, &asm);

        let first = reader.read(xml, "a.xml").unwrap();
        let written = write_patches_xml(&first, &table);
        let second = reader.read(&written, "a.xml").unwrap();

        assert_eq!(first.len(), second.len());
        let (a, b) = (&first[0], &second[0]);
        assert_eq!(a.name(), b.name());
        assert_eq!(a.description(), b.description());
        assert_eq!(a.hide_in_default(), b.hide_in_default());
        assert_eq!(a.units(), b.units());
        assert_eq!(b.units()[3].label_source(), Some("AABB@start"));
        assert_eq!(b.units()[3].bytes(), &[0xAA, 0xBB, 0x00, 0xF9, 0x00, 0x80]);
        assert_eq!(a.variables(), b.variables());
        assert_eq!(a.combined_edits(), b.combined_edits());
    }
}
