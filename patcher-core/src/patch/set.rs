use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::asm::{Assembler, BlockMove, MovePatchRange, Symbols};
use crate::bytes::parse_hex_bytes;
use crate::image::PatchEdit;
use crate::patch::unit::{PatchUnit, UnitSource};
use crate::patch::variable::Variable;
use crate::sector::AddressSpace;
use crate::{Error, Result};

/// A named patch: static units, variables and the relocations applied so far.
///
/// Built once through [`PatchSetBuilder`]; afterwards only [`update`],
/// [`move_blocks`], [`set_variable_value`] and [`set_input_file`] change it,
/// and none of them adds or removes units.
///
/// [`update`]: PatchSet::update
/// [`move_blocks`]: PatchSet::move_blocks
/// [`set_variable_value`]: PatchSet::set_variable_value
/// [`set_input_file`]: PatchSet::set_input_file
#[derive(Clone, Debug)]
pub struct PatchSet {
    name: String,
    filename: String,
    description: String,
    units: Vec<PatchUnit>,
    variables: Vec<Variable>,
    block_moves: Vec<BlockMove>,
    hide_in_default: bool,
    hidden: bool,
    error_text: String,
}

impl PatchSet {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn units(&self) -> &[PatchUnit] {
        &self.units
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name() == name)
    }

    pub fn block_moves(&self) -> &[BlockMove] {
        &self.block_moves
    }

    pub fn hide_in_default(&self) -> bool {
        self.hide_in_default
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn error_text(&self) -> &str {
        &self.error_text
    }

    pub fn has_errors(&self) -> bool {
        !self.error_text.is_empty()
    }

    /// True for patches whose content is a user-selected file.
    pub fn is_import_file(&self) -> bool {
        self.units.iter().any(PatchUnit::is_input_file)
    }

    pub fn count_non_reference_variables(&self) -> usize {
        self.variables.iter().filter(|v| !v.is_reference()).count()
    }

    /// Units copied into a patch that includes this one.
    pub(crate) fn includable_units(&self) -> impl Iterator<Item = &PatchUnit> {
        self.units.iter().filter(|u| !u.is_input_file())
    }

    /// Labels of every labelled unit and the current value of every variable.
    pub fn symbols(&self) -> Symbols {
        symbols_for(&self.units, &self.variables)
    }

    /// Sets a literal variable. Reference variables are derived and cannot be
    /// set; call [`update`](PatchSet::update) afterwards to refresh them.
    pub fn set_variable_value(&mut self, name: &str, value: u32) -> Result<()> {
        let var = self
            .variables
            .iter_mut()
            .find(|v| v.name() == name)
            .ok_or_else(|| Error::UnknownVariable(name.to_string()))?;
        if var.is_reference() {
            return Err(Error::Description(format!(
                "variable '{}' is derived from '{}' and cannot be set",
                name,
                var.reference().map(|r| r.name.as_str()).unwrap_or_default()
            )));
        }
        var.set_value(value);
        Ok(())
    }

    /// Loads the content of an import-file patch.
    pub fn set_input_file(&mut self, path: &Path) -> Result<()> {
        let unit = self
            .units
            .iter_mut()
            .find(|u| u.is_input_file())
            .ok_or_else(|| Error::Description(format!("'{}' does not take an input file", self.name)))?;

        let bytes = fs::read(path)?;
        if let UnitSource::InputFile {
            path: slot,
            expected_length,
        } = &mut unit.source
        {
            if bytes.len() != *expected_length as usize {
                return Err(Error::InputLength {
                    expected: *expected_length,
                    actual: bytes.len(),
                });
            }
            *slot = Some(path.to_path_buf());
        }
        unit.bytes = bytes;
        Ok(())
    }

    fn resolve_references(&mut self) -> String {
        let mut errors = String::new();
        for idx in 0..self.variables.len() {
            let Some(reference) = self.variables[idx].reference().cloned() else {
                continue;
            };
            let Some(base) = self.variable(&reference.name).map(Variable::value) else {
                errors.push_str(&format!(
                    "variable '{}' refers to unknown variable '{}'\n",
                    self.variables[idx].name(),
                    reference.name
                ));
                continue;
            };
            match reference.operator.apply(base, reference.operand) {
                Some(value) => self.variables[idx].set_value(value),
                None => errors.push_str(&format!(
                    "variable '{}': division by zero\n",
                    self.variables[idx].name()
                )),
            }
        }
        errors
    }

    /// Recomputes reference variables, then re-encodes every assembly unit
    /// with the current labels and variable values.
    ///
    /// Encoding problems never fail the call; they end up in the unit's and
    /// the patch's error text. A unit whose encoding produced no bytes and an
    /// error keeps its previous bytes.
    pub fn update(&mut self, assembler: &dyn Assembler) {
        let reference_errors = self.resolve_references();
        let symbols = self.symbols();

        for unit in self.units.iter_mut() {
            if let Some(source) = unit.label_source.as_deref() {
                match parse_hex_bytes(&assembler.replace_labels_in_hex(source, &symbols)) {
                    Some(bytes) => unit.bytes = bytes,
                    None => debug!(
                        "{}: keeping previous bytes at {:#X}, label replacement failed",
                        self.name, unit.ram_offset
                    ),
                }
                continue;
            }

            let Some(source) = unit.asm_text.as_deref() else {
                continue;
            };
            let encoded = assembler.encode(&symbols.with_source(source), unit.ram_offset);
            let mut bytes = encoded.bytes;
            if !unit.move_simple && !self.block_moves.is_empty() {
                bytes = assembler.update_references(&bytes, unit.ram_offset, &self.block_moves);
            }

            if bytes.is_empty() && !encoded.error_text.is_empty() {
                debug!(
                    "{}: keeping previous bytes at {:#X}, encode failed",
                    self.name, unit.ram_offset
                );
            } else {
                unit.bytes = bytes;
            }
            unit.error_text = encoded.error_text;
        }

        self.error_text = aggregate_errors(&self.units);
        self.error_text.push_str(&reference_errors);
        debug!("Updated patch '{}' ({} units)", self.name, self.units.len());
    }

    pub fn move_block(
        &mut self,
        assembler: &dyn Assembler,
        space: &dyn AddressSpace,
        range: MovePatchRange,
    ) {
        self.move_blocks(assembler, space, &[range]);
    }

    /// Relocates every unit and variable location that overlaps one of
    /// `ranges`, then fixes up references held by verified code.
    ///
    /// A range whose block move was already applied to this patch is
    /// ignored, so repeating a call leaves the patch unchanged. Distinct
    /// ranges that overlap earlier moves are applied as given.
    pub fn move_blocks(
        &mut self,
        assembler: &dyn Assembler,
        space: &dyn AddressSpace,
        ranges: &[MovePatchRange],
    ) {
        let mut seen: HashSet<BlockMove> = self.block_moves.iter().copied().collect();
        let mut fresh = Vec::new();
        for range in ranges {
            let mv = range.to_block_move(space);
            if seen.insert(mv) {
                fresh.push((*range, mv));
            }
        }
        if fresh.is_empty() {
            return;
        }
        let moves: Vec<BlockMove> = fresh.iter().map(|(_, mv)| *mv).collect();

        for unit in self.units.iter_mut().filter(|u| !u.is_input_file()) {
            for (range, _) in &fresh {
                if range.overlaps(unit.sector, unit.offset, unit.bytes.len()) {
                    unit.shift(range.offset);
                }
            }
            if unit.checked_code && !unit.move_simple {
                unit.bytes = assembler.update_references(&unit.bytes, unit.ram_offset, &moves);
            }
        }

        for var in self.variables.iter_mut() {
            let size = var.size() as usize;
            for loc in var.locations.iter_mut() {
                for (range, _) in &fresh {
                    if range.overlaps(loc.sector, loc.offset, size) {
                        loc.offset = loc.offset.wrapping_add_signed(range.offset);
                        loc.ram_offset = loc.ram_offset.wrapping_add_signed(range.offset);
                    }
                }
            }
        }

        debug!("Patch '{}': applied {} block moves", self.name, moves.len());
        self.block_moves.extend(moves);
    }

    /// Static units with sequential neighbours merged into one run, followed
    /// by one edit per variable location. Input-file units are left out; see
    /// [`input_file_edits`](PatchSet::input_file_edits).
    pub fn combined_edits(&self) -> Vec<PatchEdit> {
        let mut result = Vec::new();
        let mut current: Option<PatchEdit> = None;

        for unit in self.units.iter().filter(|u| !u.is_input_file()) {
            match current.as_mut() {
                Some(edit)
                    if unit.sequential
                        && edit.sector == unit.sector
                        && edit.end() == unit.offset as u64 =>
                {
                    edit.bytes.extend_from_slice(&unit.bytes);
                }
                _ => {
                    if let Some(edit) = current.take() {
                        result.push(edit);
                    }
                    current = Some(unit.to_edit());
                }
            }
        }
        result.extend(current);

        for var in &self.variables {
            result.extend(var.edits());
        }
        result
    }

    pub fn input_file_edits(&self) -> Result<Vec<PatchEdit>> {
        self.units
            .iter()
            .filter(|u| u.is_input_file())
            .map(|u| match u.input_path() {
                Some(_) => Ok(u.to_edit()),
                None => Err(Error::Description(format!(
                    "no input file loaded for '{}'",
                    self.name
                ))),
            })
            .collect()
    }

    /// Everything this patch writes, failing if an input file is missing.
    pub fn edits(&self) -> Result<Vec<PatchEdit>> {
        let mut edits = self.combined_edits();
        edits.extend(self.input_file_edits()?);
        Ok(edits)
    }
}

pub(crate) fn symbols_for(units: &[PatchUnit], variables: &[Variable]) -> Symbols {
    let mut symbols = Symbols::new();
    for unit in units {
        if let Some(label) = unit.label() {
            symbols.add_label(label, unit.ram_offset);
        }
    }
    for var in variables {
        symbols.add_equate(var.name(), var.value());
    }
    symbols
}

pub(crate) fn aggregate_errors(units: &[PatchUnit]) -> String {
    let mut text = String::new();
    for unit in units {
        text.push_str(&unit.error_text);
        text.push_str(&unit.check_text);
    }
    text
}

/// The construction surface for [`PatchSet`].
#[derive(Clone, Debug, Default)]
pub struct PatchSetBuilder {
    name: String,
    filename: String,
    description: Option<String>,
    units: Vec<PatchUnit>,
    variables: Vec<Variable>,
    hide_in_default: bool,
    hidden: bool,
    error_text: String,
}

impl PatchSetBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Defaults to the patch name.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn hide_in_default(mut self, hide: bool) -> Self {
        self.hide_in_default = hide;
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn push_unit(&mut self, unit: PatchUnit) -> &mut Self {
        self.units.push(unit);
        self
    }

    pub fn push_variable(&mut self, variable: Variable) -> &mut Self {
        self.variables.push(variable);
        self
    }

    pub fn append_error(&mut self, text: &str) -> &mut Self {
        self.error_text.push_str(text);
        self
    }

    pub fn units(&self) -> &[PatchUnit] {
        &self.units
    }

    /// Checks variable sizes, name uniqueness and reference targets.
    pub fn build(self) -> Result<PatchSet> {
        let mut names = HashSet::new();
        for var in &self.variables {
            if !(1..=4).contains(&var.size()) {
                return Err(Error::Description(format!(
                    "variable '{}' must be 1 to 4 bytes, got {}",
                    var.name(),
                    var.size()
                )));
            }
            if !names.insert(var.name()) {
                return Err(Error::Description(format!(
                    "variable '{}' is defined twice in patch '{}'",
                    var.name(),
                    self.name
                )));
            }
        }
        for var in &self.variables {
            if let Some(reference) = var.reference() {
                if !names.contains(reference.name.as_str()) {
                    return Err(Error::UnknownVariable(reference.name.clone()));
                }
            }
        }

        let description = self.description.unwrap_or_else(|| self.name.clone());
        Ok(PatchSet {
            name: self.name,
            filename: self.filename,
            description,
            units: self.units,
            variables: self.variables,
            block_moves: Vec::new(),
            hide_in_default: self.hide_in_default,
            hidden: self.hidden,
            error_text: self.error_text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{CodeCheck, Encoded};
    use crate::patch::variable::{Operator, VariableLocation, VariableReference};
    use crate::sector::{Sector, SectorTable};
    use crate::DirectiveAssembler;
    use std::cell::RefCell;

    const SCUS: Sector = Sector {
        platform: crate::Platform::Psx,
        id: 24,
    };

    fn loc(offset: u32) -> VariableLocation {
        VariableLocation {
            sector: SCUS,
            offset,
            ram_offset: 0x8000_F800 + offset,
        }
    }

    fn reference_patch() -> PatchSet {
        let mut builder = PatchSetBuilder::new("Ref");
        builder
            .push_variable(Variable::new("V", 1, 0x10).with_locations(vec![loc(0x20)]))
            .push_variable(
                Variable::new("R", 1, 0)
                    .with_locations(vec![loc(0x30)])
                    .with_reference(VariableReference {
                        name: "V".to_string(),
                        operator: Operator::Add,
                        operand: 5,
                    }),
            );
        builder.build().unwrap()
    }

    #[test]
    fn reference_variables_follow_their_base() {
        let asm = DirectiveAssembler::new();
        let mut patch = reference_patch();

        patch.update(&asm);
        assert_eq!(patch.variable("R").unwrap().value(), 0x15);

        patch.set_variable_value("V", 0x20).unwrap();
        patch.update(&asm);
        assert_eq!(patch.variable("R").unwrap().value(), 0x25);

        let edits = patch.combined_edits();
        assert_eq!(edits[0].bytes, vec![0x20]);
        assert_eq!(edits[1].bytes, vec![0x25]);
        assert_eq!(patch.count_non_reference_variables(), 1);
    }

    #[test]
    fn derived_and_unknown_variables_cannot_be_set() {
        let mut patch = reference_patch();
        assert!(matches!(
            patch.set_variable_value("R", 1),
            Err(Error::Description(_))
        ));
        assert!(matches!(
            patch.set_variable_value("Q", 1),
            Err(Error::UnknownVariable(name)) if name == "Q"
        ));
    }

    #[test]
    fn division_by_zero_is_a_diagnostic() {
        let mut builder = PatchSetBuilder::new("Div");
        builder
            .push_variable(Variable::new("V", 1, 9))
            .push_variable(Variable::new("R", 1, 3).with_reference(VariableReference {
                name: "V".to_string(),
                operator: Operator::Divide,
                operand: 0,
            }));
        let mut patch = builder.build().unwrap();
        patch.update(&DirectiveAssembler::new());

        assert_eq!(patch.variable("R").unwrap().value(), 3);
        assert!(patch.error_text().contains("division by zero"));
    }

    #[test]
    fn build_rejects_bad_variables() {
        let mut builder = PatchSetBuilder::new("Bad");
        builder.push_variable(Variable::new("V", 5, 0));
        assert!(matches!(builder.build(), Err(Error::Description(_))));

        let mut builder = PatchSetBuilder::new("Bad");
        builder.push_variable(Variable::new("R", 1, 0).with_reference(VariableReference {
            name: "Missing".to_string(),
            operator: Operator::Add,
            operand: 1,
        }));
        assert!(matches!(builder.build(), Err(Error::UnknownVariable(_))));

        let mut builder = PatchSetBuilder::new("Bad");
        builder
            .push_variable(Variable::new("V", 1, 0))
            .push_variable(Variable::new("V", 2, 0));
        assert!(matches!(builder.build(), Err(Error::Description(_))));
    }

    #[test]
    fn update_encodes_with_labels_and_equates() {
        let mut builder = PatchSetBuilder::new("Asm");
        builder
            .push_unit(
                PatchUnit::new(SCUS, 0x100, vec![0; 4])
                    .with_ram_offset(0x8000_F900)
                    .with_label("table"),
            )
            .push_unit(
                PatchUnit::new(SCUS, 0x200, Vec::new())
                    .with_ram_offset(0x8000_FA00)
                    .with_asm(".word @table\n.byte %Count"),
            )
            .push_variable(Variable::new("Count", 1, 7));
        let mut patch = builder.build().unwrap();
        patch.update(&DirectiveAssembler::new());

        assert_eq!(patch.units()[1].bytes(), &[0x00, 0xF9, 0x00, 0x80, 0x07]);
        assert!(!patch.has_errors());
    }

    #[test]
    fn failed_encoding_keeps_previous_bytes() {
        let mut builder = PatchSetBuilder::new("Broken");
        builder.push_unit(PatchUnit::new(SCUS, 0, vec![0xAA]).with_asm(".bogus"));
        let mut patch = builder.build().unwrap();
        patch.update(&DirectiveAssembler::new());

        assert_eq!(patch.units()[0].bytes(), &[0xAA]);
        assert!(patch.error_text().contains("unknown directive '.bogus'"));
    }

    #[test]
    fn block_moves_shift_once() {
        let table = SectorTable::psx();
        let asm = DirectiveAssembler::new();
        let mut builder = PatchSetBuilder::new("Move");
        builder.push_unit(
            PatchUnit::new(SCUS, 0x800, vec![0; 0x10]).with_ram_offset(table.file_to_ram(SCUS, 0x800)),
        );
        builder.push_unit(PatchUnit::new(SCUS, 0x2000, vec![0; 4]));
        builder.push_variable(Variable::new("V", 1, 0).with_locations(vec![loc(0x808)]));
        let mut patch = builder.build().unwrap();

        let range = MovePatchRange::new(SCUS, 0x800, 0x1800, 0x100);
        patch.move_block(&asm, &table, range);
        assert_eq!(patch.units()[0].offset(), 0x900);
        assert_eq!(patch.units()[0].ram_offset(), 0x8001_0100);
        assert_eq!(patch.units()[1].offset(), 0x2000);
        assert_eq!(patch.variables()[0].locations()[0].offset, 0x908);

        patch.move_block(&asm, &table, range);
        assert_eq!(patch.units()[0].offset(), 0x900);
        assert_eq!(patch.units()[0].ram_offset(), 0x8001_0100);
        assert_eq!(patch.block_moves().len(), 1);
    }

    #[test]
    fn label_references_follow_moved_labels() {
        let table = SectorTable::psx();
        let asm = DirectiveAssembler::new();
        let mut builder = PatchSetBuilder::new("Jump");
        builder
            .push_unit(
                PatchUnit::new(SCUS, 0x800, vec![0; 4])
                    .with_ram_offset(table.file_to_ram(SCUS, 0x800))
                    .with_label("target"),
            )
            .push_unit(PatchUnit::new(SCUS, 0x2000, vec![0; 5]).with_label_source("EE@target"));
        let mut patch = builder.build().unwrap();

        patch.update(&asm);
        assert_eq!(patch.units()[1].bytes(), &[0xEE, 0x00, 0x00, 0x01, 0x80]);

        patch.move_block(&asm, &table, MovePatchRange::new(SCUS, 0x800, 0x1800, 0x100));
        patch.update(&asm);
        assert_eq!(patch.units()[1].bytes(), &[0xEE, 0x00, 0x01, 0x01, 0x80]);
        assert_eq!(patch.units()[1].offset(), 0x2000);
    }

    #[test]
    fn overlapping_distinct_moves_both_apply() {
        let table = SectorTable::psx();
        let asm = DirectiveAssembler::new();
        let mut builder = PatchSetBuilder::new("Move");
        builder.push_unit(PatchUnit::new(SCUS, 0x800, vec![0; 4]));
        let mut patch = builder.build().unwrap();

        patch.move_block(&asm, &table, MovePatchRange::new(SCUS, 0x800, 0x900, 0x10));
        patch.move_block(&asm, &table, MovePatchRange::new(SCUS, 0x800, 0x900, 0x20));
        assert_eq!(patch.units()[0].offset(), 0x830);
        assert_eq!(patch.block_moves().len(), 2);
    }

    struct RecordingAssembler {
        calls: RefCell<Vec<(u32, Vec<BlockMove>)>>,
    }

    impl Assembler for RecordingAssembler {
        fn encode(&self, _text: &str, _address: u32) -> Encoded {
            Encoded {
                bytes: vec![1, 2, 3, 4],
                error_text: String::new(),
            }
        }

        fn update_references(&self, bytes: &[u8], address: u32, moves: &[BlockMove]) -> Vec<u8> {
            self.calls.borrow_mut().push((address, moves.to_vec()));
            bytes.to_vec()
        }

        fn check_code(&self, _bytes: &[u8], _address: u32) -> CodeCheck {
            CodeCheck {
                is_code: true,
                error_text: String::new(),
            }
        }

        fn replace_labels_in_hex(&self, text: &str, _symbols: &Symbols) -> String {
            text.to_string()
        }
    }

    #[test]
    fn verified_code_gets_reference_fixups() {
        let table = SectorTable::psx();
        let asm = RecordingAssembler {
            calls: RefCell::new(Vec::new()),
        };
        let mut builder = PatchSetBuilder::new("Code");
        builder
            .push_unit(
                PatchUnit::new(SCUS, 0x3000, vec![0; 4])
                    .with_asm("code")
                    .with_move_simple(false)
                    .with_checked_code(true),
            )
            .push_unit(PatchUnit::new(SCUS, 0x4000, vec![0; 4]).with_asm("simple"));
        let mut patch = builder.build().unwrap();

        patch.move_block(&asm, &table, MovePatchRange::new(SCUS, 0x800, 0x900, 4));
        assert_eq!(asm.calls.borrow().len(), 1);
        assert_eq!(asm.calls.borrow()[0].0, 0x3000);

        // Later updates carry the full move history for non-simple units.
        patch.update(&asm);
        assert_eq!(asm.calls.borrow().len(), 2);
        assert_eq!(asm.calls.borrow()[1].1, patch.block_moves().to_vec());
    }

    #[test]
    fn sequential_units_merge_into_one_edit() {
        let mut builder = PatchSetBuilder::new("Seq");
        builder
            .push_unit(PatchUnit::new(SCUS, 0x100, vec![1, 2]))
            .push_unit(PatchUnit::new(SCUS, 0x102, vec![3]).with_sequential(true))
            .push_unit(PatchUnit::new(SCUS, 0x200, vec![4]))
            .push_unit(PatchUnit::input_file(SCUS, 0x300, 2))
            .push_unit(PatchUnit::new(SCUS, 0x201, vec![5]).with_sequential(true));
        let patch = builder.build().unwrap();

        let edits = patch.combined_edits();
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0], PatchEdit::new(SCUS, 0x100, vec![1, 2, 3]));
        assert_eq!(edits[1], PatchEdit::new(SCUS, 0x200, vec![4, 5]));
        assert!(patch.edits().is_err());
    }

    #[test]
    fn input_files_must_match_expected_length() {
        let dir = tempfile::tempdir().unwrap();
        let short = dir.path().join("short.bin");
        let exact = dir.path().join("exact.bin");
        fs::write(&short, [1u8]).unwrap();
        fs::write(&exact, [1u8, 2]).unwrap();

        let mut builder = PatchSetBuilder::new("Import");
        builder.push_unit(PatchUnit::input_file(SCUS, 0x300, 2));
        let mut patch = builder.build().unwrap();
        assert!(patch.is_import_file());

        assert!(matches!(
            patch.set_input_file(&short),
            Err(Error::InputLength { expected: 2, actual: 1 })
        ));
        patch.set_input_file(&exact).unwrap();
        assert_eq!(
            patch.edits().unwrap(),
            vec![PatchEdit::new(SCUS, 0x300, vec![1, 2])]
        );
    }
}
