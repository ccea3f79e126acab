use std::fmt::Write;

use crate::bytes::hex_string;
use crate::patch::set::PatchSet;
use crate::patch::unit::{PatchUnit, UnitSource};
use crate::patch::variable::{Operator, Variable};
use crate::sector::{AddressSpace, Sector};

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn sector_attr(space: &dyn AddressSpace, sector: Sector) -> String {
    match space.sector_name(sector) {
        Some(name) => format!("file=\"{}\"", escape(name)),
        None => format!("sector=\"{:X}\"", sector.id),
    }
}

fn write_unit(out: &mut String, unit: &PatchUnit, space: &dyn AddressSpace) {
    if let UnitSource::Stream { path } = unit.source() {
        let _ = writeln!(
            out,
            "        <STRLocation {} input=\"{}\" />",
            sector_attr(space, unit.sector()),
            escape(&path.to_string_lossy())
        );
        return;
    }

    let mut attrs = sector_attr(space, unit.sector());
    // Chained units are written without an offset so they chain again.
    if !unit.is_sequential() {
        let _ = write!(attrs, " offset=\"{:X}\"", unit.offset());
    }
    if unit.is_asm() {
        attrs.push_str(" mode=\"asm\"");
    } else if unit.is_marked_as_data() {
        attrs.push_str(" mode=\"data\"");
    }
    if let Some(label) = unit.label() {
        let _ = write!(attrs, " label=\"{}\"", escape(label));
    }
    if unit.is_move_simple() != unit.is_asm() {
        let _ = write!(attrs, " movable=\"{}\"", unit.is_move_simple());
    }

    let content = match (unit.asm_text(), unit.label_source()) {
        (Some(text), _) => escape(text),
        (None, Some(text)) => {
            attrs.push_str(" replaceLabels=\"true\"");
            escape(text)
        }
        (None, None) => hex_string(unit.bytes()),
    };
    let _ = writeln!(out, "        <Location {}>{}</Location>", attrs, content);
}

fn write_variable(out: &mut String, var: &Variable, space: &dyn AddressSpace) {
    let placement = if var.is_symbol() {
        "symbol=\"true\"".to_string()
    } else {
        let specific: Vec<String> = var
            .locations()
            .iter()
            .map(|loc| format!("{}:{:X}", space.display_name(loc.sector), loc.offset))
            .collect();
        format!("specific=\"{}\"", escape(&specific.join(",")))
    };

    let mut value = String::new();
    match var.reference() {
        Some(reference) => {
            let _ = write!(value, " reference=\"{}\"", escape(&reference.name));
            if reference.operator != Operator::Copy {
                let _ = write!(value, " operator=\"{}\"", reference.operator);
            }
            let _ = write!(value, " operand=\"{:X}\"", reference.operand);
        }
        None => {
            let _ = write!(value, " default=\"{:X}\"", var.value());
        }
    }

    let _ = writeln!(
        out,
        "        <Variable name=\"{}\" {} bytes=\"{}\"{} />",
        escape(var.name()),
        placement,
        var.size(),
        value
    );
}

impl PatchSet {
    /// Serialises this patch as a `<Patch>` (or `<ImportFilePatch>`) element
    /// that reads back into an equivalent patch.
    pub fn to_xml(&self, space: &dyn AddressSpace) -> String {
        let mut out = String::new();
        let name = escape(self.name());
        let description = escape(self.description());

        if let Some(unit) = self.units().iter().find(|u| u.is_input_file()) {
            let expected = match unit.source() {
                UnitSource::InputFile {
                    expected_length, ..
                } => *expected_length,
                _ => 0,
            };
            let _ = writeln!(out, "    <ImportFilePatch name=\"{}\">", name);
            let _ = writeln!(out, "        <Description>{}</Description>", description);
            let _ = writeln!(
                out,
                "        <ImportFile {} offset=\"{:X}\" expectedLength=\"{:X}\" />",
                sector_attr(space, unit.sector()),
                unit.offset(),
                expected
            );
            out.push_str("    </ImportFilePatch>\n");
            return out;
        }

        let mut flags = String::new();
        if self.hide_in_default() {
            flags.push_str(" hideInDefault=\"true\"");
        }
        if self.is_hidden() {
            flags.push_str(" hidden=\"true\"");
        }
        let _ = writeln!(out, "    <Patch name=\"{}\"{}>", name, flags);
        if !self.description().is_empty() {
            let _ = writeln!(out, "        <Description>{}</Description>", description);
        }
        for unit in self.units() {
            write_unit(&mut out, unit, space);
        }
        for var in self.variables() {
            write_variable(&mut out, var, space);
        }
        out.push_str("    </Patch>\n");
        out
    }
}

/// A complete description document for `patches`.
pub fn write_patches_xml(patches: &[PatchSet], space: &dyn AddressSpace) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n<Patches>\n");
    for patch in patches {
        out.push_str(&patch.to_xml(space));
    }
    out.push_str("</Patches>\n");
    out
}
