use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::bytes::parse_hex_u32;
use crate::{Error, Result};

/// Which template table a command stream is decoded against.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    BattleConditional,
    WorldConditional,
    EventCommand,
}

impl CommandType {
    /// Command IDs that end a command list. The terminating command is kept.
    pub fn sentinel_ids(self) -> &'static [u32] {
        match self {
            CommandType::EventCommand => &[0xDB, 0xE3],
            CommandType::BattleConditional | CommandType::WorldConditional => &[],
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterType {
    Number,
    Variable,
    Unit,
    Item,
    Scenario,
    Map,
    Location,
    AbilityEffect,
    Spritesheet,
}

impl ParameterType {
    /// Case-insensitive; anything unrecognised is a plain number.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "variable" => ParameterType::Variable,
            "unit" => ParameterType::Unit,
            "item" => ParameterType::Item,
            "scenario" => ParameterType::Scenario,
            "map" => ParameterType::Map,
            "location" => ParameterType::Location,
            "abilityeffect" => ParameterType::AbilityEffect,
            "spritesheet" => ParameterType::Spritesheet,
            _ => ParameterType::Number,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    Hex,
    Unsigned,
    Signed,
}

impl DisplayMode {
    fn parse(mode: Option<&str>, kind: ParameterType) -> Self {
        match mode.map(|m| m.trim().to_ascii_lowercase()) {
            Some(m) if m == "hex" => DisplayMode::Hex,
            Some(m) if m == "unsigned" => DisplayMode::Unsigned,
            Some(_) => DisplayMode::Signed,
            None if kind == ParameterType::Number => DisplayMode::Signed,
            None => DisplayMode::Hex,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterTemplate {
    pub name: String,
    pub byte_length: usize,
    pub kind: ParameterType,
    pub mode: DisplayMode,
}

impl ParameterTemplate {
    pub fn new(name: impl Into<String>, byte_length: usize, kind: ParameterType) -> Self {
        Self {
            name: name.into(),
            byte_length,
            kind,
            mode: DisplayMode::parse(None, kind),
        }
    }

    pub fn with_mode(mut self, mode: DisplayMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A command layout: `byte_length` ID bytes followed by the parameters in
/// declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandTemplate {
    pub id: u32,
    pub name: String,
    pub byte_length: usize,
    pub parameters: Vec<Arc<ParameterTemplate>>,
}

impl CommandTemplate {
    pub fn new(id: u32, name: impl Into<String>, byte_length: usize) -> Self {
        Self {
            id,
            name: name.into(),
            byte_length,
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterTemplate) -> Self {
        self.parameters.push(Arc::new(parameter));
        self
    }

    /// Wire length of a command built from this template.
    pub fn total_length(&self) -> usize {
        self.byte_length + self.parameters.iter().map(|p| p.byte_length).sum::<usize>()
    }
}

/// Every known command of one [`CommandType`], keyed by ID.
#[derive(Clone, Debug)]
pub struct TemplateTable {
    kind: CommandType,
    templates: HashMap<u32, Arc<CommandTemplate>>,
}

fn valid_width(n: usize) -> bool {
    (1..=4).contains(&n)
}

fn width_attr(node: Node<'_, '_>, default: usize) -> Result<usize> {
    match node.attribute("bytes") {
        Some(text) => text
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|n| valid_width(*n))
            .ok_or_else(|| Error::Description(format!("invalid bytes '{}' on <{}>", text, node.tag_name().name()))),
        None => Ok(default),
    }
}

/// Decimal `value`, else hex `hex`. Commands with neither are skipped.
fn command_id(node: Node<'_, '_>) -> Option<u32> {
    node.attribute("value")
        .and_then(|v| v.trim().parse::<u32>().ok())
        .or_else(|| node.attribute("hex").and_then(parse_hex_u32))
}

impl TemplateTable {
    pub fn new(kind: CommandType) -> Self {
        Self {
            kind,
            templates: HashMap::new(),
        }
    }

    pub fn kind(&self) -> CommandType {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Arc<CommandTemplate>> {
        self.templates.get(&id)
    }

    pub fn insert(&mut self, template: CommandTemplate) -> Result<()> {
        if !valid_width(template.byte_length)
            || template.parameters.iter().any(|p| !valid_width(p.byte_length))
        {
            return Err(Error::Description(format!(
                "command {:#X} '{}' has a field outside 1 to 4 bytes",
                template.id, template.name
            )));
        }
        if template.byte_length < 4 && template.id >> (template.byte_length * 8) != 0 {
            return Err(Error::Description(format!(
                "command id {:#X} does not fit in {} bytes",
                template.id, template.byte_length
            )));
        }
        if self.templates.contains_key(&template.id) {
            return Err(Error::Description(format!("duplicate command id {:#X}", template.id)));
        }
        self.templates.insert(template.id, Arc::new(template));
        Ok(())
    }

    /// Reads a `<Commands>` template document.
    pub fn from_xml(kind: CommandType, xml: &str) -> Result<Self> {
        let doc = Document::parse(xml)?;
        let root = doc
            .descendants()
            .find(|n| n.has_tag_name("Commands"))
            .ok_or_else(|| Error::Description("template document has no <Commands>".to_string()))?;
        let default_width = width_attr(root, 1)?;

        let mut table = Self::new(kind);
        for node in root.descendants().filter(|n| n.has_tag_name("Command")) {
            let Some(id) = command_id(node) else {
                continue;
            };
            let mut template = CommandTemplate::new(
                id,
                node.attribute("name").unwrap_or("Unknown"),
                width_attr(node, default_width)?,
            );

            for param in node.children().filter(|n| n.has_tag_name("Parameter")) {
                let kind = param
                    .attribute("type")
                    .map_or(ParameterType::Number, ParameterType::from_name);
                template = template.with_parameter(ParameterTemplate {
                    name: param.attribute("name").unwrap_or("Parameter").to_string(),
                    byte_length: width_attr(param, 1)?,
                    kind,
                    mode: DisplayMode::parse(param.attribute("mode"), kind),
                });
            }
            table.insert(template)?;
        }
        Ok(table)
    }

    pub fn load(kind: CommandType, path: &Path) -> Result<Self> {
        Self::from_xml(kind, &fs::read_to_string(path)?)
    }
}
