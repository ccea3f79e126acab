use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::Arc;

use super::template::{CommandTemplate, DisplayMode, ParameterTemplate, TemplateTable};
use crate::bytes::{le_bytes, le_value};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandParameter {
    template: Arc<ParameterTemplate>,
    value: u32,
}

impl CommandParameter {
    pub fn new(template: Arc<ParameterTemplate>, value: u32) -> Self {
        let mut param = Self { template, value: 0 };
        param.set_value(value);
        param
    }

    pub fn template(&self) -> &ParameterTemplate {
        &self.template
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    /// Stores `value` truncated to the parameter's width.
    pub fn set_value(&mut self, value: u32) {
        let bits = self.template.byte_length * 8;
        self.value = if bits >= 32 { value } else { value & ((1u32 << bits) - 1) };
    }

    pub fn display_value(&self) -> String {
        let width = self.template.byte_length;
        match self.template.mode {
            DisplayMode::Hex => format!("{:0w$X}", self.value, w = width * 2),
            DisplayMode::Unsigned => self.value.to_string(),
            DisplayMode::Signed => {
                let shift = 32 - (width.min(4) * 8) as u32;
                (((self.value << shift) as i32) >> shift).to_string()
            }
        }
    }
}

impl Serialize for CommandParameter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("CommandParameter", 3)?;
        s.serialize_field("name", &self.template.name)?;
        s.serialize_field("value", &self.value)?;
        s.serialize_field("display", &self.display_value())?;
        s.end()
    }
}

/// One decoded command: its template and a value for every parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    template: Arc<CommandTemplate>,
    parameters: Vec<CommandParameter>,
}

impl Command {
    /// A command with every parameter zero.
    pub fn new(template: Arc<CommandTemplate>) -> Self {
        Self::with_values(template, &[])
    }

    /// Missing values are zero; extra values are ignored.
    pub fn with_values(template: Arc<CommandTemplate>, values: &[u32]) -> Self {
        let parameters = template
            .parameters
            .iter()
            .enumerate()
            .map(|(i, p)| CommandParameter::new(Arc::clone(p), values.get(i).copied().unwrap_or(0)))
            .collect();
        Self { template, parameters }
    }

    pub fn template(&self) -> &CommandTemplate {
        &self.template
    }

    pub fn id(&self) -> u32 {
        self.template.id
    }

    pub fn name(&self) -> &str {
        &self.template.name
    }

    pub fn parameters(&self) -> &[CommandParameter] {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut [CommandParameter] {
        &mut self.parameters
    }

    pub fn byte_length(&self) -> usize {
        self.template.total_length()
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Command", 3)?;
        s.serialize_field("id", &self.template.id)?;
        s.serialize_field("name", &self.template.name)?;
        s.serialize_field("parameters", &self.parameters)?;
        s.end()
    }
}

/// Decodes the command starting at the front of `bytes`.
///
/// The ID is matched by accumulating 1 to 4 little-endian bytes and taking
/// the first length whose value names a template, so a shorter ID wins over
/// a longer one sharing its prefix. Parameters begin after the template's
/// ID width. Returns `None` when nothing matches or the ID or a parameter
/// would run past the end of the buffer.
pub fn decode_command(table: &TemplateTable, bytes: &[u8]) -> Option<Command> {
    let template = (1..=bytes.len().min(4)).find_map(|n| table.get(le_value(&bytes[..n])))?;
    if bytes.len() < template.byte_length {
        return None;
    }

    let mut pos = template.byte_length;
    let mut parameters = Vec::with_capacity(template.parameters.len());
    for param in &template.parameters {
        let field = bytes.get(pos..pos + param.byte_length)?;
        parameters.push(CommandParameter::new(Arc::clone(param), le_value(field)));
        pos += param.byte_length;
    }

    Some(Command {
        template: Arc::clone(template),
        parameters,
    })
}

/// Decodes commands until the buffer is exhausted, a command fails to
/// decode, or a command whose ID is in `sentinel_ids` has been read.
pub fn decode_commands(table: &TemplateTable, bytes: &[u8], sentinel_ids: &[u32]) -> Vec<Command> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let Some(command) = decode_command(table, &bytes[pos..]) else {
            break;
        };
        pos += command.byte_length();
        let done = sentinel_ids.contains(&command.id());
        out.push(command);
        if done {
            break;
        }
    }
    out
}

pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut out = Vec::with_capacity(command.byte_length());
    out.extend(le_bytes(command.template.id, command.template.byte_length));
    for param in &command.parameters {
        out.extend(le_bytes(param.value, param.template.byte_length));
    }
    out
}

pub fn encode_commands(commands: &[Command]) -> Vec<u8> {
    commands.iter().flat_map(encode_command).collect()
}
