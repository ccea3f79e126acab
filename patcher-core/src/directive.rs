use thiserror::Error;

use crate::asm::{Assembler, BlockMove, CodeCheck, Encoded, Symbols};
use crate::bytes::{hex_string, le_bytes, le_value};

/// Upper bound for a single `.space` directive.
const MAX_SPACE: i64 = 0x10_0000;

/// Problems found while assembling one line of directive source. They are
/// reported as diagnostic text; the rest of the source is still assembled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("unknown directive '{directive}' on line {line}")]
    UnknownDirective { line: usize, directive: String },

    #[error("missing operand for {directive} on line {line}")]
    MissingOperand { line: usize, directive: String },

    #[error("bad symbol name '{token}' on line {line}")]
    BadSymbol { line: usize, token: String },

    #[error("undefined symbol '{symbol}' on line {line}")]
    UndefinedSymbol { line: usize, symbol: String },

    #[error("failed to parse integer '{token}' on line {line}")]
    ParseInt {
        line: usize,
        token: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("value '{token}' on line {line} is out of range for {kind}")]
    ValueOutOfRange {
        line: usize,
        token: String,
        kind: &'static str,
    },
}

/// Data-directive assembler used when no external toolchain is attached.
///
/// Line format (case-insensitive directives; decimal or 0x-prefixed hex
/// numbers; `@label` and `%equate` operands joined with `+` / `-`):
///
/// - `.label @name, value`  binds a label
/// - `.eqv %name, value`    binds an equate
/// - `.word a, b, ...`      4-byte little-endian values
/// - `.half a, b, ...`      2-byte values
/// - `.byte a, b, ...`      1-byte values
/// - `.align n`             zero-pads until the address is a multiple of n
/// - `.space n`             n zero bytes
///
/// Text after `#`, `;` or `//` is ignored.
#[derive(Clone, Debug, Default)]
pub struct DirectiveAssembler;

impl DirectiveAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Assembles `text` as if placed at `address`, returning the bytes and
    /// every per-line problem found on the way.
    pub fn assemble(&self, text: &str, address: u32) -> (Vec<u8>, Vec<DirectiveError>) {
        let mut pass = Pass {
            address,
            out: Vec::new(),
            symbols: Symbols::new(),
            errors: Vec::new(),
        };

        for (idx, raw_line) in text.lines().enumerate() {
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            pass.line(idx + 1, line);
        }

        (pass.out, pass.errors)
    }
}

fn strip_comment(line: &str) -> &str {
    let cut = ["#", ";", "//"]
        .iter()
        .filter_map(|marker| line.find(marker))
        .min();
    match cut {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn width_kind(width: usize) -> &'static str {
    match width {
        1 => "byte",
        2 => "half",
        _ => "word",
    }
}

fn fits(value: i64, width: usize) -> bool {
    let bits = (width * 8) as u32;
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << bits) - 1;
    value >= min && value <= max
}

struct Pass {
    address: u32,
    out: Vec<u8>,
    symbols: Symbols,
    errors: Vec<DirectiveError>,
}

impl Pass {
    fn line(&mut self, line: usize, text: &str) {
        let (head, rest) = match text.find(char::is_whitespace) {
            Some(pos) => (&text[..pos], text[pos..].trim()),
            None => (text, ""),
        };
        let directive = head.to_ascii_lowercase();

        match directive.as_str() {
            ".label" | ".eqv" => {
                if let Err(err) = self.binding(line, &directive, rest) {
                    self.errors.push(err);
                }
            }
            ".word" => self.data(line, &directive, rest, 4),
            ".half" => self.data(line, &directive, rest, 2),
            ".byte" => self.data(line, &directive, rest, 1),
            ".align" => {
                if let Err(err) = self.align(line, &directive, rest) {
                    self.errors.push(err);
                }
            }
            ".space" => {
                if let Err(err) = self.space(line, &directive, rest) {
                    self.errors.push(err);
                }
            }
            _ => self.errors.push(DirectiveError::UnknownDirective {
                line,
                directive: head.to_string(),
            }),
        }
    }

    fn binding(&mut self, line: usize, directive: &str, rest: &str) -> Result<(), DirectiveError> {
        let (name, expr) = rest
            .split_once(',')
            .ok_or_else(|| DirectiveError::MissingOperand {
                line,
                directive: directive.to_string(),
            })?;
        let sigil = if directive == ".label" { '@' } else { '%' };
        let name = name.trim();
        let bare = name
            .strip_prefix(sigil)
            .filter(|n| !n.is_empty() && n.chars().all(is_symbol_char))
            .ok_or_else(|| DirectiveError::BadSymbol {
                line,
                token: name.to_string(),
            })?;

        let value = self.eval(line, expr)?;
        if !fits(value, 4) {
            return Err(DirectiveError::ValueOutOfRange {
                line,
                token: expr.trim().to_string(),
                kind: "word",
            });
        }

        if sigil == '@' {
            self.symbols.add_label(bare, value as u32);
        } else {
            self.symbols.add_equate(bare, value as u32);
        }
        Ok(())
    }

    fn data(&mut self, line: usize, directive: &str, rest: &str, width: usize) {
        let operands: Vec<&str> = rest
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if operands.is_empty() {
            self.errors.push(DirectiveError::MissingOperand {
                line,
                directive: directive.to_string(),
            });
            return;
        }

        for operand in operands {
            // A bad operand still occupies its slot so later addresses hold.
            let value = match self.eval(line, operand) {
                Ok(v) if fits(v, width) => v as u32,
                Ok(_) => {
                    self.errors.push(DirectiveError::ValueOutOfRange {
                        line,
                        token: operand.to_string(),
                        kind: width_kind(width),
                    });
                    0
                }
                Err(err) => {
                    self.errors.push(err);
                    0
                }
            };
            self.out.extend(le_bytes(value, width));
        }
    }

    fn align(&mut self, line: usize, directive: &str, rest: &str) -> Result<(), DirectiveError> {
        if rest.is_empty() {
            return Err(DirectiveError::MissingOperand {
                line,
                directive: directive.to_string(),
            });
        }
        let n = self.eval(line, rest)?;
        if n <= 0 || n > MAX_SPACE {
            return Err(DirectiveError::ValueOutOfRange {
                line,
                token: rest.to_string(),
                kind: "alignment",
            });
        }
        let n = n as u64;
        while (self.address as u64 + self.out.len() as u64) % n != 0 {
            self.out.push(0);
        }
        Ok(())
    }

    fn space(&mut self, line: usize, directive: &str, rest: &str) -> Result<(), DirectiveError> {
        if rest.is_empty() {
            return Err(DirectiveError::MissingOperand {
                line,
                directive: directive.to_string(),
            });
        }
        let n = self.eval(line, rest)?;
        if !(0..=MAX_SPACE).contains(&n) {
            return Err(DirectiveError::ValueOutOfRange {
                line,
                token: rest.to_string(),
                kind: "space",
            });
        }
        self.out.resize(self.out.len() + n as usize, 0);
        Ok(())
    }

    /// Evaluates `term (+|- term)*`. A leading `-` negates the first term.
    fn eval(&self, line: usize, expr: &str) -> Result<i64, DirectiveError> {
        let mut total = 0i64;
        let mut sign = 1i64;
        let mut term = String::new();

        for c in expr.chars() {
            if c == '+' || c == '-' {
                if term.trim().is_empty() {
                    if c == '-' {
                        sign = -sign;
                    }
                } else {
                    total += sign * self.term(line, term.trim())?;
                    term.clear();
                    sign = if c == '-' { -1 } else { 1 };
                }
            } else {
                term.push(c);
            }
        }

        if term.trim().is_empty() {
            return Err(DirectiveError::BadSymbol {
                line,
                token: expr.trim().to_string(),
            });
        }
        Ok(total + sign * self.term(line, term.trim())?)
    }

    fn term(&self, line: usize, token: &str) -> Result<i64, DirectiveError> {
        let symbol = |name: &str| {
            if name.is_empty() || !name.chars().all(is_symbol_char) {
                Err(DirectiveError::BadSymbol {
                    line,
                    token: token.to_string(),
                })
            } else {
                Ok(name.to_string())
            }
        };

        if let Some(name) = token.strip_prefix('@') {
            let name = symbol(name)?;
            return self
                .symbols
                .label(&name)
                .map(i64::from)
                .ok_or_else(|| DirectiveError::UndefinedSymbol {
                    line,
                    symbol: token.to_string(),
                });
        }
        if let Some(name) = token.strip_prefix('%') {
            let name = symbol(name)?;
            return self
                .symbols
                .equate(&name)
                .map(i64::from)
                .ok_or_else(|| DirectiveError::UndefinedSymbol {
                    line,
                    symbol: token.to_string(),
                });
        }

        let res = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16)
        } else {
            token.parse::<u32>()
        };
        res.map(i64::from).map_err(|e| DirectiveError::ParseInt {
            line,
            token: token.to_string(),
            source: e,
        })
    }
}

impl Assembler for DirectiveAssembler {
    fn encode(&self, text: &str, address: u32) -> Encoded {
        let (bytes, errors) = self.assemble(text, address);
        let mut error_text = String::new();
        for err in errors {
            error_text.push_str(&err.to_string());
            error_text.push('\n');
        }
        Encoded { bytes, error_text }
    }

    fn update_references(&self, bytes: &[u8], address: u32, moves: &[BlockMove]) -> Vec<u8> {
        let mut out = bytes.to_vec();
        let first = ((4 - (address % 4)) % 4) as usize;
        let mut pos = first;
        while pos + 4 <= out.len() {
            let word = le_value(&out[pos..pos + 4]);
            if let Some(mv) = moves.iter().find(|mv| mv.contains(word)) {
                out[pos..pos + 4].copy_from_slice(&mv.relocate(word).to_le_bytes());
            }
            pos += 4;
        }
        out
    }

    fn check_code(&self, _bytes: &[u8], _address: u32) -> CodeCheck {
        CodeCheck::default()
    }

    fn replace_labels_in_hex(&self, text: &str, symbols: &Symbols) -> String {
        let mut out = String::with_capacity(text.len());
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '@' {
                out.push(c);
                continue;
            }
            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if !is_symbol_char(next) {
                    break;
                }
                name.push(next);
                chars.next();
            }
            // Unknown labels keep their four-byte footprint.
            let value = symbols.label(&name).unwrap_or(0);
            out.push_str(&hex_string(&le_bytes(value, 4)));
        }
        out
    }
}
