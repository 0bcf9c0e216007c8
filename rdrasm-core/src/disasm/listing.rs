//! Text rendering of a decoded and resolved script. The decoder keeps
//! the instruction stream gap-free; presentation rows (labels, blank
//! separators between functions) are added here and only here.

use serde::Serialize;

use crate::disasm::decoder::Instruction;
use crate::disasm::opcode::OP_ENTER;
use crate::disasm::resolver::{Analysis, Target};
use crate::tables::{DecodeKind, OpcodeTable};

/// One output line, already formatted per column.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Row {
    pub address: String,
    pub bytes: String,
    pub mnemonic: String,
    pub operands: String,
}

/// Inline string constant with the location it was pushed at.
#[derive(Debug, Clone, Serialize)]
pub struct StringEntry {
    pub location: String,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct Listing {
    rows: Vec<Row>,
    strings: Vec<StringEntry>,
}

impl Listing {
    pub fn build(insts: &[Instruction], analysis: &Analysis, table: &OpcodeTable) -> Self {
        let mut listing = Listing::default();
        let mut first_function = true;
        for inst in insts {
            if inst.opcode == OP_ENTER {
                if !first_function {
                    listing.rows.push(Row::default());
                }
                first_function = false;
            }
            if let Some(label) = analysis.jump_labels.get(&inst.offset) {
                listing.rows.push(Row {
                    bytes: format!(":{label}"),
                    ..Row::default()
                });
            }
            listing.rows.push(Row {
                address: inst.formatted_location(),
                bytes: inst.formatted_bytes(),
                mnemonic: table.name(inst.opcode).to_owned(),
                operands: operand_text(inst, analysis),
            });
            if let Some(text) = inst.string_text() {
                listing.strings.push(StringEntry {
                    location: inst.formatted_location(),
                    text,
                });
            }
        }
        listing
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn strings(&self) -> &[StringEntry] {
        &self.strings
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            let line = format!(
                "{:<15}{:<15}{:<15}{}",
                row.address, row.bytes, row.mnemonic, row.operands
            );
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }
}

fn operand_text(inst: &Instruction, analysis: &Analysis) -> String {
    match analysis.targets.get(&inst.offset) {
        Some(Target::Enter { function }) => {
            let f = &analysis.functions[function];
            format!("{} ({} args, frame {})", f.name, f.arg_count, f.frame_size)
        }
        Some(Target::Call { target, function }) => match function {
            Some(entry) => analysis.functions[entry].name.clone(),
            None => format!("??? ({target:x})"),
        },
        Some(Target::Native(n)) => {
            format!("{} ({} args, ret {})", n.name, n.arg_count, u8::from(n.has_return))
        }
        Some(Target::Jump { label, .. }) => format!("@{label}"),
        None => match inst.kind {
            DecodeKind::ShortString => {
                format!("\"{}\"", inst.string_text().unwrap_or_default())
            }
            _ => inst.operand_hex(),
        },
    }
}
