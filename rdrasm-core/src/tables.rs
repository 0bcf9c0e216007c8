//! Reference data consumed by the pipeline: the opcode table (byte ->
//! name, size, decode rule) and the native-name table (hash -> name).
//! Both are configuration, not code: built-in copies ship with the crate
//! and callers may load replacements from disk.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("unable to read table file")]
    Io(#[from] std::io::Error),
    #[error("malformed table data")]
    Yaml(#[from] serde_yaml::Error),
    #[error("opcode {0:#04x} defined twice")]
    DuplicateOpcode(u8),
}

/// How an opcode's total size is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeKind {
    /// `size` bytes total, operand payload is `size - 1` bytes.
    #[default]
    Fixed,
    /// Length byte follows the opcode; total size is `2 + length`.
    ShortString,
    /// Known-incomplete encoding; decoding one is an explicit error.
    LongString,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcodeDef {
    pub op: u8,
    pub name: String,
    #[serde(default)]
    pub size: u8,
    #[serde(default)]
    pub kind: DecodeKind,
}

/// Opcode byte -> definition, dense over the full byte range. Bytes
/// without a definition are decode errors.
#[derive(Debug, Clone)]
pub struct OpcodeTable {
    defs: Vec<Option<OpcodeDef>>,
}

impl OpcodeTable {
    pub fn from_defs(defs: Vec<OpcodeDef>) -> Result<Self, TableError> {
        let mut table = vec![None; 256];
        for def in defs {
            let slot = &mut table[def.op as usize];
            if slot.is_some() {
                return Err(TableError::DuplicateOpcode(def.op));
            }
            *slot = Some(def);
        }
        Ok(Self { defs: table })
    }

    pub fn from_yaml(text: &str) -> Result<Self, TableError> {
        Self::from_defs(serde_yaml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, TableError> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn get(&self, op: u8) -> Option<&OpcodeDef> {
        self.defs[op as usize].as_ref()
    }

    /// Mnemonic for a byte, `??` when the table has no entry.
    pub fn name(&self, op: u8) -> &str {
        self.get(op).map(|d| d.name.as_str()).unwrap_or("??")
    }

    /// The table shipped with the crate, loaded once.
    pub fn builtin() -> &'static OpcodeTable {
        static BUILTIN: Lazy<OpcodeTable> = Lazy::new(|| {
            OpcodeTable::from_yaml(include_str!("../data/opcodes.yaml"))
                .expect("built-in opcode table is valid")
        });
        &BUILTIN
    }
}

/// Native hash -> engine function name.
#[derive(Debug, Clone, Default)]
pub struct NativeNames {
    names: HashMap<u32, String>,
}

impl NativeNames {
    pub fn new(names: HashMap<u32, String>) -> Self {
        Self { names }
    }

    pub fn from_yaml(text: &str) -> Result<Self, TableError> {
        Ok(Self::new(serde_yaml::from_str(text)?))
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, TableError> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn lookup(&self, hash: u32) -> Option<&str> {
        self.names.get(&hash).map(String::as_str)
    }

    /// Name for display; unknown hashes render as `unk_0x<hash>`.
    pub fn display(&self, hash: u32) -> String {
        match self.lookup(hash) {
            Some(name) => name.to_owned(),
            None => format!("unk_0x{hash:08X}"),
        }
    }

    pub fn builtin() -> &'static NativeNames {
        static BUILTIN: Lazy<NativeNames> = Lazy::new(|| {
            NativeNames::from_yaml(include_str!("../data/natives.yaml"))
                .expect("built-in native table is valid")
        });
        &BUILTIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::opcode;

    #[test]
    fn builtin_table_parses_and_covers_core_opcodes() {
        let table = OpcodeTable::builtin();
        assert_eq!(table.get(opcode::OP_ENTER).unwrap().size, 5);
        assert_eq!(table.get(opcode::OP_NATIVE).unwrap().size, 3);
        assert_eq!(
            table.get(opcode::OP_SPUSH).unwrap().kind,
            DecodeKind::ShortString
        );
        assert_eq!(
            table.get(opcode::OP_SPUSHL).unwrap().kind,
            DecodeKind::LongString
        );
        for op in opcode::OP_JMP..=opcode::OP_JMPGT {
            assert_eq!(table.get(op).unwrap().size, 3, "jump {op:#04x}");
        }
        for op in opcode::OP_CALL2..=opcode::OP_CALL2HF {
            assert_eq!(table.get(op).unwrap().size, 3, "call {op:#04x}");
        }
    }

    #[test]
    fn duplicate_opcode_is_rejected() {
        let defs = vec![
            OpcodeDef {
                op: 1,
                name: "a".into(),
                size: 1,
                kind: DecodeKind::Fixed,
            },
            OpcodeDef {
                op: 1,
                name: "b".into(),
                size: 1,
                kind: DecodeKind::Fixed,
            },
        ];
        assert!(matches!(
            OpcodeTable::from_defs(defs),
            Err(TableError::DuplicateOpcode(1))
        ));
    }

    #[test]
    fn unknown_native_renders_as_hash() {
        let names = NativeNames::default();
        assert_eq!(names.display(0xDEADBEEF), "unk_0xDEADBEEF");
    }
}
