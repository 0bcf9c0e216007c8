use serde::Serialize;
use thiserror::Error;

use crate::format::pages::{AddressError, PageMap, PAGE_SIZE};
use crate::tables::{DecodeKind, OpcodeTable};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown opcode {opcode:#04x} at {offset:#x}")]
    UnknownOpcode { opcode: u8, offset: usize },
    #[error("opcode {opcode:#04x} ({name}) at {offset:#x} has no supported decode rule")]
    UnsupportedOpcode {
        opcode: u8,
        name: String,
        offset: usize,
    },
    #[error("code region ends inside {name} at {offset:#x}: need {need} bytes, {have} left")]
    Truncated {
        name: String,
        offset: usize,
        need: usize,
        have: usize,
    },
    #[error(transparent)]
    Address(#[from] AddressError),
}

/// One decoded instruction. Read-only after decoding; resolver results
/// are attached in a side table keyed by offset, never written back here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub opcode: u8,
    pub operands: Vec<u8>,
    /// Physical offset of the opcode byte in the decoded buffer.
    pub offset: usize,
    /// Offset within the (virtual, contiguous) code region.
    pub voffset: usize,
    /// Virtual code page the instruction starts in (`voffset / PAGE_SIZE`).
    pub page: usize,
    pub kind: DecodeKind,
}

impl Instruction {
    pub fn size(&self) -> usize {
        1 + self.operands.len()
    }

    /// Two-part display address: page as 5 hex digits, physical offset as
    /// 7, both uppercase and zero-padded. The page column is the virtual
    /// page index while the offset column is the physical buffer offset;
    /// the offset is what hex dumps and resolved call targets use, the
    /// page says which header table entry placed it there.
    pub fn formatted_location(&self) -> String {
        format!("{:05X}:{:07X}", self.page, self.offset)
    }

    /// Opcode plus operand bytes as hex. String pushes show only the
    /// length byte; the payload is rendered by `string_text` instead.
    pub fn formatted_bytes(&self) -> String {
        match self.kind {
            DecodeKind::ShortString => {
                format!("{:02X}{:02X}", self.opcode, self.operands[0])
            }
            _ => format!("{:02X}{}", self.opcode, hex::encode_upper(&self.operands)),
        }
    }

    pub fn operand_hex(&self) -> String {
        hex::encode(&self.operands)
    }

    /// Payload of a short string push, decoded as WINDOWS-1252 with
    /// newlines escaped. `None` for every other opcode.
    pub fn string_text(&self) -> Option<String> {
        if self.kind != DecodeKind::ShortString {
            return None;
        }
        let (text, _, _) = encoding_rs::WINDOWS_1252.decode(&self.operands[1..]);
        Some(text.replace('\n', "\\n"))
    }
}

/// Table-driven sequential decoder over the contiguous code image. The
/// only state carried between instructions is the read cursor; decoded
/// instructions stay available when a later one fails.
pub struct Decoder<'a> {
    table: &'a OpcodeTable,
    pages: &'a PageMap,
    code: &'a [u8],
    cursor: usize,
    insts: Vec<Instruction>,
}

impl<'a> Decoder<'a> {
    pub fn new(code: &'a [u8], pages: &'a PageMap, table: &'a OpcodeTable) -> Self {
        Self {
            table,
            pages,
            code,
            cursor: 0,
            insts: Vec::new(),
        }
    }

    /// Decode the whole code region. On success the instruction sizes sum
    /// to the region length exactly; on failure everything decoded before
    /// the offending opcode remains accessible.
    pub fn decode_all(&mut self) -> Result<(), DecodeError> {
        while self.cursor < self.code.len() {
            self.step()?;
        }
        debug_assert_eq!(
            self.insts.iter().map(Instruction::size).sum::<usize>(),
            self.code.len()
        );
        Ok(())
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.insts
    }

    pub fn into_instructions(self) -> Vec<Instruction> {
        self.insts
    }

    fn step(&mut self) -> Result<(), DecodeError> {
        let voff = self.cursor;
        let offset = self.pages.physical_of(voff)?;
        let op = self.code[voff];
        let def = self
            .table
            .get(op)
            .ok_or(DecodeError::UnknownOpcode { opcode: op, offset })?;

        let operands = match def.kind {
            DecodeKind::Fixed => {
                let size = def.size as usize;
                if size == 0 {
                    return Err(DecodeError::UnsupportedOpcode {
                        opcode: op,
                        name: def.name.clone(),
                        offset,
                    });
                }
                self.take(voff + 1, size - 1, &def.name, offset)?
            }
            DecodeKind::ShortString => {
                // length byte, then that many payload bytes: 2 + n total
                let len = *self.code.get(voff + 1).ok_or(DecodeError::Truncated {
                    name: def.name.clone(),
                    offset,
                    need: 2,
                    have: self.code.len() - voff,
                })? as usize;
                self.take(voff + 1, 1 + len, &def.name, offset)?
            }
            DecodeKind::LongString => {
                return Err(DecodeError::UnsupportedOpcode {
                    opcode: op,
                    name: def.name.clone(),
                    offset,
                });
            }
        };

        self.cursor = voff + 1 + operands.len();
        self.insts.push(Instruction {
            opcode: op,
            operands,
            offset,
            voffset: voff,
            page: voff / PAGE_SIZE,
            kind: def.kind,
        });
        Ok(())
    }

    fn take(
        &self,
        from: usize,
        count: usize,
        name: &str,
        offset: usize,
    ) -> Result<Vec<u8>, DecodeError> {
        if from + count > self.code.len() {
            return Err(DecodeError::Truncated {
                name: name.to_owned(),
                offset,
                need: count,
                have: self.code.len() - from,
            });
        }
        Ok(self.code[from..from + count].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::opcode::{OP_SPUSH, OP_SPUSHL};

    fn flat_pages(len: usize) -> PageMap {
        PageMap::new(vec![0], len)
    }

    fn decode(code: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
        let pages = flat_pages(code.len());
        let mut decoder = Decoder::new(code, &pages, OpcodeTable::builtin());
        decoder.decode_all()?;
        Ok(decoder.into_instructions())
    }

    #[test]
    fn default_rule_reads_table_size() {
        // pushb 0x2A; pushw 0x1234; iadd
        let insts = decode(&[0x25, 0x2A, 0x26, 0x12, 0x34, 0x01]).unwrap();
        assert_eq!(insts.len(), 3);
        assert_eq!(insts[0].operands, vec![0x2A]);
        assert_eq!(insts[1].operands, vec![0x12, 0x34]);
        assert_eq!(insts[2].size(), 1);
        assert_eq!(insts[2].offset, 5);
    }

    #[test]
    fn short_string_push_is_self_describing() {
        let code = [OP_SPUSH, 0x05, b'h', b'e', b'l', b'l', b'o'];
        let insts = decode(&code).unwrap();
        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].size(), 2 + 5);
        assert_eq!(insts[0].string_text().unwrap(), "hello");
        // byte rendering hides the payload, keeping only opcode + length
        assert_eq!(insts[0].formatted_bytes(), "6205");
    }

    #[test]
    fn string_text_escapes_newlines() {
        let code = [OP_SPUSH, 0x03, b'a', b'\n', b'b'];
        let insts = decode(&code).unwrap();
        assert_eq!(insts[0].string_text().unwrap(), "a\\nb");
    }

    #[test]
    fn coverage_is_exact() {
        let code = [0x00, 0x25, 0x07, 0x27, 0, 0, 0, 42, 0x01];
        let insts = decode(&code).unwrap();
        let total: usize = insts.iter().map(Instruction::size).sum();
        assert_eq!(total, code.len());
        // offsets are strictly increasing and gap-free
        let mut expected = 0;
        for inst in &insts {
            assert_eq!(inst.voffset, expected);
            expected += inst.size();
        }
    }

    #[test]
    fn unknown_opcode_preserves_prior_instructions() {
        let code = [0x00, 0x01, 0xFE];
        let pages = flat_pages(code.len());
        let mut decoder = Decoder::new(&code, &pages, OpcodeTable::builtin());
        let err = decoder.decode_all().unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnknownOpcode { opcode: 0xFE, offset: 2 }
        ));
        assert_eq!(decoder.instructions().len(), 2);
    }

    #[test]
    fn long_string_push_is_explicitly_unsupported() {
        let err = decode(&[OP_SPUSHL, 0x00, 0x10]).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedOpcode { opcode: 0x63, .. }));
    }

    #[test]
    fn truncated_operand_payload_is_an_error() {
        let err = decode(&[0x27, 0x00]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn location_formatting_is_fixed_width() {
        let pages = PageMap::new(vec![0x2000, 0], 2 * PAGE_SIZE);
        let inst = Instruction {
            opcode: 0,
            operands: vec![],
            offset: pages.physical_of(0x10).unwrap(),
            voffset: 0x10,
            page: 0,
            kind: DecodeKind::Fixed,
        };
        assert_eq!(inst.formatted_location(), "00000:0002010");
    }
}
