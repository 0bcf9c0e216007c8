use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;

use crate::disasm::decoder::Instruction;
use crate::disasm::opcode::{self, JUMP_SIZE, OP_ENTER, OP_NATIVE};
use crate::format::pages::PageMap;
use crate::tables::NativeNames;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// Every jump target must exist by construction, so a miss is
    /// structural corruption, unlike an unresolved call.
    #[error("jump at {offset:#x} targets {target:#x}, which is not an instruction boundary")]
    MissingJumpTarget { offset: usize, target: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct Function {
    /// Physical offset of the enter opcode.
    pub entry: usize,
    pub name: String,
    pub arg_count: u8,
    pub frame_size: u16,
    /// Offsets of call instructions that reference this function.
    /// Back-references only; the function does not own its callers.
    pub references: Vec<usize>,
}

/// Packed native-call descriptor decoded from the first two operand
/// bytes: index from byte0 bits 6-7 joined with byte1, argument count
/// from byte0 bits 1-5, return flag from byte0 bit 0.
pub fn unpack_native(b0: u8, b1: u8) -> (u16, u8, bool) {
    let index = (((b0 as u16) << 2) & 0x300) | b1 as u16;
    let arg_count = (b0 & 0x3E) >> 1;
    let has_return = b0 & 1 == 1;
    (index, arg_count, has_return)
}

#[derive(Debug, Clone)]
pub struct NativeCall {
    pub index: u16,
    pub arg_count: u8,
    pub has_return: bool,
    pub name: String,
}

/// Resolver result for one instruction, kept out-of-band so the decoded
/// sequence itself stays immutable.
#[derive(Debug, Clone)]
pub enum Target {
    Enter { function: usize },
    Call { target: usize, function: Option<usize> },
    Native(NativeCall),
    Jump { target: usize, label: String },
}

/// Write-once output of the resolve pass.
#[derive(Debug, Default)]
pub struct Analysis {
    pub functions: BTreeMap<usize, Function>,
    /// Physical offset -> synthetic label, for every jump target.
    pub jump_labels: BTreeMap<usize, String>,
    /// Instruction offset -> resolution.
    pub targets: HashMap<usize, Target>,
    /// Calls whose computed target is not a known function entry.
    pub invalid_calls: u32,
}

impl Analysis {
    /// Function whose body contains `offset` (the nearest entry at or
    /// before it).
    pub fn owner(&self, offset: usize) -> Option<&Function> {
        self.functions.range(..=offset).next_back().map(|(_, f)| f)
    }
}

/// Second pass over the fully decoded sequence. Requires decoding to have
/// finished: both forward and backward references are legal.
pub struct Resolver<'a> {
    pages: &'a PageMap,
    natives: &'a [u32],
    names: &'a NativeNames,
}

impl<'a> Resolver<'a> {
    pub fn new(pages: &'a PageMap, natives: &'a [u32], names: &'a NativeNames) -> Self {
        Self {
            pages,
            natives,
            names,
        }
    }

    pub fn resolve(&self, insts: &[Instruction]) -> Result<Analysis, ResolveError> {
        let mut analysis = Analysis::default();
        let boundaries: HashSet<usize> = insts.iter().map(|i| i.offset).collect();

        // function table first, so calls in earlier functions can land in
        // later ones
        for inst in insts.iter().filter(|i| i.opcode == OP_ENTER) {
            let arg_count = inst.operands.first().copied().unwrap_or(0);
            let frame_size = match inst.operands.get(1..3) {
                Some([hi, lo]) => u16::from_be_bytes([*hi, *lo]),
                _ => 0,
            };
            analysis.functions.insert(
                inst.offset,
                Function {
                    entry: inst.offset,
                    name: format!("sub_{:06X}", inst.offset),
                    arg_count,
                    frame_size,
                    references: Vec::new(),
                },
            );
        }

        // jump-target table before any jump resolves, so forward jumps work
        for inst in insts.iter().filter(|i| opcode::is_jump(i.opcode)) {
            let target = jump_target(inst);
            if !boundaries.contains(&target) {
                return Err(ResolveError::MissingJumpTarget {
                    offset: inst.offset,
                    target,
                });
            }
            analysis
                .jump_labels
                .entry(target)
                .or_insert_with(|| format!("loc_{target:X}"));
        }

        for inst in insts {
            if inst.opcode == OP_ENTER {
                analysis
                    .targets
                    .insert(inst.offset, Target::Enter { function: inst.offset });
            } else if inst.opcode == OP_NATIVE {
                analysis
                    .targets
                    .insert(inst.offset, Target::Native(self.native_call(inst)));
            } else if opcode::is_call(inst.opcode) {
                let target = self.call_target(inst);
                let resolved = match analysis.functions.get_mut(&target) {
                    Some(func) => {
                        func.references.push(inst.offset);
                        Some(target)
                    }
                    None => {
                        analysis.invalid_calls += 1;
                        None
                    }
                };
                analysis.targets.insert(
                    inst.offset,
                    Target::Call {
                        target,
                        function: resolved,
                    },
                );
            } else if opcode::is_jump(inst.opcode) {
                let target = jump_target(inst);
                let label = analysis.jump_labels[&target].clone();
                analysis
                    .targets
                    .insert(inst.offset, Target::Jump { target, label });
            }
        }

        if analysis.invalid_calls > 0 {
            log::warn!("{} invalid calls found", analysis.invalid_calls);
        }
        Ok(analysis)
    }

    /// 24-bit call target: imm16 supplies the low bits, the opcode's
    /// distance from the family base the high bits. The result is a
    /// virtual code offset, adjusted by the base of the page it falls in.
    fn call_target(&self, inst: &Instruction) -> usize {
        let imm = match inst.operands.get(0..2) {
            Some([hi, lo]) => u16::from_be_bytes([*hi, *lo]) as usize,
            _ => 0,
        };
        let voff = imm | ((inst.opcode - opcode::OP_CALL2) as usize) << 16;
        // outside the mapped region the call cannot resolve anyway; the
        // raw virtual offset is still worth reporting
        self.pages.physical_of(voff).unwrap_or(voff)
    }

    fn native_call(&self, inst: &Instruction) -> NativeCall {
        let b0 = inst.operands.first().copied().unwrap_or(0);
        let b1 = inst.operands.get(1).copied().unwrap_or(0);
        let (index, arg_count, has_return) = unpack_native(b0, b1);
        let name = match self.natives.get(index as usize) {
            Some(&hash) => self.names.display(hash),
            None => {
                log::warn!(
                    "native index {} out of range at {:#x} ({} natives)",
                    index,
                    inst.offset,
                    self.natives.len()
                );
                format!("invalid_native_{index}")
            }
        };
        NativeCall {
            index,
            arg_count,
            has_return,
            name,
        }
    }
}

/// Absolute jump target: instruction offset + fixed jump length + signed
/// relative byte (the second operand byte; the first is a condition tag).
fn jump_target(inst: &Instruction) -> usize {
    let rel = inst.operands.get(1).copied().unwrap_or(0) as i8;
    ((inst.offset + JUMP_SIZE) as isize + rel as isize) as usize
}
