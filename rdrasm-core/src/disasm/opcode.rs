//! Opcode values the resolver keys on. Everything else about an opcode
//! (name, size, decode rule) lives in the reference table.

/// Function prologue; operands are `arg_count: u8, frame_size: u16, flags: u8`.
pub const OP_ENTER: u8 = 0x41;
/// Function epilogue.
pub const OP_LEAVE: u8 = 0x42;
/// Native engine call; operands are a packed two-byte descriptor.
pub const OP_NATIVE: u8 = 0x45;

/// First and last of the relative-jump family. The families are
/// contiguous ranges by construction.
pub const OP_JMP: u8 = 0x4A;
pub const OP_JMPGT: u8 = 0x51;

/// First and last of the direct-call family. The opcode's distance from
/// `OP_CALL2` supplies the high bits of the 24-bit call target.
pub const OP_CALL2: u8 = 0x52;
pub const OP_CALL2HF: u8 = 0x61;

/// Short inline string push (length byte + payload).
pub const OP_SPUSH: u8 = 0x62;
/// Long string push; its encoding is unfinished upstream and decoding one
/// is an explicit error.
pub const OP_SPUSHL: u8 = 0x63;

/// Jump instructions occupy a fixed 3 bytes; the relative offset is taken
/// from the second operand byte.
pub const JUMP_SIZE: usize = 3;

#[inline]
pub fn is_jump(op: u8) -> bool {
    (OP_JMP..=OP_JMPGT).contains(&op)
}

#[inline]
pub fn is_call(op: u8) -> bool {
    (OP_CALL2..=OP_CALL2HF).contains(&op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_are_contiguous_and_disjoint() {
        assert!(is_jump(OP_JMP));
        assert!(is_jump(OP_JMPGT));
        assert!(!is_jump(OP_CALL2));
        assert!(is_call(OP_CALL2));
        assert!(is_call(OP_CALL2HF));
        assert!(!is_call(OP_SPUSH));
        assert_eq!(OP_JMPGT + 1, OP_CALL2);
    }
}
