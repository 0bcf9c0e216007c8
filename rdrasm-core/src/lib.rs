//! rdrasm-core
//!
//! Decoding and re-encoding of RAGE script resource containers
//! (`.xsc` for Xbox 360, `.csc` for PS3).
//!
//! The pipeline runs in fixed stages: [`format::container`] unwraps the
//! resource (decrypt + decompress), [`format::script`] locates and reads the
//! script header and builds the paged address space, [`disasm`] decodes the
//! code region into an instruction sequence and resolves its control flow,
//! and [`asm`] serializes a sequence back into a loadable container.
//!
//! The opcode table and the native-name table are reference data, not code:
//! they are deserialized once (see [`tables`]) and passed by reference into
//! the pipeline.

pub mod asm;
pub mod disasm;
pub mod format;
pub mod tables;
