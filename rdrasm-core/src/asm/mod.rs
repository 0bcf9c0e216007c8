//! Reassembly: serialize an instruction sequence back into the code
//! pages of a decoded script and wrap the result in a fresh container.
//! The non-code parts of the buffer (headers, tables, slack) are carried
//! over untouched, so an unmodified decode/encode pass is byte-exact.

use std::str::FromStr;

use thiserror::Error;

use crate::disasm::decoder::Instruction;
use crate::format::container::{
    CIPHER_ROUNDS, LEAD_IN, RESOURCE_MAGIC_PS3, RESOURCE_MAGIC_X360,
};
use crate::format::key::ScriptKey;
use crate::format::pages::AddressError;
use crate::format::script::Script;
use crate::format::transform::{self, Compression, TransformError, BLOCK_SIZE};

/// Console target, selecting the resource magic and file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Ps3,
    Xbox360,
}

impl Platform {
    pub fn magic(self) -> u32 {
        match self {
            Platform::Ps3 => RESOURCE_MAGIC_PS3,
            Platform::Xbox360 => RESOURCE_MAGIC_X360,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Platform::Ps3 => "csc",
            Platform::Xbox360 => "xsc",
        }
    }

    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            RESOURCE_MAGIC_PS3 => Some(Platform::Ps3),
            RESOURCE_MAGIC_X360 => Some(Platform::Xbox360),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown platform {0:?}, expected ps3 or x360")]
pub struct PlatformParseError(String);

impl FromStr for Platform {
    type Err = PlatformParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ps3" => Ok(Platform::Ps3),
            "x360" | "xbox360" | "360" => Ok(Platform::Xbox360),
            other => Err(PlatformParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("serialized code is {got} bytes, the script header says {expected}")]
    SizeMismatch { got: usize, expected: usize },
    #[error("container is encrypted but no key was supplied")]
    MissingKey,
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("payload transform failed")]
    Transform(#[from] TransformError),
}

/// Instruction sequence back to flat bytes, opcode then operands.
pub fn serialize_code(insts: &[Instruction]) -> Vec<u8> {
    let mut code = Vec::with_capacity(insts.iter().map(Instruction::size).sum());
    for inst in insts {
        code.push(inst.opcode);
        code.extend_from_slice(&inst.operands);
    }
    code
}

pub struct Reassembler<'a> {
    script: &'a Script,
}

impl<'a> Reassembler<'a> {
    pub fn new(script: &'a Script) -> Self {
        Self { script }
    }

    /// Produce a complete container file: the edited instructions patched
    /// into the script's code pages, re-wrapped under `platform`'s magic.
    /// Version and flag words are carried over from the decoded resource,
    /// so the size fields derived from them still hold.
    pub fn encode(
        &self,
        insts: &[Instruction],
        platform: Platform,
        key: Option<&ScriptKey>,
        codec: &dyn Compression,
    ) -> Result<Vec<u8>, EncodeError> {
        let image = serialize_code(insts);
        let expected = self.script.pages.code_size();
        if image.len() != expected {
            return Err(EncodeError::SizeMismatch {
                got: image.len(),
                expected,
            });
        }

        let mut data = self.script.data.to_vec();
        self.script.pages.patch_image(&mut data, &image)?;

        let resource = &self.script.resource;
        let mut raw = Vec::with_capacity(BLOCK_SIZE + data.len());
        raw.extend_from_slice(&platform.magic().to_be_bytes());
        raw.extend_from_slice(&resource.version.to_be_bytes());
        raw.extend_from_slice(&resource.flags1.to_be_bytes());
        raw.extend_from_slice(&resource.flags2.to_be_bytes());

        if resource.is_encrypted() {
            let key = key.ok_or(EncodeError::MissingKey)?;
            let compressed = codec.compress(&data)?;

            let mut body = vec![0u8; LEAD_IN];
            body.extend_from_slice(&compressed);
            let pad = BLOCK_SIZE - body.len() % BLOCK_SIZE;
            body.resize(body.len() + pad, 0);
            for _ in 0..CIPHER_ROUNDS {
                transform::encrypt(&mut body, key)?;
            }
            raw.extend_from_slice(&body);
        } else {
            raw.extend_from_slice(&data);
        }

        log::debug!(
            "encoded {} instruction(s) into a {} byte .{} container",
            insts.len(),
            raw.len(),
            platform.extension(),
        );
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::decoder::Decoder;
    use crate::disasm::opcode::{OP_CALL2, OP_ENTER, OP_JMP, OP_LEAVE};
    use crate::format::container::SCRIPT_HEADER_MAGIC;
    use crate::format::pages::PAGE_SIZE;
    use crate::format::transform::Stored;
    use crate::tables::OpcodeTable;

    // decoded buffer: code page 0 at physical 0, script header in page 1
    fn script_buffer() -> Vec<u8> {
        let mut buf = vec![0u8; 2 * PAGE_SIZE];

        let mut code = Vec::new();
        code.extend_from_slice(&[OP_ENTER, 0, 0, 0, 0]);
        code.extend_from_slice(&[OP_CALL2, 0x00, 0x00]);
        code.extend_from_slice(&[OP_JMP, 0x00, 0x00]);
        code.extend_from_slice(&[OP_LEAVE, 0, 0]);
        code.resize(32, 0x00); // nop filler
        buf[..32].copy_from_slice(&code);

        let h = PAGE_SIZE;
        let put = |buf: &mut [u8], at: usize, v: u32| {
            buf[at..at + 4].copy_from_slice(&v.to_be_bytes());
        };
        put(&mut buf, h, SCRIPT_HEADER_MAGIC);
        put(&mut buf, h + 4, (h + 64) as u32); // pageMapPtr
        put(&mut buf, h + 8, (h + 64) as u32); // codePagesPtr
        put(&mut buf, h + 12, 32); // codeSize
        put(&mut buf, h + 20, 0); // staticsSize
        put(&mut buf, h + 24, (h + 80) as u32); // staticsPtr
        put(&mut buf, h + 32, 0); // nativesSize
        put(&mut buf, h + 36, (h + 80) as u32); // nativesPtr
        put(&mut buf, h + 64, 0); // page 0 base
        buf
    }

    fn raw_container(version: u32, flags2: u32, platform: Platform) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&platform.magic().to_be_bytes());
        raw.extend_from_slice(&version.to_be_bytes());
        raw.extend_from_slice(&0u32.to_be_bytes());
        raw.extend_from_slice(&flags2.to_be_bytes());
        raw
    }

    fn decode_insts(script: &Script) -> Vec<Instruction> {
        let image = script.code_image().unwrap();
        let mut decoder = Decoder::new(&image, &script.pages, OpcodeTable::builtin());
        decoder.decode_all().unwrap();
        decoder.into_instructions()
    }

    #[test]
    fn raw_round_trip_is_byte_exact() {
        let mut raw = raw_container(1, 0, Platform::Xbox360);
        raw.extend_from_slice(&script_buffer());

        let script = Script::decode(&raw, None, &Stored).unwrap();
        let insts = decode_insts(&script);
        let out = Reassembler::new(&script)
            .encode(&insts, Platform::Xbox360, None, &Stored)
            .unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn encrypted_round_trip_is_byte_exact() {
        let key = ScriptKey::from_bytes([3u8; 32]);
        let buf = script_buffer();

        // vsize covers the whole decoded buffer, psize 0
        let flags2 = buf.len() as u32;
        let mut body = vec![0u8; LEAD_IN];
        body.extend_from_slice(&buf);
        let pad = BLOCK_SIZE - body.len() % BLOCK_SIZE;
        body.resize(body.len() + pad, 0);
        for _ in 0..CIPHER_ROUNDS {
            transform::encrypt(&mut body, &key).unwrap();
        }
        let mut raw = raw_container(2, flags2, Platform::Ps3);
        raw.extend_from_slice(&body);

        let script = Script::decode(&raw, Some(&key), &Stored).unwrap();
        assert_eq!(&script.data[..], &buf[..]);
        let insts = decode_insts(&script);
        let out = Reassembler::new(&script)
            .encode(&insts, Platform::Ps3, Some(&key), &Stored)
            .unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn edited_instruction_lands_in_the_code_page() {
        let mut raw = raw_container(1, 0, Platform::Xbox360);
        raw.extend_from_slice(&script_buffer());
        let script = Script::decode(&raw, None, &Stored).unwrap();
        let mut insts = decode_insts(&script);

        // retarget the jump without changing any size
        insts[2].operands[1] = 0x03;
        let out = Reassembler::new(&script)
            .encode(&insts, Platform::Xbox360, None, &Stored)
            .unwrap();
        assert_ne!(out, raw);
        assert_eq!(out[16 + 8], OP_JMP);
        assert_eq!(out[16 + 10], 0x03);
        // non-code bytes untouched
        assert_eq!(&out[16 + 32..], &raw[16 + 32..]);
    }

    #[test]
    fn size_drift_is_rejected() {
        let mut raw = raw_container(1, 0, Platform::Xbox360);
        raw.extend_from_slice(&script_buffer());
        let script = Script::decode(&raw, None, &Stored).unwrap();
        let mut insts = decode_insts(&script);
        insts.pop();

        let err = Reassembler::new(&script)
            .encode(&insts, Platform::Xbox360, None, &Stored)
            .unwrap_err();
        assert!(matches!(
            err,
            EncodeError::SizeMismatch { got: 31, expected: 32 }
        ));
    }

    #[test]
    fn encrypted_output_requires_key() {
        let key = ScriptKey::from_bytes([3u8; 32]);
        let buf = script_buffer();
        let flags2 = buf.len() as u32;
        let mut body = vec![0u8; LEAD_IN];
        body.extend_from_slice(&buf);
        let pad = BLOCK_SIZE - body.len() % BLOCK_SIZE;
        body.resize(body.len() + pad, 0);
        for _ in 0..CIPHER_ROUNDS {
            transform::encrypt(&mut body, &key).unwrap();
        }
        let mut raw = raw_container(2, flags2, Platform::Ps3);
        raw.extend_from_slice(&body);

        let script = Script::decode(&raw, Some(&key), &Stored).unwrap();
        let insts = decode_insts(&script);
        assert!(matches!(
            Reassembler::new(&script).encode(&insts, Platform::Ps3, None, &Stored),
            Err(EncodeError::MissingKey)
        ));
    }

    #[test]
    fn platform_parsing_and_magic() {
        assert_eq!("ps3".parse::<Platform>().unwrap(), Platform::Ps3);
        assert_eq!("X360".parse::<Platform>().unwrap(), Platform::Xbox360);
        assert!("wii".parse::<Platform>().is_err());
        assert_eq!(Platform::from_magic(0x8543_5352), Some(Platform::Xbox360));
        assert_eq!(Platform::Ps3.extension(), "csc");
    }
}
