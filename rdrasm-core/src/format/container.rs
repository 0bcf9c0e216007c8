use std::io::Cursor;

use binrw::BinRead;
use bytes::Bytes;
use thiserror::Error;

use crate::format::key::ScriptKey;
use crate::format::pages::PAGE_SIZE;
use crate::format::transform::{self, Compression, TransformError, BLOCK_SIZE};

/// Resource magic written for PS3 containers (`.csc`).
pub const RESOURCE_MAGIC_PS3: u32 = 0x8643_5352;
/// Resource magic written for Xbox 360 containers (`.xsc`).
pub const RESOURCE_MAGIC_X360: u32 = 0x8543_5352;

/// Magic marking the embedded script header inside the decoded buffer.
pub const SCRIPT_HEADER_MAGIC: u32 = 0xA8D7_4300;

/// Resource version that means "encrypted + compressed".
const ENCRYPTED_VERSION: u32 = 2;

/// The cipher is applied this many passes; the count belongs to the title's
/// key schedule and is not configurable.
pub(crate) const CIPHER_ROUNDS: usize = 16;

/// Bytes between the decrypted payload start and the compressed stream.
pub(crate) const LEAD_IN: usize = 8;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container is {0} bytes, too short for a resource header")]
    Truncated(usize),
    #[error("malformed resource header")]
    BadHeader(#[from] binrw::Error),
    #[error("container is encrypted but no key was supplied")]
    MissingKey,
    #[error("payload transform failed")]
    Transform(#[from] TransformError),
    #[error("payload decompression failed")]
    DecompressFailed(#[source] TransformError),
    #[error("script header magic not found after scanning {0} bytes")]
    HeaderNotFound(usize),
    #[error("{name} points outside the decoded buffer ({offset:#x} of {len:#x})")]
    PointerOutOfBounds {
        name: &'static str,
        offset: usize,
        len: usize,
    },
}

/// Outer 16-byte resource header. All fields big-endian. The size fields
/// are never stored; they are always derived from `flags2`, so re-encoding
/// the original flag words reproduces them exactly.
#[derive(BinRead, Debug, Clone, serde::Serialize)]
#[br(big)]
pub struct ResourceHeader {
    pub magic: u32,
    pub version: u32,
    pub flags1: u32,
    pub flags2: u32,
}

impl ResourceHeader {
    /// Virtual allocation size: low 15 bits of flags2.
    pub fn virtual_size(&self) -> usize {
        (self.flags2 & 0x7FFF) as usize
    }

    /// Physical allocation size: bits 14-27 of flags2, minus the hole at
    /// bit 15 (the mask is a format quirk, kept verbatim).
    pub fn physical_size(&self) -> usize {
        ((self.flags2 & 0x0FFF_7000) >> 14) as usize
    }

    pub fn reserved(&self) -> u32 {
        self.flags2 & 0x7000_0000
    }

    pub fn is_extended(&self) -> bool {
        self.flags2 & 0x8000_0000 != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.version == ENCRYPTED_VERSION
    }

    /// Exact size of the decoded buffer for an encrypted container.
    pub fn decoded_size(&self) -> usize {
        self.physical_size() + self.virtual_size()
    }
}

/// An unwrapped resource: the parsed outer header plus the fully decrypted
/// and decompressed buffer every later stage addresses. The buffer is
/// immutable once produced.
#[derive(Debug, Clone)]
pub struct Container {
    pub header: ResourceHeader,
    pub data: Bytes,
}

impl Container {
    /// Unwrap raw file bytes. `key` may be `None` for raw (version != 2)
    /// containers; encrypted ones fail with [`ContainerError::MissingKey`].
    pub fn read(
        raw: &[u8],
        key: Option<&ScriptKey>,
        codec: &dyn Compression,
    ) -> Result<Self, ContainerError> {
        if raw.len() < BLOCK_SIZE {
            return Err(ContainerError::Truncated(raw.len()));
        }
        let header = ResourceHeader::read(&mut Cursor::new(raw))?;

        let data = if header.is_encrypted() {
            let key = key.ok_or(ContainerError::MissingKey)?;

            // the 16-byte header is consumed; the cipher needs the rest
            // padded up to a block multiple
            let mut body = raw[BLOCK_SIZE..].to_vec();
            let pad = BLOCK_SIZE - body.len() % BLOCK_SIZE;
            body.resize(body.len() + pad, 0);

            for _ in 0..CIPHER_ROUNDS {
                transform::decrypt(&mut body, key)?;
            }

            let compressed = &body[LEAD_IN..];
            let expected = header.decoded_size();
            let out = codec
                .decompress(compressed, expected)
                .map_err(ContainerError::DecompressFailed)?;
            if out.len() != expected {
                return Err(ContainerError::DecompressFailed(
                    TransformError::SizeMismatch {
                        got: out.len(),
                        expected,
                    },
                ));
            }
            Bytes::from(out)
        } else {
            Bytes::copy_from_slice(&raw[BLOCK_SIZE..])
        };

        Ok(Self { header, data })
    }

    /// Locate the embedded script header: its position varies by build but
    /// is always page-aligned, so check a 32-bit candidate at each page
    /// boundary until the magic matches.
    pub fn find_script_header(&self) -> Result<usize, ContainerError> {
        let mut offset = 0usize;
        while offset + 4 <= self.data.len() {
            let magic = u32::from_be_bytes([
                self.data[offset],
                self.data[offset + 1],
                self.data[offset + 2],
                self.data[offset + 3],
            ]);
            if magic == SCRIPT_HEADER_MAGIC {
                return Ok(offset);
            }
            offset += PAGE_SIZE;
        }
        Err(ContainerError::HeaderNotFound(self.data.len()))
    }
}
