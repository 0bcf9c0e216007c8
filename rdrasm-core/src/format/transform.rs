//! The two black-box payload transforms: the AES block cipher and the
//! LZX-family compressor. Neither algorithm is ours; this module only
//! adapts them to the container codec's needs.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use lzxd::{Lzxd, WindowSize};
use thiserror::Error;

use crate::format::key::ScriptKey;

/// Cipher block size; encrypted payloads are padded to a multiple of this.
pub const BLOCK_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("payload length {0} is not a multiple of the cipher block size")]
    Misaligned(usize),
    #[error("compressed stream is corrupt: {0}")]
    CorruptStream(String),
    #[error("decompressed {got} bytes, expected {expected}")]
    SizeMismatch { got: usize, expected: usize },
    #[error("this codec has no compressor; supply an external one")]
    CompressUnsupported,
}

/// One ECB decryption pass over the whole payload. The container codec
/// applies this a fixed number of rounds (a property of the title's key
/// schedule, not a tunable).
pub fn decrypt(data: &mut [u8], key: &ScriptKey) -> Result<(), TransformError> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(TransformError::Misaligned(data.len()));
    }
    let cipher = Aes256::new(GenericArray::from_slice(key.as_bytes()));
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

/// One ECB encryption pass; exact inverse of [`decrypt`].
pub fn encrypt(data: &mut [u8], key: &ScriptKey) -> Result<(), TransformError> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(TransformError::Misaligned(data.len()));
    }
    let cipher = Aes256::new(GenericArray::from_slice(key.as_bytes()));
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

/// Payload compression seam. Decoding always has a real implementation;
/// the packing direction is an external collaborator that callers supply
/// when they need to emit compressed containers.
pub trait Compression {
    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, TransformError>;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, TransformError>;
}

/// LZX-compressed payloads, decoded with the `lzxd` crate.
pub struct Lzx {
    pub window: WindowSize,
}

impl Default for Lzx {
    fn default() -> Self {
        Self {
            window: WindowSize::KB64,
        }
    }
}

impl Compression for Lzx {
    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, TransformError> {
        let mut lzxd = Lzxd::new(self.window);
        let out = lzxd
            .decompress_next(data, expected_len)
            .map_err(|e| TransformError::CorruptStream(format!("{e:?}")))?;
        if out.len() != expected_len {
            return Err(TransformError::SizeMismatch {
                got: out.len(),
                expected: expected_len,
            });
        }
        Ok(out.to_vec())
    }

    fn compress(&self, _data: &[u8]) -> Result<Vec<u8>, TransformError> {
        Err(TransformError::CompressUnsupported)
    }
}

/// Identity codec for payloads stored uncompressed (and for tests).
pub struct Stored;

impl Compression for Stored {
    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, TransformError> {
        if data.len() < expected_len {
            return Err(TransformError::SizeMismatch {
                got: data.len(),
                expected: expected_len,
            });
        }
        Ok(data[..expected_len].to_vec())
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, TransformError> {
        Ok(data.to_vec())
    }
}
