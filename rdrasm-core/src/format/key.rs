use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("unable to read key file")]
    Io(#[from] std::io::Error),
    #[error("key file is not valid hex")]
    Hex(#[from] hex::FromHexError),
    #[error("key is {0} bytes, expected 32")]
    BadLength(usize),
}

/// The 256-bit title key used by the container cipher. Key management is
/// external; we only accept a key the caller already has.
#[derive(Clone)]
pub struct ScriptKey([u8; 32]);

impl ScriptKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-digit hex string (surrounding whitespace ignored).
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let raw = hex::decode(s.trim())?;
        let bytes: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::BadLength(raw.len()))?;
        Ok(Self(bytes))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_hex(&text)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for ScriptKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        f.write_str("ScriptKey(..)")
    }
}
