use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use twofish::Twofish;

use crate::error::{Error, Result};

/// A single 16-byte Two-Fish block.
pub type Block = [u8; 16];

/// 128-bit Two-Fish key, operated in ECB mode one block at a time.
///
/// The protocol never chains blocks through this type directly; the CCM-style
/// MAC in [`crate::mac`] is responsible for block chaining.
#[derive(Clone)]
pub struct TwofishKey(Twofish);

impl TwofishKey {
    /// Creates a cipher keyed with `key`.
    pub fn new(key: &[u8; 16]) -> Self {
        Self(Twofish::new_from_slice(key).expect("16-byte key"))
    }

    /// Creates a cipher from a key slice, rejecting anything but 16 bytes.
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        let key: [u8; 16] = key
            .try_into()
            .map_err(|_| Error::InvalidKeyLength(key.len()))?;
        Ok(Self::new(&key))
    }

    /// Encrypts a single 16-byte block in place.
    #[must_use]
    pub fn encrypt(&self, mut block: Block) -> Block {
        let ga = cipher::generic_array::GenericArray::from_mut_slice(&mut block);
        self.0.encrypt_block(ga);
        block
    }

    /// Decrypts a single 16-byte block in place.
    #[must_use]
    pub fn decrypt(&self, mut block: Block) -> Block {
        let ga = cipher::generic_array::GenericArray::from_mut_slice(&mut block);
        self.0.decrypt_block(ga);
        block
    }
}

impl std::fmt::Debug for TwofishKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwofishKey").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = TwofishKey::new(&[0x42; 16]);
        let block = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        let ct = key.encrypt(block);
        assert_ne!(ct, block);
        let pt = key.decrypt(ct);
        assert_eq!(pt, block);
    }
}
