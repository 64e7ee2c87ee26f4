//! AES-128-CBC payload encryption.
//!
//! Every session starts with the protocol's bootstrap key and IV. The Auth
//! exchange hands back a per-device key which replaces the bootstrap key for
//! the rest of the session; the IV is never replaced.
//!
//! Callers pad plaintext to [`BLOCK_SIZE`] before encrypting (see
//! [`crate::codec::pad_to_multiple`]).

use aes::Aes128;
use aes::cipher::{Block, BlockDecrypt, BlockEncrypt, KeyInit};

use crate::error::{Error, Result};

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Key used for the Auth exchange, before a device key is negotiated.
pub const BOOTSTRAP_KEY: [u8; 16] = [
    0x09, 0x76, 0x28, 0x34, 0x3f, 0xe9, 0x9e, 0x23, 0x76, 0x5c, 0x15, 0x13, 0xac, 0xcf, 0x8b, 0x02,
];

/// Fixed IV used for every packet of every session.
pub const BOOTSTRAP_IV: [u8; 16] = [
    0x56, 0x2e, 0x17, 0x99, 0x6d, 0x09, 0x3d, 0x28, 0xdd, 0xb3, 0xba, 0x69, 0x5a, 0x2e, 0x6f, 0x58,
];

/// Key material for one device session.
#[derive(Clone, PartialEq, Eq)]
pub struct CryptoContext {
    key: [u8; 16],
    iv: [u8; 16],
}

impl Default for CryptoContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoContext {
    /// Creates a context holding the bootstrap key and IV.
    pub fn new() -> Self {
        Self {
            key: BOOTSTRAP_KEY,
            iv: BOOTSTRAP_IV,
        }
    }

    /// Replaces the key with one negotiated by the Auth exchange.
    pub fn set_key(&mut self, key: [u8; 16]) {
        self.key = key;
    }

    /// Returns `true` while the bootstrap key is still in use.
    pub fn is_bootstrap(&self) -> bool {
        self.key == BOOTSTRAP_KEY
    }

    /// Encrypts block-aligned plaintext.
    ///
    /// # Panics
    ///
    /// Panics if `plaintext.len()` is not a multiple of [`BLOCK_SIZE`]. Request
    /// encoding always pads first, so this indicates a bug in the caller.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        assert!(
            plaintext.len() % BLOCK_SIZE == 0,
            "plaintext length {} is not a multiple of the AES block size",
            plaintext.len()
        );

        let cipher = Aes128::new(&self.key.into());
        let mut output = plaintext.to_vec();
        let mut chain = self.iv;

        for chunk in output.chunks_exact_mut(BLOCK_SIZE) {
            xor_in_place(chunk, &chain);
            cipher.encrypt_block(Block::<Aes128>::from_mut_slice(chunk));
            chain.copy_from_slice(chunk);
        }

        output
    }

    /// Decrypts ciphertext received from a device.
    ///
    /// Returns a protocol error if the length is not block-aligned.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(Error::Protocol(format!(
                "ciphertext length {} is not a multiple of {}",
                ciphertext.len(),
                BLOCK_SIZE
            )));
        }

        let cipher = Aes128::new(&self.key.into());
        let mut output = ciphertext.to_vec();
        let mut chain = self.iv;

        for chunk in output.chunks_exact_mut(BLOCK_SIZE) {
            let mut next_chain = [0u8; BLOCK_SIZE];
            next_chain.copy_from_slice(chunk);
            cipher.decrypt_block(Block::<Aes128>::from_mut_slice(chunk));
            xor_in_place(chunk, &chain);
            chain = next_chain;
        }

        Ok(output)
    }
}

fn xor_in_place(block: &mut [u8], mask: &[u8; BLOCK_SIZE]) {
    for (byte, m) in block.iter_mut().zip(mask) {
        *byte ^= m;
    }
}

// Implement Debug manually to avoid exposing the negotiated key
impl std::fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoContext")
            .field("key", &"[REDACTED]")
            .field("bootstrap", &self.is_bootstrap())
            .finish()
    }
}
