//! Payload decryption contract.
//!
//! The cipher itself is an external collaborator; the pipeline parses the
//! cipher mode from the crypto word, hands the ciphertext plus the media
//! header (as associated data) to the [`Decryptor`], and drops the packet
//! silently when authentication fails.

use crate::error::DecodeError;

/// Cipher mode carried in the high byte of the crypto word.
///
/// Mode 0 is reserved and rejected on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CipherMode {
    Aes128Ecb = 1,
    Aes128Ctr = 2,
    Aes128Cfb = 3,
}

impl CipherMode {
    pub fn from_u8(mode: u8) -> Result<Self, DecodeError> {
        match mode {
            1 => Ok(CipherMode::Aes128Ecb),
            2 => Ok(CipherMode::Aes128Ctr),
            3 => Ok(CipherMode::Aes128Cfb),
            other => Err(DecodeError::UnknownCipherMode(other)),
        }
    }
}

/// Authenticated decryption of one packet payload.
///
/// Returns the plaintext, or `None` when the integrity check fails — the
/// ingress stage then drops the packet without failing the frame.
pub trait Decryptor: Send {
    fn decrypt(&mut self, ciphertext: &[u8], aad: &[u8], mode: CipherMode) -> Option<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_zero_and_out_of_range_rejected() {
        assert!(CipherMode::from_u8(0).is_err());
        assert!(CipherMode::from_u8(4).is_err());
        assert_eq!(CipherMode::from_u8(2).unwrap(), CipherMode::Aes128Ctr);
    }
}
