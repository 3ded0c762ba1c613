//! Working-key derivation and payload decryption.
//!
//! Senders that encrypt their payload use AES-128-ECB with a key both sides
//! derive from a shared secret. ECB is what the wire format prescribes; each
//! 16-byte block decrypts independently, which is also what lets the
//! length-coded sub-protocols decrypt a single field in place.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, KeyInit};
use aes::Aes128;
use std::fmt;

/// Length of the derived working key.
pub const WORKING_KEY_LEN: usize = 16;

/// AES block size.
pub const AES_BLOCK_LEN: usize = 16;

/// Errors from payload decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Ciphertext length is not a whole number of blocks.
    BadLength(usize),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadLength(len) => write!(
                f,
                "ciphertext length {} is not a multiple of {}",
                len, AES_BLOCK_LEN
            ),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Derive the 16-byte working key from a shared secret of any length.
///
/// SHA-256 of the secret, truncated to the AES-128 key size. Both ends of a
/// transmission run the same derivation.
pub fn derive_key(secret: &[u8]) -> [u8; WORKING_KEY_LEN] {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(secret);
    let mut key = [0u8; WORKING_KEY_LEN];
    key.copy_from_slice(&digest[..WORKING_KEY_LEN]);
    key
}

/// Round a cleartext length up to the ECB stream length carrying it.
pub const fn padded_len(len: usize) -> usize {
    (len + AES_BLOCK_LEN - 1) & !(AES_BLOCK_LEN - 1)
}

/// Decrypt `data` in place as AES-128-ECB blocks.
pub fn decrypt_ecb(key: &[u8; WORKING_KEY_LEN], data: &mut [u8]) -> Result<(), CryptoError> {
    if data.is_empty() || data.len() % AES_BLOCK_LEN != 0 {
        return Err(CryptoError::BadLength(data.len()));
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(AES_BLOCK_LEN) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::BlockEncrypt;

    fn encrypt_ecb(key: &[u8; WORKING_KEY_LEN], data: &mut [u8]) {
        let cipher = Aes128::new(GenericArray::from_slice(key));
        for block in data.chunks_exact_mut(AES_BLOCK_LEN) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
    }

    #[test]
    fn test_derive_key_deterministic() {
        let a = derive_key(b"shared-secret");
        let b = derive_key(b"shared-secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), WORKING_KEY_LEN);
    }

    #[test]
    fn test_derive_key_distinct_secrets() {
        assert_ne!(derive_key(b"one"), derive_key(b"two"));
    }

    #[test]
    fn test_derive_key_empty_secret() {
        // Degenerate but defined: still a stable 16-byte key
        let key = derive_key(b"");
        assert_eq!(key, derive_key(b""));
    }

    #[test]
    fn test_padded_len() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(1), 16);
        assert_eq!(padded_len(16), 16);
        assert_eq!(padded_len(17), 32);
        assert_eq!(padded_len(32), 32);
    }

    #[test]
    fn test_decrypt_inverts_encrypt() {
        let key = derive_key(b"roundtrip");
        let mut data = *b"exactly 16 bytes";
        let original = data;
        encrypt_ecb(&key, &mut data);
        assert_ne!(data, original);
        decrypt_ecb(&key, &mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_decrypt_multiple_blocks() {
        let key = derive_key(b"blocks");
        let mut data = vec![0x5Au8; 48];
        let original = data.clone();
        encrypt_ecb(&key, &mut data);
        decrypt_ecb(&key, &mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_decrypt_rejects_partial_block() {
        let key = derive_key(b"k");
        let mut data = vec![0u8; 15];
        assert_eq!(decrypt_ecb(&key, &mut data), Err(CryptoError::BadLength(15)));
        let mut data = vec![0u8; 17];
        assert_eq!(decrypt_ecb(&key, &mut data), Err(CryptoError::BadLength(17)));
    }

    #[test]
    fn test_decrypt_rejects_empty() {
        let key = derive_key(b"k");
        assert_eq!(decrypt_ecb(&key, &mut []), Err(CryptoError::BadLength(0)));
    }

    #[test]
    fn test_wrong_key_garbles() {
        let mut data = *b"exactly 16 bytes";
        encrypt_ecb(&derive_key(b"right"), &mut data);
        decrypt_ecb(&derive_key(b"wrong"), &mut data).unwrap();
        assert_ne!(&data, b"exactly 16 bytes");
    }
}
