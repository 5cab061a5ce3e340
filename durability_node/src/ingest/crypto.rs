// Content encryption for uploads
//
// AES-256-GCM with the key derived by hashing the caller's passphrase with
// blake3. The random 96-bit nonce is prepended to the ciphertext.

use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm,
};
use rand::RngCore;

use crate::error::{DurabilityError, Result};

/// Nonce length in bytes
pub const NONCE_LEN: usize = 12;

fn cipher_for(passphrase: &str) -> Aes256Gcm {
    let key = blake3::hash(passphrase.as_bytes());
    Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()))
}

/// Encrypt `data`; output is `nonce || ciphertext`
pub fn encrypt(passphrase: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher_for(passphrase)
        .encrypt(GenericArray::from_slice(&nonce), data)
        .map_err(|e| DurabilityError::Encryption(format!("AES encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt `nonce || ciphertext` produced by [`encrypt`]
pub fn decrypt(passphrase: &str, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(DurabilityError::Encryption(
            "Ciphertext shorter than its nonce".to_string(),
        ));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

    cipher_for(passphrase)
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|e| DurabilityError::Encryption(format!("AES decryption failed: {}", e)))
}
