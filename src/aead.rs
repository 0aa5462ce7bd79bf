use chacha20poly1305::{AeadInPlace, KeyInit, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::format::SEED_LEN;
use crate::token::Fault;

pub const NONCE_LEN: usize = 24;

/// Plaintext bytes per chunk record in an encrypted file.
pub const CHUNK_SIZE_BYTES: usize = 64 * 1024;

pub const CODE_CRYPTO: u32 = 0xF00A;

const NAME_NONCE_INFO: &[u8] = b"sefile\0name-nonce";

/// Derive a chunk nonce from the nonce key, the file seed and the chunk index.
pub fn derive_chunk_nonce(nonce_key: &[u8; 32], seed: &[u8; SEED_LEN], chunk_index: u64) -> Result<[u8; NONCE_LEN], Fault> {
    let hk = Hkdf::<Sha256>::new(Some(&seed[..]), nonce_key);
    let mut info = Vec::with_capacity(24);
    info.extend_from_slice(&chunk_index.to_le_bytes());
    info.extend_from_slice(&[0u8; 16]);
    let mut nonce = [0u8; NONCE_LEN];
    hk.expand(&info, &mut nonce)
        .map_err(|_| Fault::Code(CODE_CRYPTO))?;
    Ok(nonce)
}

/// Nonce for the encrypted name in the file header. Its info string can
/// never collide with the 24-byte chunk infos.
pub fn derive_name_nonce(nonce_key: &[u8; 32], seed: &[u8; SEED_LEN]) -> Result<[u8; NONCE_LEN], Fault> {
    let hk = Hkdf::<Sha256>::new(Some(&seed[..]), nonce_key);
    let mut nonce = [0u8; NONCE_LEN];
    hk.expand(NAME_NONCE_INFO, &mut nonce)
        .map_err(|_| Fault::Code(CODE_CRYPTO))?;
    Ok(nonce)
}

/// Build AAD for a chunk: header_bytes || chunk_index || is_final
pub fn build_chunk_aad(header_bytes: &[u8], chunk_index: u64, is_final: bool) -> Vec<u8> {
    let mut aad = Vec::with_capacity(header_bytes.len() + 9);
    aad.extend_from_slice(header_bytes);
    aad.extend_from_slice(&chunk_index.to_le_bytes());
    aad.push(if is_final { 1 } else { 0 });
    aad
}

pub fn encrypt(cipher: &XChaCha20Poly1305, nonce: &[u8; NONCE_LEN], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Fault> {
    let nonce = XNonce::from_slice(nonce);
    let mut buffer = plaintext.to_vec();
    cipher
        .encrypt_in_place(nonce, aad, &mut buffer)
        .map_err(|_| Fault::Code(CODE_CRYPTO))?;
    Ok(buffer)
}

/// Any authentication failure is reported as a signature mismatch.
pub fn decrypt(cipher: &XChaCha20Poly1305, nonce: &[u8; NONCE_LEN], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Fault> {
    let nonce = XNonce::from_slice(nonce);
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place(nonce, aad, &mut buffer)
        .map_err(|_| Fault::SignatureMismatch)?;
    Ok(buffer)
}

/// Create an XChaCha20Poly1305 cipher from a 32-byte key.
pub fn create_cipher(key: &[u8; 32]) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(key.into())
}
