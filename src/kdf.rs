use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::format::{KdfParams, SALT_LEN, SEED_LEN, VERIFIER_LEN};
use crate::token::Fault;

pub const CODE_KDF: u32 = 0xF00B;

pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub fn random_seed() -> [u8; SEED_LEN] {
    let mut seed = [0u8; SEED_LEN];
    OsRng.fill_bytes(&mut seed);
    seed
}

/// Derive the token master key from the PIN using Argon2id.
pub fn derive_master_key(pin: &[u8], salt: &[u8; SALT_LEN], params: KdfParams) -> Result<Zeroizing<[u8; 32]>, Fault> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(32),
    )
    .map_err(|_| Fault::Code(CODE_KDF))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut out = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(pin, salt, &mut *out)
        .map_err(|_| Fault::Code(CODE_KDF))?;
    Ok(out)
}

/// Key derivation hierarchy:
///
/// master = Argon2id(pin, salt, params)
///   ↓
/// verifier  = HKDF(master, "sefile\0verify")   stored in the descriptor
/// enc_key   = HKDF(master, "sefile\0enc")      chunk and name encryption
/// name_key  = HKDF(master, "sefile\0name")     on-disk file names
/// nonce_key = HKDF(master, "sefile\0nonce")    per-chunk nonces
const VERIFY_INFO: &[u8] = b"sefile\0verify";
const ENC_KEY_INFO: &[u8] = b"sefile\0enc";
const NAME_KEY_INFO: &[u8] = b"sefile\0name";
const NONCE_KEY_INFO: &[u8] = b"sefile\0nonce";

fn expand(master_key: &[u8; 32], info: &[u8]) -> Result<Zeroizing<[u8; 32]>, Fault> {
    let hk = Hkdf::<Sha256>::new(None, master_key);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(info, &mut *okm).map_err(|_| Fault::Code(CODE_KDF))?;
    Ok(okm)
}

pub fn derive_verifier(master_key: &[u8; 32]) -> Result<[u8; VERIFIER_LEN], Fault> {
    Ok(*expand(master_key, VERIFY_INFO)?)
}

/// Working keys of an initialized session.
pub struct SessionKeys {
    pub enc: Zeroizing<[u8; 32]>,
    pub name: Zeroizing<[u8; 32]>,
    pub nonce: Zeroizing<[u8; 32]>,
}

impl SessionKeys {
    pub fn derive(master_key: &[u8; 32]) -> Result<Self, Fault> {
        Ok(Self {
            enc: expand(master_key, ENC_KEY_INFO)?,
            name: expand(master_key, NAME_KEY_INFO)?,
            nonce: expand(master_key, NONCE_KEY_INFO)?,
        })
    }
}
