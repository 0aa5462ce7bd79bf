//! On-disk layouts used by the emulated token: the token descriptor kept on
//! the device and the header at the start of every encrypted file.

use std::io::Read;

use subtle::ConstantTimeEq;
use thiserror::Error;

pub const DESCRIPTOR_MAGIC: [u8; 8] = *b"SETOKEN\0";
pub const DESCRIPTOR_VERSION: u8 = 1;

pub const FILE_MAGIC: [u8; 8] = *b"SEFILE\0\0";
pub const FILE_VERSION: u8 = 1;

pub const SALT_LEN: usize = 16;
pub const SEED_LEN: usize = 24;
pub const VERIFIER_LEN: usize = 32;
pub const KDF_PARAMS_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

pub const DESCRIPTOR_LEN: usize = 8 + 1 + SALT_LEN + KDF_PARAMS_LEN + VERIFIER_LEN;

/// Fixed part of a file header; the encrypted name follows it.
pub const FILE_HEADER_FIXED_LEN: usize = 8 + 1 + SEED_LEN + 2;

/// Longest logical file name, in bytes.
pub const MAX_NAME_LEN: usize = crate::token::MAX_PATHNAME - 1;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed {0}")]
pub struct FormatError(pub &'static str);

/// Argon2id cost parameters (12 bytes, little-endian).
///
/// Byte layout:
///   [0-3]   memory_kib: u32
///   [4-7]   iterations: u32
///   [8-11]  parallelism: u32
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl KdfParams {
    /// Cost used when provisioning a token for interactive use.
    pub const INTERACTIVE: KdfParams = KdfParams {
        memory_kib: 64 * 1024,
        iterations: 3,
        parallelism: 1,
    };

    pub fn encode(self) -> [u8; KDF_PARAMS_LEN] {
        let mut out = [0u8; KDF_PARAMS_LEN];
        out[0..4].copy_from_slice(&self.memory_kib.to_le_bytes());
        out[4..8].copy_from_slice(&self.iterations.to_le_bytes());
        out[8..12].copy_from_slice(&self.parallelism.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; KDF_PARAMS_LEN]) -> Self {
        Self {
            memory_kib: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            iterations: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            parallelism: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }

    pub fn validate(&self) -> Result<(), FormatError> {
        if !(1..=4).contains(&self.parallelism) {
            return Err(FormatError("kdf parallelism (must be 1-4)"));
        }
        // Argon2 needs at least 8 KiB per lane.
        if self.memory_kib < 8 * self.parallelism || self.memory_kib > 2 * 1024 * 1024 {
            return Err(FormatError("kdf memory (must be 8*p KiB to 2 GiB)"));
        }
        if !(1..=10).contains(&self.iterations) {
            return Err(FormatError("kdf iterations (must be 1-10)"));
        }
        Ok(())
    }
}

/// Contents of the descriptor file that marks a directory as a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub salt: [u8; SALT_LEN],
    pub kdf: KdfParams,
    /// Derived from the PIN; compared in constant time at login.
    pub verifier: [u8; VERIFIER_LEN],
}

impl Descriptor {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DESCRIPTOR_LEN);
        out.extend_from_slice(&DESCRIPTOR_MAGIC);
        out.push(DESCRIPTOR_VERSION);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.kdf.encode());
        out.extend_from_slice(&self.verifier);
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() != DESCRIPTOR_LEN {
            return Err(FormatError("descriptor length"));
        }
        if buf[0..8].ct_eq(&DESCRIPTOR_MAGIC).unwrap_u8() != 1 {
            return Err(FormatError("descriptor magic"));
        }
        if buf[8] != DESCRIPTOR_VERSION {
            return Err(FormatError("descriptor version"));
        }
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&buf[9..9 + SALT_LEN]);

        let mut kdf_bytes = [0u8; KDF_PARAMS_LEN];
        kdf_bytes.copy_from_slice(&buf[9 + SALT_LEN..9 + SALT_LEN + KDF_PARAMS_LEN]);
        let kdf = KdfParams::decode(&kdf_bytes);
        kdf.validate()?;

        let mut verifier = [0u8; VERIFIER_LEN];
        verifier.copy_from_slice(&buf[9 + SALT_LEN + KDF_PARAMS_LEN..]);

        Ok(Self { salt, kdf, verifier })
    }

    pub fn verifier_matches(&self, candidate: &[u8; VERIFIER_LEN]) -> bool {
        self.verifier[..].ct_eq(&candidate[..]).unwrap_u8() == 1
    }
}

/// Header of an encrypted file.
///
/// Layout: magic (8) | version (1) | seed (24) | name length u16 LE (2) |
/// encrypted name (name length bytes, tag included).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub seed: [u8; SEED_LEN],
    pub encrypted_name: Vec<u8>,
}

impl FileHeader {
    pub fn encode(&self) -> Result<Vec<u8>, FormatError> {
        let name_len = u16::try_from(self.encrypted_name.len())
            .map_err(|_| FormatError("file name length"))?;
        let mut out = Vec::with_capacity(FILE_HEADER_FIXED_LEN + self.encrypted_name.len());
        out.extend_from_slice(&FILE_MAGIC);
        out.push(FILE_VERSION);
        out.extend_from_slice(&self.seed);
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(&self.encrypted_name);
        Ok(out)
    }

    /// Read a header from the start of `reader`.
    ///
    /// Returns the parsed header together with its raw bytes, which the chunk
    /// records authenticate.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<(Self, Vec<u8>), FormatError> {
        let mut fixed = [0u8; FILE_HEADER_FIXED_LEN];
        reader
            .read_exact(&mut fixed)
            .map_err(|_| FormatError("file header (truncated)"))?;
        if fixed[0..8].ct_eq(&FILE_MAGIC).unwrap_u8() != 1 {
            return Err(FormatError("file header magic"));
        }
        if fixed[8] != FILE_VERSION {
            return Err(FormatError("file header version"));
        }
        let mut seed = [0u8; SEED_LEN];
        seed.copy_from_slice(&fixed[9..9 + SEED_LEN]);
        let name_len = u16::from_le_bytes([fixed[9 + SEED_LEN], fixed[10 + SEED_LEN]]) as usize;
        if name_len < TAG_LEN || name_len > MAX_NAME_LEN + TAG_LEN {
            return Err(FormatError("file name length"));
        }
        let mut encrypted_name = vec![0u8; name_len];
        reader
            .read_exact(&mut encrypted_name)
            .map_err(|_| FormatError("file header (truncated name)"))?;

        let mut raw = Vec::with_capacity(FILE_HEADER_FIXED_LEN + name_len);
        raw.extend_from_slice(&fixed);
        raw.extend_from_slice(&encrypted_name);
        Ok((Self { seed, encrypted_name }, raw))
    }
}
