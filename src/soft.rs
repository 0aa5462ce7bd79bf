//! Emulated token.
//!
//! A directory holding a [`DESCRIPTOR_FILE`] plays the role of the device:
//! it carries the PIN verifier and key-derivation parameters, and the
//! derived keys encrypt files anywhere on the host filesystem. Encrypted
//! files are stored under a keyed digest of their logical name, and the
//! name itself is kept encrypted in the file header so `list` can recover
//! it.
//!
//! File body: a sequence of `[u32 LE length][ciphertext]` records of at most
//! [`CHUNK_SIZE_BYTES`] plaintext each. The last record is flagged final in
//! its AAD, so truncation at a record boundary fails authentication like
//! any other tampering. Writes land in a `.partial` staging file that
//! replaces the target only when the handle is closed; an aborted handle
//! leaves the previous file untouched.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chacha20poly1305::XChaCha20Poly1305;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::aead::{self, CHUNK_SIZE_BYTES};
use crate::error::Error;
use crate::format::{Descriptor, FileHeader, KdfParams, DESCRIPTOR_LEN, MAX_NAME_LEN, TAG_LEN};
use crate::kdf::{self, SessionKeys};
use crate::securemem::Credential;
use crate::token::{Creation, DeviceInfo, Fault, Mode, Token, MAX_SHOWN_FILES};

/// Marks a directory as an emulated token.
pub const DESCRIPTOR_FILE: &str = ".sefile-token";

pub const CODE_IO: u32 = 0xF001;
pub const CODE_NOT_FOUND: u32 = 0xF002;
pub const CODE_STATE: u32 = 0xF004;
pub const CODE_PARAMS: u32 = 0xF006;
pub const CODE_FORMAT: u32 = 0xF00C;

/// Largest record accepted while reading.
const MAX_RECORD_LEN: usize = CHUNK_SIZE_BYTES + TAG_LEN;

fn io_fault(err: io::Error) -> Fault {
    match err.kind() {
        io::ErrorKind::NotFound => Fault::Code(CODE_NOT_FOUND),
        _ => Fault::Code(CODE_IO),
    }
}

/// Write a fresh descriptor for `pin` into `dir`, turning it into a token.
pub fn provision(dir: &Path, pin: &[u8], params: KdfParams) -> Result<(), Error> {
    params
        .validate()
        .map_err(|_| Error::InvalidArgs("invalid key derivation parameters"))?;
    let credential = Credential::new(pin)?;
    let path = dir.join(DESCRIPTOR_FILE);
    if path.exists() {
        return Err(Error::WouldOverwrite(path));
    }
    let salt = kdf::random_salt();
    let master = kdf::derive_master_key(&credential.as_bytes()[..credential.len()], &salt, params)
        .map_err(|_| Error::InvalidArgs("key derivation failed"))?;
    let verifier = kdf::derive_verifier(&master).map_err(|_| Error::InvalidArgs("key derivation failed"))?;
    let descriptor = Descriptor {
        salt,
        kdf: params,
        verifier,
    };
    fs::write(&path, descriptor.encode())?;
    tracing::info!(device = %dir.display(), "emulated token provisioned");
    Ok(())
}

/// Token backend that emulates the device in software.
#[derive(Debug, Clone)]
pub struct SoftToken {
    search_paths: Vec<PathBuf>,
}

impl SoftToken {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Token directories under the search paths: each root, its children and
    /// grandchildren (`/media/<user>/<mount>`), in sorted order.
    fn candidates(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for root in &self.search_paths {
            collect_tokens(root, 2, &mut found);
        }
        found.dedup();
        found
    }
}

fn is_token_dir(dir: &Path) -> bool {
    dir.join(DESCRIPTOR_FILE).is_file()
}

fn collect_tokens(dir: &Path, depth: u32, found: &mut Vec<PathBuf>) {
    if is_token_dir(dir) && !found.iter().any(|p| p == dir) {
        found.push(dir.to_path_buf());
    }
    if depth == 0 {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut children: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    children.sort();
    for child in children {
        collect_tokens(&child, depth - 1, found);
    }
}

pub struct SoftCursor {
    pending: std::vec::IntoIter<PathBuf>,
}

pub struct SoftConnection {
    root: PathBuf,
    descriptor: Descriptor,
}

pub struct SoftSession {
    master: Option<Zeroizing<[u8; 32]>>,
    keys: Option<SessionKeys>,
    clock: u32,
}

impl SoftSession {
    fn keys(&self) -> Result<&SessionKeys, Fault> {
        self.keys.as_ref().ok_or(Fault::Code(CODE_STATE))
    }

    pub fn clock(&self) -> u32 {
        self.clock
    }
}

pub enum SoftFile {
    Writer(ChunkWriter),
    Reader(ChunkReader),
}

/// On-disk name of the encrypted file holding logical name `name`.
fn disk_name(name_key: &[u8; 32], name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name_key);
    hasher.update(name.as_bytes());
    hex::encode(hasher.finalize())
}

/// Split a logical path into its directory and validated file name.
fn split_logical(path: &str) -> Result<(PathBuf, &str), Fault> {
    let p = Path::new(path);
    let name = p
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(Fault::Code(CODE_PARAMS))?;
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Fault::Code(CODE_PARAMS));
    }
    let dir = match p.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name))
}

/// Read and authenticate the header of an open encrypted file, returning the
/// decrypted logical name and the raw header bytes.
fn read_header(file: &mut File, keys: &SessionKeys) -> Result<(FileHeader, Vec<u8>, String), Fault> {
    let (header, raw) = FileHeader::read_from(file).map_err(|_| Fault::SignatureMismatch)?;
    let cipher = aead::create_cipher(&keys.enc);
    let nonce = aead::derive_name_nonce(&keys.nonce, &header.seed)?;
    let name = aead::decrypt(&cipher, &nonce, &raw[..raw.len() - header.encrypted_name.len()], &header.encrypted_name)?;
    let name = String::from_utf8(name).map_err(|_| Fault::SignatureMismatch)?;
    Ok((header, raw, name))
}

impl Token for SoftToken {
    type Cursor = SoftCursor;
    type Connection = SoftConnection;
    type Session = SoftSession;
    type File = SoftFile;

    fn discover_init(&self) -> SoftCursor {
        SoftCursor {
            pending: self.candidates().into_iter(),
        }
    }

    fn discover_next(&self, cursor: &mut SoftCursor) -> Option<DeviceInfo> {
        // A token may have been unmounted since the cursor was created.
        cursor.pending.by_ref().find(|p| is_token_dir(p)).map(|p| DeviceInfo {
            path: p.display().to_string(),
        })
    }

    fn open(&self, info: &DeviceInfo, _timeout: Duration) -> Result<SoftConnection, Fault> {
        let root = PathBuf::from(&info.path);
        let mut bytes = Vec::with_capacity(DESCRIPTOR_LEN);
        File::open(root.join(DESCRIPTOR_FILE))
            .and_then(|f| f.take(DESCRIPTOR_LEN as u64 + 1).read_to_end(&mut bytes))
            .map_err(io_fault)?;
        let descriptor = Descriptor::parse(&bytes).map_err(|_| Fault::Code(CODE_FORMAT))?;
        Ok(SoftConnection { root, descriptor })
    }

    fn close_device(&self, connection: SoftConnection) {
        tracing::trace!(device = %connection.root.display(), "emulated token closed");
    }

    fn login(&self, connection: &mut SoftConnection, credential: &Credential) -> Result<SoftSession, Fault> {
        let d = &connection.descriptor;
        let pin = &credential.as_bytes()[..credential.len()];
        let master = kdf::derive_master_key(pin, &d.salt, d.kdf)?;
        let verifier = Zeroizing::new(kdf::derive_verifier(&master)?);
        if !d.verifier_matches(&verifier) {
            return Err(Fault::WrongCredential);
        }
        Ok(SoftSession {
            master: Some(master),
            keys: None,
            clock: 0,
        })
    }

    fn logout(&self, session: &mut SoftSession) -> Result<(), Fault> {
        session.keys = None;
        session.master.take().map(|_| ()).ok_or(Fault::Code(CODE_STATE))
    }

    fn set_time(&self, session: &mut SoftSession, unix_secs: u32) -> Result<(), Fault> {
        if session.master.is_none() {
            return Err(Fault::Code(CODE_STATE));
        }
        if unix_secs == 0 {
            return Err(Fault::Code(CODE_PARAMS));
        }
        session.clock = unix_secs;
        Ok(())
    }

    fn secure_init(&self, session: &mut SoftSession) -> Result<(), Fault> {
        let master = session.master.as_ref().ok_or(Fault::Code(CODE_STATE))?;
        session.keys = Some(SessionKeys::derive(master)?);
        Ok(())
    }

    fn secure_finit(&self, session: &mut SoftSession) {
        session.keys = None;
    }

    fn open_file(&self, session: &SoftSession, path: &str, mode: Mode, creation: Creation) -> Result<SoftFile, Fault> {
        let keys = session.keys()?;
        let (dir, name) = split_logical(path)?;
        let disk_path = dir.join(disk_name(&keys.name, name));
        match (mode, creation) {
            (Mode::Read, Creation::CreateNew) => Err(Fault::Code(CODE_PARAMS)),
            (Mode::Read, Creation::OpenExisting) => {
                let mut file = File::open(&disk_path).map_err(io_fault)?;
                let file_len = file.metadata().map_err(io_fault)?.len();
                let (header, raw, stored) = read_header(&mut file, keys)?;
                if stored != name {
                    return Err(Fault::SignatureMismatch);
                }
                Ok(SoftFile::Reader(ChunkReader::new(file, file_len, keys, header, raw)?))
            }
            (Mode::Write, creation) => {
                if creation == Creation::OpenExisting {
                    let mut existing = File::open(&disk_path).map_err(io_fault)?;
                    let (_, _, stored) = read_header(&mut existing, keys)?;
                    if stored != name {
                        return Err(Fault::SignatureMismatch);
                    }
                }
                // Content goes to a staging file and only replaces the
                // target when the handle is closed.
                let staged = Staged::new(&disk_path);
                let mut oo = OpenOptions::new();
                oo.write(true).create(true).truncate(true);
                #[cfg(unix)]
                {
                    use std::os::unix::fs::OpenOptionsExt;
                    oo.mode(0o600);
                }
                let file = oo.open(&staged.path).map_err(io_fault)?;
                Ok(SoftFile::Writer(ChunkWriter::create(file, staged, keys, name)?))
            }
        }
    }

    fn read(&self, file: &mut SoftFile, buf: &mut [u8]) -> Result<usize, Fault> {
        match file {
            SoftFile::Reader(reader) => reader.read(buf),
            SoftFile::Writer(_) => Err(Fault::Code(CODE_PARAMS)),
        }
    }

    fn write(&self, file: &mut SoftFile, data: &[u8]) -> Result<(), Fault> {
        match file {
            SoftFile::Writer(writer) => writer.write(data),
            SoftFile::Reader(_) => Err(Fault::Code(CODE_PARAMS)),
        }
    }

    fn close_file(&self, file: SoftFile) -> Result<(), Fault> {
        match file {
            SoftFile::Writer(writer) => writer.finish(),
            SoftFile::Reader(_) => Ok(()),
        }
    }

    fn abort_file(&self, file: SoftFile) {
        // Dropping an unfinished writer removes its staging file.
        drop(file);
    }

    fn list(&self, session: &SoftSession, dir: &str, buf: &mut [u8]) -> Result<usize, Fault> {
        let keys = session.keys()?;
        let dir = if dir.is_empty() { Path::new(".") } else { Path::new(dir) };
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(io_fault)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.path())
            .collect();
        entries.sort();

        let mut used = 0;
        let mut shown = 0;
        for path in entries {
            if shown == MAX_SHOWN_FILES {
                break;
            }
            let Some(on_disk) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if on_disk.len() != 64 || !on_disk.bytes().all(|b| b.is_ascii_hexdigit()) {
                continue;
            }
            let Ok(mut file) = File::open(&path) else {
                continue;
            };
            // Files from other tokens, or damaged ones, are skipped.
            let Ok((_, _, name)) = read_header(&mut file, keys) else {
                continue;
            };
            if disk_name(&keys.name, &name) != on_disk {
                continue;
            }
            let needed = name.len() + 1;
            if used + needed > buf.len() {
                break;
            }
            buf[used..used + name.len()].copy_from_slice(name.as_bytes());
            buf[used + name.len()] = 0;
            used += needed;
            shown += 1;
        }
        Ok(used)
    }
}

/// Staging path next to an encrypted file being written. Removed on drop
/// unless it was committed over the target.
struct Staged {
    path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl Staged {
    fn new(target: &Path) -> Self {
        let mut name = target.file_name().unwrap_or_default().to_os_string();
        name.push(".partial");
        Self {
            path: target.with_file_name(name),
            target: target.to_path_buf(),
            committed: false,
        }
    }

    fn commit(mut self) -> Result<(), Fault> {
        fs::rename(&self.path, &self.target).map_err(io_fault)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "discarded unfinished cipher file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), err = %e, "could not remove unfinished cipher file"),
        }
    }
}

/// Streaming encryption writer that encrypts data on-the-fly in chunks.
pub struct ChunkWriter {
    file: File,
    staged: Staged,
    cipher: XChaCha20Poly1305,
    nonce_key: Zeroizing<[u8; 32]>,
    seed: [u8; crate::format::SEED_LEN],
    header_bytes: Vec<u8>,
    buffer: Zeroizing<Vec<u8>>,
    chunk_index: u64,
}

impl ChunkWriter {
    fn create(mut file: File, staged: Staged, keys: &SessionKeys, name: &str) -> Result<Self, Fault> {
        let seed = kdf::random_seed();
        let cipher = aead::create_cipher(&keys.enc);
        let name_nonce = aead::derive_name_nonce(&keys.nonce, &seed)?;

        // The name is authenticated against the fixed header fields, which
        // include its own ciphertext length.
        let ct_len = name.len() + TAG_LEN;
        let mut fixed = FileHeader {
            seed,
            encrypted_name: vec![0u8; ct_len],
        }
        .encode()
        .map_err(|_| Fault::Code(CODE_PARAMS))?;
        fixed.truncate(fixed.len() - ct_len);
        let encrypted_name = aead::encrypt(&cipher, &name_nonce, &fixed, name.as_bytes())?;

        let header_bytes = FileHeader {
            seed,
            encrypted_name,
        }
        .encode()
        .map_err(|_| Fault::Code(CODE_PARAMS))?;
        file.write_all(&header_bytes).map_err(io_fault)?;

        Ok(Self {
            file,
            staged,
            cipher,
            nonce_key: keys.nonce.clone(),
            seed,
            header_bytes,
            buffer: Zeroizing::new(Vec::with_capacity(CHUNK_SIZE_BYTES)),
            chunk_index: 0,
        })
    }

    /// Encrypt and write the current buffer as a chunk.
    fn flush_chunk(&mut self, is_final: bool) -> Result<(), Fault> {
        let nonce = aead::derive_chunk_nonce(&self.nonce_key, &self.seed, self.chunk_index)?;
        let aad = aead::build_chunk_aad(&self.header_bytes, self.chunk_index, is_final);
        let ciphertext = aead::encrypt(&self.cipher, &nonce, &aad, &self.buffer)?;

        let len = u32::try_from(ciphertext.len()).map_err(|_| Fault::Code(CODE_PARAMS))?;
        self.file.write_all(&len.to_le_bytes()).map_err(io_fault)?;
        self.file.write_all(&ciphertext).map_err(io_fault)?;

        self.buffer.clear();
        self.chunk_index += 1;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Fault> {
        let mut remaining = data;
        while !remaining.is_empty() {
            let available = CHUNK_SIZE_BYTES - self.buffer.len();
            if available == 0 {
                // Only flushed once more data arrives, so the last chunk
                // can still be marked final on close.
                self.flush_chunk(false)?;
                continue;
            }
            let to_copy = available.min(remaining.len());
            self.buffer.extend_from_slice(&remaining[..to_copy]);
            remaining = &remaining[to_copy..];
        }
        Ok(())
    }

    /// Write the final chunk (possibly empty), sync, and move the staging
    /// file over the target.
    fn finish(mut self) -> Result<(), Fault> {
        self.flush_chunk(true)?;
        self.file.sync_all().map_err(io_fault)?;
        let ChunkWriter { file, staged, .. } = self;
        drop(file);
        staged.commit()
    }
}

/// Streaming decrypt reader. Each chunk is authenticated before any of its
/// plaintext is handed out.
pub struct ChunkReader {
    file: File,
    file_len: u64,
    cipher: XChaCha20Poly1305,
    nonce_key: Zeroizing<[u8; 32]>,
    seed: [u8; crate::format::SEED_LEN],
    header_bytes: Vec<u8>,
    chunk_index: u64,
    current_chunk: Zeroizing<Vec<u8>>,
    current_pos: usize,
    eof: bool,
}

impl ChunkReader {
    fn new(file: File, file_len: u64, keys: &SessionKeys, header: FileHeader, header_bytes: Vec<u8>) -> Result<Self, Fault> {
        Ok(Self {
            file,
            file_len,
            cipher: aead::create_cipher(&keys.enc),
            nonce_key: keys.nonce.clone(),
            seed: header.seed,
            header_bytes,
            chunk_index: 0,
            current_chunk: Zeroizing::new(Vec::new()),
            current_pos: 0,
            eof: false,
        })
    }

    fn load_next_chunk(&mut self) -> Result<(), Fault> {
        let mut len_bytes = [0u8; 4];
        match self.file.read_exact(&mut len_bytes) {
            Ok(()) => {}
            // Ran out of records before the final one: truncated.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(Fault::SignatureMismatch),
            Err(e) => return Err(io_fault(e)),
        }
        let record_len = u32::from_le_bytes(len_bytes) as usize;
        if !(TAG_LEN..=MAX_RECORD_LEN).contains(&record_len) {
            return Err(Fault::SignatureMismatch);
        }
        let pos = self.file.stream_position().map_err(io_fault)?;
        let is_final = pos + record_len as u64 >= self.file_len;

        let mut ciphertext = vec![0u8; record_len];
        self.file.read_exact(&mut ciphertext).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Fault::SignatureMismatch,
            _ => io_fault(e),
        })?;

        let nonce = aead::derive_chunk_nonce(&self.nonce_key, &self.seed, self.chunk_index)?;
        let aad = aead::build_chunk_aad(&self.header_bytes, self.chunk_index, is_final);
        self.current_chunk = Zeroizing::new(aead::decrypt(&self.cipher, &nonce, &aad, &ciphertext)?);
        self.current_pos = 0;
        self.chunk_index += 1;
        self.eof = is_final;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Fault> {
        let mut total = 0;
        while total < buf.len() {
            if self.current_pos >= self.current_chunk.len() {
                if self.eof {
                    break;
                }
                self.load_next_chunk()?;
                continue;
            }
            let available = self.current_chunk.len() - self.current_pos;
            let to_copy = available.min(buf.len() - total);
            buf[total..total + to_copy]
                .copy_from_slice(&self.current_chunk[self.current_pos..self.current_pos + to_copy]);
            self.current_pos += to_copy;
            total += to_copy;
        }
        Ok(total)
    }
}
