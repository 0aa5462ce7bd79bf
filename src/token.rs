//! Collaborator interface to the security token.
//!
//! The token is consumed as an opaque, handle-based API. Backends implement
//! [`Token`]; everything above this module (device selection, sessions, file
//! channels, streaming) is written against the trait and never against a
//! concrete engine.

use std::time::Duration;

use crate::securemem::Credential;

/// Connection timeout handed to the token when a device is opened.
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of names a single `list` call reports.
pub const MAX_SHOWN_FILES: usize = 20;

/// Maximum length of a single listed path name, terminator included.
pub const MAX_PATHNAME: usize = 256;

/// Capacity of the buffer handed to [`Token::list`].
pub const LIST_BUFFER_LEN: usize = MAX_SHOWN_FILES * MAX_PATHNAME;

/// Enumerated device, not yet opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Drive letter on Windows, mount point elsewhere.
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    /// Create the file, truncating any previous content.
    CreateNew,
    /// The file must already exist.
    OpenExisting,
}

/// Non-success status returned by a token primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Login rejected the credential.
    WrongCredential,
    /// Ciphertext integrity check failed.
    SignatureMismatch,
    /// Any other status code.
    Code(u32),
}

impl Fault {
    /// Numeric status for the pass/fail primitives.
    pub fn code(self) -> u32 {
        match self {
            Fault::Code(code) => code,
            Fault::WrongCredential => CODE_WRONG_CREDENTIAL,
            Fault::SignatureMismatch => CODE_SIGNATURE_MISMATCH,
        }
    }
}

pub const CODE_WRONG_CREDENTIAL: u32 = 0xF008;
pub const CODE_SIGNATURE_MISMATCH: u32 = 0xF0A1;

/// Opaque handle-based token API.
///
/// All calls block until the token answers. Handles are plain values owned by
/// the caller; the guards in [`crate::device`], [`crate::session`] and
/// [`crate::channel`] make sure each one is released exactly once and in
/// reverse order of acquisition.
pub trait Token {
    /// Discovery cursor.
    type Cursor;
    /// Open device connection.
    type Connection;
    /// Logged-in session.
    type Session;
    /// Open encrypted file.
    type File;

    fn discover_init(&self) -> Self::Cursor;
    fn discover_next(&self, cursor: &mut Self::Cursor) -> Option<DeviceInfo>;

    fn open(&self, info: &DeviceInfo, timeout: Duration) -> Result<Self::Connection, Fault>;
    fn close_device(&self, connection: Self::Connection);

    fn login(
        &self,
        connection: &mut Self::Connection,
        credential: &Credential,
    ) -> Result<Self::Session, Fault>;
    fn logout(&self, session: &mut Self::Session) -> Result<(), Fault>;

    /// Set the session clock (UNIX seconds).
    fn set_time(&self, session: &mut Self::Session, unix_secs: u32) -> Result<(), Fault>;
    fn secure_init(&self, session: &mut Self::Session) -> Result<(), Fault>;
    /// Tear down secure subsystem state. Safe to call on a session that never
    /// finished [`Token::secure_init`].
    fn secure_finit(&self, session: &mut Self::Session);

    fn open_file(
        &self,
        session: &Self::Session,
        path: &str,
        mode: Mode,
        creation: Creation,
    ) -> Result<Self::File, Fault>;
    /// Read up to `buf.len()` bytes. `Ok(0)` marks the end of the file.
    fn read(&self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, Fault>;
    fn write(&self, file: &mut Self::File, data: &[u8]) -> Result<(), Fault>;
    /// Commit and release the handle. For a write handle this is the point
    /// where the written content becomes visible.
    fn close_file(&self, file: Self::File) -> Result<(), Fault>;
    /// Release the handle without committing anything written through it.
    /// Used on failure paths; the previous content of the file, if any, is
    /// left as it was.
    fn abort_file(&self, file: Self::File);

    /// Fill `buf` with the NUL-terminated names of the encrypted files in
    /// `dir` and return the number of bytes used.
    fn list(&self, session: &Self::Session, dir: &str, buf: &mut [u8]) -> Result<usize, Fault>;
}
