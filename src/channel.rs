//! Encrypted files opened through a session.

use crate::cleanup::{self, Resource};
use crate::error::{Error, Failure};
use crate::session::Session;
use crate::token::{Creation, Fault, Mode, Token};

pub(crate) fn failure(fault: Fault) -> Failure {
    match fault {
        Fault::SignatureMismatch => Failure::SignatureMismatch,
        other => Failure::Code(other.code()),
    }
}

/// Open encrypted file.
///
/// Borrows its session, so it cannot outlive it. [`FileHandle::close`]
/// commits the file; dropping the handle without closing it aborts.
pub struct FileHandle<'s, 't, T: Token> {
    session: &'s Session<'t, T>,
    raw: Option<T::File>,
    mode: Mode,
    path: String,
}

impl<'s, 't, T: Token> FileHandle<'s, 't, T> {
    pub fn open(session: &'s Session<'t, T>, path: &str, mode: Mode, creation: Creation) -> Result<Self, Error> {
        let raw = session
            .token()
            .open_file(session.raw()?, path, mode, creation)
            .map_err(|fault| Error::FileOpenFailed(failure(fault)))?;
        cleanup::acquired(Resource::FileHandle);
        tracing::debug!(path, ?mode, ?creation, "cipher file opened");
        Ok(Self {
            session,
            raw: Some(raw),
            mode,
            path: path.to_string(),
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// One call to the token's write primitive.
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        let token = self.session.token();
        let raw = self.raw.as_mut().ok_or(Error::InvalidArgs("file handle is closed"))?;
        token
            .write(raw, data)
            .map_err(|fault| Error::WriteFailed(failure(fault)))
    }

    /// One call to the token's read primitive. `Ok(0)` is end of file.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let token = self.session.token();
        let raw = self.raw.as_mut().ok_or(Error::InvalidArgs("file handle is closed"))?;
        let n = token
            .read(raw, buf)
            .map_err(|fault| Error::ReadFailed(failure(fault)))?;
        Ok(n.min(buf.len()))
    }

    /// Commit and release. Consumes the handle, so the drop guard has
    /// nothing left to abort.
    pub fn close(mut self) -> Result<(), Error> {
        match self.raw.take() {
            Some(raw) => {
                let result = self.session.token().close_file(raw);
                cleanup::released(Resource::FileHandle);
                result.map_err(|fault| Error::CloseFailed(failure(fault)))
            }
            None => Ok(()),
        }
    }
}

/// A handle that was never closed explicitly is on a failure path: whatever
/// was written through it is discarded, not committed.
impl<'s, 't, T: Token> Drop for FileHandle<'s, 't, T> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.session.token().abort_file(raw);
            tracing::debug!(path = %self.path, mode = ?self.mode, "cipher file aborted");
            cleanup::released(Resource::FileHandle);
        }
    }
}
