//! Release ordering and the single termination point.
//!
//! Every acquired resource is held by an owning guard: a local file by
//! [`LocalFile`], a token file handle by [`crate::channel::FileHandle`], a
//! session by [`crate::session::Session`] and a device connection by
//! [`crate::device::Device`]. Guards nest from the device inwards and Rust
//! drops them in reverse, so an error propagated with `?` releases exactly
//! what was acquired, innermost first, before it reaches [`finish`].
//!
//! A local source is opened before the token handle, so a missing input never
//! touches the cipher file. It is moved into the streamer, which still releases
//! it ahead of the handle.
//!
//! Guards never terminate the process and never panic on release failure;
//! a failed release is logged and the remaining releases still run.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::error::Error;
use crate::token::Fault;

/// Resources from outermost to innermost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Resource {
    Device,
    Session,
    FileHandle,
    LocalFile,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Device => "device",
            Resource::Session => "session",
            Resource::FileHandle => "file handle",
            Resource::LocalFile => "local file",
        })
    }
}

pub(crate) fn acquired(resource: Resource) {
    tracing::debug!(%resource, "acquired");
}

pub(crate) fn released(resource: Resource) {
    tracing::debug!(%resource, "released");
}

pub(crate) fn release_failed(resource: Resource, step: &'static str, fault: Fault) {
    tracing::warn!(%resource, step, ?fault, "release step failed; continuing cleanup");
}

/// Local file taking part in a transfer.
///
/// Passed by value into the streamer so that on failure it is closed before
/// the token handle it feeds or drains.
pub struct LocalFile {
    file: File,
    path: PathBuf,
}

impl LocalFile {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        acquired(Resource::LocalFile);
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Create `path` for writing. Existing files are only replaced with
    /// `force`; on Unix the file is created with mode 0600.
    pub fn create(path: &Path, force: bool) -> Result<Self, Error> {
        if path.exists() && !force {
            return Err(Error::WouldOverwrite(path.to_path_buf()));
        }
        let mut oo = std::fs::OpenOptions::new();
        oo.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            oo.mode(0o600);
        }
        let file = oo.open(path)?;
        acquired(Resource::LocalFile);
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn len(&self) -> Result<u64, Error> {
        Ok(self.file.metadata()?.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close, surfacing errors that a plain drop would swallow.
    pub fn close(mut self) -> Result<(), Error> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Read for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for LocalFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for LocalFile {
    fn drop(&mut self) {
        tracing::trace!(path = %self.path.display(), "closing local file");
        released(Resource::LocalFile);
    }
}

/// Turn the outcome of a command into the process exit status.
///
/// By the time an error arrives here every guard on the failing path has
/// already been dropped, so all that is left is the diagnostic.
pub fn finish(result: Result<(), Error>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(kind = err.kind(), signature_mismatch = err.is_signature_mismatch(), "{err}");
            eprintln!("ERROR: {err}");
            ExitCode::from(1)
        }
    }
}
