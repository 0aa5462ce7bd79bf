use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// Status class reported by the token for file operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The integrity tag of the ciphertext did not verify.
    SignatureMismatch,
    /// Any other non-zero status code.
    Code(u32),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::SignatureMismatch => f.write_str("signature mismatch"),
            Failure::Code(code) => write!(f, "code 0x{code:X}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("no available devices found")]
    NoDeviceFound,

    #[error("no device matches identifier {0:?}")]
    DeviceNotFound(String),

    #[error("cannot open device - error code: 0x{0:X}")]
    DeviceOpenFailed(u32),

    #[error("password exceeds the {limit}-byte credential buffer")]
    CredentialTooLong { limit: usize },

    #[error("wrong password")]
    WrongPassword,

    #[error("login failed - error code: 0x{0:X}")]
    LoginFailed(u32),

    #[error("clock synchronization failed - error code: 0x{0:X}")]
    ClockSyncFailed(u32),

    #[error("secure subsystem initialization failed - error code: 0x{0:X}")]
    SubsystemInitFailed(u32),

    #[error("cannot open cipher file - {0}")]
    FileOpenFailed(Failure),

    #[error("cipher file write failed - {0}")]
    WriteFailed(Failure),

    #[error("cipher file read failed - {0}")]
    ReadFailed(Failure),

    #[error("cipher file close failed - {0}")]
    CloseFailed(Failure),

    #[error("cannot list cipher files - error code: 0x{0:X}")]
    ListFailed(u32),

    #[error("I/O error: {0}")]
    LocalIo(#[from] std::io::Error),

    #[error("input exceeds {limit} bytes")]
    InputTooLong { limit: usize },

    #[error("invalid arguments: {0}")]
    InvalidArgs(&'static str),

    #[error("refusing to overwrite existing path: {0}")]
    WouldOverwrite(PathBuf),

    #[error("operation interrupted by user")]
    Interrupted,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Stable label used as the `kind` field of the fatal diagnostic.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NoDeviceFound => "no_device_found",
            Error::DeviceNotFound(_) => "device_not_found",
            Error::DeviceOpenFailed(_) => "device_open_failed",
            Error::CredentialTooLong { .. } => "credential_too_long",
            Error::WrongPassword => "wrong_password",
            Error::LoginFailed(_) => "login_failed",
            Error::ClockSyncFailed(_) => "clock_sync_failed",
            Error::SubsystemInitFailed(_) => "subsystem_init_failed",
            Error::FileOpenFailed(_) => "file_open_failed",
            Error::WriteFailed(_) | Error::ReadFailed(_) => "stream_failed",
            Error::CloseFailed(_) => "close_failed",
            Error::ListFailed(_) => "list_failed",
            Error::LocalIo(_) => "local_io",
            Error::InputTooLong { .. } => "input_too_long",
            Error::InvalidArgs(_) => "invalid_args",
            Error::WouldOverwrite(_) => "would_overwrite",
            Error::Interrupted => "interrupted",
            Error::Config(_) => "config",
        }
    }

    /// Integrity failures are called out separately in diagnostics.
    pub fn is_signature_mismatch(&self) -> bool {
        matches!(
            self,
            Error::FileOpenFailed(Failure::SignatureMismatch)
                | Error::WriteFailed(Failure::SignatureMismatch)
                | Error::ReadFailed(Failure::SignatureMismatch)
                | Error::CloseFailed(Failure::SignatureMismatch)
        )
    }
}
