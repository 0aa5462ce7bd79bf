//! sefile library API
//!
//! Device selection, session lifecycle and chunked streaming to encrypted
//! files on a security token. The token itself is reached through the
//! [`token::Token`] trait; [`soft::SoftToken`] emulates one on the host
//! filesystem. The command-line interface is in main.rs.

pub mod aead;
pub mod channel;
pub mod cleanup;
pub mod cli;
pub mod commands;
pub mod config;
pub mod device;
pub mod error;
pub mod format;
pub mod kdf;
pub mod listing;
pub mod prompt;
pub mod securemem;
pub mod session;
pub mod soft;
pub mod stream;
pub mod token;

pub use error::Error;
pub use token::Token;
