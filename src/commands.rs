use std::fs;
use std::io::{self, Write};
use std::path::Path;

use zeroize::Zeroizing;

use crate::channel::FileHandle;
use crate::cleanup::LocalFile;
use crate::cli::{Command, Connect};
use crate::config::Config;
use crate::device::{self, Device};
use crate::error::Error;
use crate::listing::DirectoryListing;
use crate::prompt;
use crate::session::{self, Attempts, Session};
use crate::stream::{self, StreamBuffer, CHUNK_CAPACITY};
use crate::token::{Creation, Mode, Token, LIST_BUFFER_LEN};

pub fn run<T: Token>(token: &T, command: Command, config: &Config) -> Result<(), Error> {
    match command {
        Command::List { connect, directory } => list(token, &connect, config, &directory),
        Command::WriteCipherFromFile {
            connect,
            input,
            cipher,
        } => write_cipher_from_file(token, &connect, config, &input, &cipher),
        Command::WriteCipherFromString {
            connect,
            input,
            cipher,
        } => write_cipher_from_string(token, &connect, config, input, &cipher),
        Command::WriteFileFromCipher {
            connect,
            cipher,
            output,
            force,
        } => write_file_from_cipher(token, &connect, config, &cipher, &output, force),
        Command::WriteStringFromCipher { connect, cipher } => {
            write_string_from_cipher(token, &connect, config, &cipher)
        }
    }
}

/// Resolve the device, open it and log in.
///
/// The device comes from `--peripheral`, else the configured default, else an
/// interactive choice on stdin.
pub fn open_session<'t, T: Token>(token: &'t T, connect: &Connect, config: &Config) -> Result<Session<'t, T>, Error> {
    let peripheral = connect
        .peripheral
        .as_deref()
        .or(config.device.peripheral.as_deref());
    let info = match peripheral {
        Some(id) => device::select_by_identifier(token, id)?,
        None => {
            let stdin = io::stdin();
            let stdout = io::stdout();
            device::select_interactive(token, &mut stdin.lock(), &mut stdout.lock())?
        }
    };
    let device = Device::open(token, info)?;

    if let Some(pw) = &connect.password {
        session::authenticate(device, Attempts::ONCE, |_| Ok(Zeroizing::new(pw.clone())))
    } else if connect.password_stdin {
        session::authenticate(device, Attempts::ONCE, |_| prompt::password_from_stdin())
    } else {
        let attempts = Attempts::new(config.login.attempts);
        session::authenticate(device, attempts, |_| prompt::password_from_tty())
    }
}

fn list<T: Token>(token: &T, connect: &Connect, config: &Config, directory: &str) -> Result<(), Error> {
    let session = open_session(token, connect, config)?;
    let mut buf = vec![0u8; LIST_BUFFER_LEN];
    let used = session.list_raw(directory, &mut buf)?;
    let listing = DirectoryListing::parse(&buf, used);
    for (i, name) in listing.names().iter().enumerate() {
        println!("File[{i:3}]: {name}");
    }
    tracing::info!(directory, files = listing.len(), "listed");
    session.close();
    Ok(())
}

fn write_cipher_from_file<T: Token>(
    token: &T,
    connect: &Connect,
    config: &Config,
    input: &Path,
    cipher: &str,
) -> Result<(), Error> {
    let mut buffer = StreamBuffer::new();
    let session = open_session(token, connect, config)?;
    // The source must be readable before the cipher file is touched. It is
    // moved into the streamer, so it is still released before the handle.
    let source = LocalFile::open(input)?;
    let len = source.len()?;
    let mut handle = FileHandle::open(&session, cipher, Mode::Write, Creation::CreateNew)?;
    stream::write_from_source(&mut handle, source, len, &mut buffer)?;
    handle.close()?;
    session.close();
    tracing::info!(input = %input.display(), cipher, bytes = len, "encrypted file");
    Ok(())
}

fn write_cipher_from_string<T: Token>(
    token: &T,
    connect: &Connect,
    config: &Config,
    input: Option<String>,
    cipher: &str,
) -> Result<(), Error> {
    let session = open_session(token, connect, config)?;
    // Read after login so a stdin password comes first.
    let text = match input {
        Some(text) => Zeroizing::new(text),
        None => {
            let stdin = io::stdin();
            let mut lock = stdin.lock();
            prompt::read_line(&mut lock, CHUNK_CAPACITY)?.ok_or(Error::Interrupted)?
        }
    };
    let mut handle = FileHandle::open(&session, cipher, Mode::Write, Creation::CreateNew)?;
    stream::write_from_memory(&mut handle, text.as_bytes())?;
    handle.close()?;
    session.close();
    tracing::info!(cipher, bytes = text.len(), "encrypted string");
    Ok(())
}

fn write_file_from_cipher<T: Token>(
    token: &T,
    connect: &Connect,
    config: &Config,
    cipher: &str,
    output: &Path,
    force: bool,
) -> Result<(), Error> {
    let mut buffer = StreamBuffer::new();
    let session = open_session(token, connect, config)?;
    let mut handle = FileHandle::open(&session, cipher, Mode::Read, Creation::OpenExisting)?;
    let mut sink = LocalFile::create(output, force)?;
    // The output only stays if the sink is synced and the token confirms
    // the close; the sink goes first either way.
    let outcome = stream::read_to_sink(&mut handle, &mut sink, &mut buffer)
        .and_then(|n| sink.close().map(|()| n))
        .and_then(|n| handle.close().map(|()| n));
    let written = match outcome {
        Ok(n) => n,
        Err(err) => {
            discard_partial(output);
            return Err(err);
        }
    };
    session.close();
    tracing::info!(cipher, output = %output.display(), bytes = written, "decrypted file");
    Ok(())
}

/// Plaintext from a decrypt that did not complete must not stay on disk.
fn discard_partial(output: &Path) {
    if let Err(err) = fs::remove_file(output) {
        tracing::warn!(output = %output.display(), %err, "could not remove partial output");
    }
}

fn write_string_from_cipher<T: Token>(token: &T, connect: &Connect, config: &Config, cipher: &str) -> Result<(), Error> {
    let session = open_session(token, connect, config)?;
    let mut handle = FileHandle::open(&session, cipher, Mode::Read, Creation::OpenExisting)?;
    let mut buf = Zeroizing::new(vec![0u8; CHUNK_CAPACITY]);
    let n = stream::read_into(&mut handle, &mut buf)?;
    handle.close()?;
    session.close();

    let text = Zeroizing::new(String::from_utf8_lossy(&buf[..n]).into_owned());
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", text.as_str())?;
    out.flush()?;
    Ok(())
}
