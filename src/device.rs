//! Device enumeration, selection and the open-connection guard.

use std::io::{BufRead, Write};

use crate::cleanup::{self, Resource};
use crate::error::Error;
use crate::prompt;
use crate::token::{DeviceInfo, Token, OPEN_TIMEOUT};

/// Longest line accepted at the device-number prompt.
const INDEX_INPUT_LIMIT: usize = 32;

/// Lazy pass over the devices the token can currently see.
///
/// Each call to [`enumerate`] starts from a fresh discovery cursor, so the
/// sequence can be restarted by enumerating again.
pub struct Discovery<'t, T: Token> {
    token: &'t T,
    cursor: T::Cursor,
}

impl<'t, T: Token> Iterator for Discovery<'t, T> {
    type Item = DeviceInfo;

    fn next(&mut self) -> Option<DeviceInfo> {
        self.token.discover_next(&mut self.cursor)
    }
}

/// Start enumerating devices. Fails with [`Error::NoDeviceFound`] when the
/// token sees nothing at all.
pub fn enumerate<T: Token>(token: &T) -> Result<std::iter::Peekable<Discovery<'_, T>>, Error> {
    let mut devices = Discovery {
        token,
        cursor: token.discover_init(),
    }
    .peekable();
    if devices.peek().is_none() {
        return Err(Error::NoDeviceFound);
    }
    Ok(devices)
}

/// Pick the first device whose identifier is `name`.
///
/// A bare drive letter (`D`, `d`, `D:`) also names the Windows root `D:\`.
pub fn select_by_identifier<T: Token>(token: &T, name: &str) -> Result<DeviceInfo, Error> {
    enumerate(token)?
        .find(|info| identifies(&info.path, name))
        .ok_or_else(|| Error::DeviceNotFound(name.to_string()))
}

fn identifies(path: &str, name: &str) -> bool {
    if path == name {
        return true;
    }
    match (drive_letter(path), drive_letter(name)) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(&b),
        _ => false,
    }
}

/// `X`, `X:` or `X:\` as a drive letter.
fn drive_letter(s: &str) -> Option<char> {
    let mut chars = s.chars();
    let letter = chars.next().filter(char::is_ascii_alphabetic)?;
    match chars.as_str() {
        "" | ":" | ":\\" => Some(letter),
        _ => None,
    }
}

/// List the devices on `output` and ask on `input` until a valid index is given.
pub fn select_interactive<T, R, W>(token: &T, input: &mut R, output: &mut W) -> Result<DeviceInfo, Error>
where
    T: Token,
    R: BufRead,
    W: Write,
{
    let devices: Vec<DeviceInfo> = enumerate(token)?.collect();
    writeln!(output, "Available devices list:")?;
    for (i, info) in devices.iter().enumerate() {
        writeln!(output, "Device [{i:2}]: {}", info.path)?;
    }
    loop {
        write!(output, "Choose device number: ")?;
        output.flush()?;
        let line = match prompt::read_line(input, INDEX_INPUT_LIMIT) {
            Ok(Some(line)) => line,
            Ok(None) => return Err(Error::Interrupted),
            Err(Error::InputTooLong { .. }) => {
                writeln!(output, "ERROR: enter a device number in the list.")?;
                continue;
            }
            Err(e) => return Err(e),
        };
        match line.trim().parse::<usize>() {
            Ok(i) if i < devices.len() => return Ok(devices[i].clone()),
            _ => writeln!(output, "ERROR: enter a device number in the list.")?,
        }
    }
}

/// Open connection to a device. Closed when dropped.
pub struct Device<'t, T: Token> {
    token: &'t T,
    info: DeviceInfo,
    connection: Option<T::Connection>,
}

impl<'t, T: Token> Device<'t, T> {
    pub fn open(token: &'t T, info: DeviceInfo) -> Result<Self, Error> {
        let connection = token
            .open(&info, OPEN_TIMEOUT)
            .map_err(|fault| Error::DeviceOpenFailed(fault.code()))?;
        cleanup::acquired(Resource::Device);
        tracing::debug!(device = %info.path, "device opened");
        Ok(Self {
            token,
            info,
            connection: Some(connection),
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn token(&self) -> &'t T {
        self.token
    }

    pub(crate) fn connection_mut(&mut self) -> Option<&mut T::Connection> {
        self.connection.as_mut()
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.token.close_device(connection);
            cleanup::released(Resource::Device);
        }
    }
}

impl<'t, T: Token> Drop for Device<'t, T> {
    fn drop(&mut self) {
        self.release();
    }
}
