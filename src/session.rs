//! Authentication handshake and session teardown.

use std::time::{SystemTime, UNIX_EPOCH};

use zeroize::Zeroizing;

use crate::cleanup::{self, Resource};
use crate::device::Device;
use crate::error::Error;
use crate::securemem::Credential;
use crate::token::{Fault, Token};

/// How many times a rejected password may be asked for again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempts(u32);

impl Attempts {
    /// A password supplied up front gets exactly one try.
    pub const ONCE: Attempts = Attempts(1);

    pub fn new(n: u32) -> Self {
        Self(n.max(1))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// Authenticated session on an open device.
///
/// Owns the device connection. Dropping the session (or calling
/// [`Session::close`]) finalizes the secure subsystem, logs out if the login
/// went through, and then closes the device.
pub struct Session<'t, T: Token> {
    raw: Option<T::Session>,
    logged_in: bool,
    clock: u32,
    // Declared last: closed after the session itself is torn down.
    device: Device<'t, T>,
}

/// Log in on `device` and bring the session up.
///
/// `password` is called once per attempt with the 1-based attempt number.
/// A wrong password is retried on the same open device until `attempts` is
/// used up, then reported as [`Error::WrongPassword`]. Any other failure
/// releases what was acquired so far and is returned as is.
pub fn authenticate<'t, T, F>(mut device: Device<'t, T>, attempts: Attempts, mut password: F) -> Result<Session<'t, T>, Error>
where
    T: Token,
    F: FnMut(u32) -> Result<Zeroizing<String>, Error>,
{
    let token = device.token();
    let mut attempt = 1;
    let raw = loop {
        let pw = password(attempt)?;
        let credential = Credential::new(pw.as_bytes())?;
        drop(pw);
        let connection = device
            .connection_mut()
            .ok_or(Error::InvalidArgs("device connection is closed"))?;
        match token.login(connection, &credential) {
            Ok(raw) => break raw,
            Err(Fault::WrongCredential) => {
                tracing::warn!(attempt, max = attempts.get(), "wrong password");
                if attempt >= attempts.get() {
                    return Err(Error::WrongPassword);
                }
                eprintln!("Wrong password.");
                attempt += 1;
            }
            Err(fault) => return Err(Error::LoginFailed(fault.code())),
        }
    };
    cleanup::acquired(Resource::Session);

    let mut session = Session {
        raw: Some(raw),
        logged_in: true,
        clock: 0,
        device,
    };
    session.sync_clock()?;
    session.init_subsystem()?;
    tracing::debug!(device = %session.device.info().path, clock = session.clock, "session ready");
    Ok(session)
}

impl<'t, T: Token> Session<'t, T> {
    fn sync_clock(&mut self) -> Result<(), Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let now = u32::try_from(now).unwrap_or(u32::MAX);
        let token = self.device.token();
        let raw = self.raw.as_mut().ok_or(Error::InvalidArgs("session is closed"))?;
        token
            .set_time(raw, now)
            .map_err(|fault| Error::ClockSyncFailed(fault.code()))?;
        self.clock = now;
        Ok(())
    }

    fn init_subsystem(&mut self) -> Result<(), Error> {
        let token = self.device.token();
        let raw = self.raw.as_mut().ok_or(Error::InvalidArgs("session is closed"))?;
        token
            .secure_init(raw)
            .map_err(|fault| Error::SubsystemInitFailed(fault.code()))
    }

    pub fn token(&self) -> &'t T {
        self.device.token()
    }

    pub fn device(&self) -> &Device<'t, T> {
        &self.device
    }

    /// Clock value pushed to the token at login (UNIX seconds).
    pub fn clock(&self) -> u32 {
        self.clock
    }

    pub fn is_authenticated(&self) -> bool {
        self.raw.is_some() && self.logged_in
    }

    pub(crate) fn raw(&self) -> Result<&T::Session, Error> {
        self.raw.as_ref().ok_or(Error::InvalidArgs("session is closed"))
    }

    /// List the encrypted files in `dir` into `buf`, returning the used length.
    pub fn list_raw(&self, dir: &str, buf: &mut [u8]) -> Result<usize, Error> {
        let used = self
            .token()
            .list(self.raw()?, dir, buf)
            .map_err(|fault| Error::ListFailed(fault.code()))?;
        Ok(used.min(buf.len()))
    }

    /// Tear the session down and close the device.
    pub fn close(mut self) {
        self.release();
        // The device guard runs when `self` goes out of scope here.
    }

    fn release(&mut self) {
        let Some(mut raw) = self.raw.take() else {
            return;
        };
        let token = self.device.token();
        token.secure_finit(&mut raw);
        if self.logged_in {
            if let Err(fault) = token.logout(&mut raw) {
                cleanup::release_failed(Resource::Session, "logout", fault);
            }
            self.logged_in = false;
        }
        cleanup::released(Resource::Session);
    }
}

impl<'t, T: Token> Drop for Session<'t, T> {
    fn drop(&mut self) {
        self.release();
    }
}
