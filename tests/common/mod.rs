//! Scripted token that records every primitive call, plus local sources and
//! sinks that record when they are closed.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::rc::Rc;
use std::time::Duration;

use sefile::device::{self, Device};
use sefile::securemem::Credential;
use sefile::session::{self, Attempts, Session};
use sefile::token::{Creation, DeviceInfo, Fault, Mode, Token};
use sefile::Error;
use zeroize::Zeroizing;

pub const PIN: &str = "1234";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open(String),
    CloseDevice,
    Login,
    SetTime,
    SecureInit,
    SecureFinit,
    Logout,
    OpenFile(String),
    Write(usize),
    Read(usize),
    CloseFile,
    AbortFile,
    List(String),
    LocalClosed,
}

/// Primitive at which a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Open,
    Login,
    SetTime,
    SecureInit,
    Logout,
    OpenFile,
    Write,
    Read,
    CloseFile,
    List,
}

pub type Log = Rc<RefCell<Vec<Event>>>;

pub struct MockToken {
    devices: Vec<String>,
    log: Log,
    files: RefCell<HashMap<String, Vec<u8>>>,
    faults: RefCell<HashMap<Step, (Fault, u32)>>,
    listing: Vec<u8>,
}

pub struct MockSession;

pub struct MockFile {
    path: String,
    mode: Mode,
    pos: usize,
}

impl MockToken {
    pub fn new(devices: &[&str]) -> Self {
        Self {
            devices: devices.iter().map(|d| d.to_string()).collect(),
            log: Rc::new(RefCell::new(Vec::new())),
            files: RefCell::new(HashMap::new()),
            faults: RefCell::new(HashMap::new()),
            listing: Vec::new(),
        }
    }

    pub fn with_listing(mut self, raw: &[u8]) -> Self {
        self.listing = raw.to_vec();
        self
    }

    /// Make `step` fail with `fault` from now on.
    pub fn fail(&self, step: Step, fault: Fault) {
        self.fail_times(step, fault, u32::MAX);
    }

    /// Make the next `times` calls of `step` fail.
    pub fn fail_times(&self, step: Step, fault: Fault, times: u32) {
        self.faults.borrow_mut().insert(step, (fault, times));
    }

    pub fn log(&self) -> Log {
        Rc::clone(&self.log)
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.log.borrow_mut().clear();
    }

    pub fn count(&self, event: &Event) -> usize {
        self.log.borrow().iter().filter(|e| *e == event).count()
    }

    /// Sizes of all write calls, in order.
    pub fn write_sizes(&self) -> Vec<usize> {
        self.log
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Write(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    pub fn put_file(&self, path: &str, data: &[u8]) {
        self.files.borrow_mut().insert(path.to_string(), data.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(path).cloned()
    }

    fn record(&self, event: Event) {
        self.log.borrow_mut().push(event);
    }

    fn check(&self, step: Step) -> Result<(), Fault> {
        let mut faults = self.faults.borrow_mut();
        if let Some((fault, remaining)) = faults.get_mut(&step) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(*fault);
            }
        }
        Ok(())
    }
}

impl Token for MockToken {
    type Cursor = usize;
    type Connection = String;
    type Session = MockSession;
    type File = MockFile;

    fn discover_init(&self) -> usize {
        0
    }

    fn discover_next(&self, cursor: &mut usize) -> Option<DeviceInfo> {
        let path = self.devices.get(*cursor)?.clone();
        *cursor += 1;
        Some(DeviceInfo { path })
    }

    fn open(&self, info: &DeviceInfo, _timeout: Duration) -> Result<String, Fault> {
        self.record(Event::Open(info.path.clone()));
        self.check(Step::Open)?;
        Ok(info.path.clone())
    }

    fn close_device(&self, _connection: String) {
        self.record(Event::CloseDevice);
    }

    fn login(&self, _connection: &mut String, credential: &Credential) -> Result<MockSession, Fault> {
        self.record(Event::Login);
        self.check(Step::Login)?;
        if &credential.as_bytes()[..credential.len()] != PIN.as_bytes() {
            return Err(Fault::WrongCredential);
        }
        Ok(MockSession)
    }

    fn logout(&self, _session: &mut MockSession) -> Result<(), Fault> {
        self.record(Event::Logout);
        self.check(Step::Logout)
    }

    fn set_time(&self, _session: &mut MockSession, _unix_secs: u32) -> Result<(), Fault> {
        self.record(Event::SetTime);
        self.check(Step::SetTime)
    }

    fn secure_init(&self, _session: &mut MockSession) -> Result<(), Fault> {
        self.record(Event::SecureInit);
        self.check(Step::SecureInit)
    }

    fn secure_finit(&self, _session: &mut MockSession) {
        self.record(Event::SecureFinit);
    }

    fn open_file(&self, _session: &MockSession, path: &str, mode: Mode, creation: Creation) -> Result<MockFile, Fault> {
        self.record(Event::OpenFile(path.to_string()));
        self.check(Step::OpenFile)?;
        let mut files = self.files.borrow_mut();
        match creation {
            Creation::CreateNew => {
                files.insert(path.to_string(), Vec::new());
            }
            Creation::OpenExisting if !files.contains_key(path) => return Err(Fault::Code(0xF002)),
            Creation::OpenExisting => {}
        }
        Ok(MockFile {
            path: path.to_string(),
            mode,
            pos: 0,
        })
    }

    fn read(&self, file: &mut MockFile, buf: &mut [u8]) -> Result<usize, Fault> {
        self.check(Step::Read).map_err(|fault| {
            self.record(Event::Read(0));
            fault
        })?;
        let files = self.files.borrow();
        let data = files.get(&file.path).ok_or(Fault::Code(0xF002))?;
        let n = buf.len().min(data.len() - file.pos);
        buf[..n].copy_from_slice(&data[file.pos..file.pos + n]);
        file.pos += n;
        self.record(Event::Read(n));
        Ok(n)
    }

    fn write(&self, file: &mut MockFile, data: &[u8]) -> Result<(), Fault> {
        self.record(Event::Write(data.len()));
        self.check(Step::Write)?;
        if file.mode != Mode::Write {
            return Err(Fault::Code(0xF006));
        }
        self.files
            .borrow_mut()
            .entry(file.path.clone())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn close_file(&self, _file: MockFile) -> Result<(), Fault> {
        self.record(Event::CloseFile);
        self.check(Step::CloseFile)
    }

    fn abort_file(&self, _file: MockFile) {
        self.record(Event::AbortFile);
    }

    fn list(&self, _session: &MockSession, dir: &str, buf: &mut [u8]) -> Result<usize, Fault> {
        self.record(Event::List(dir.to_string()));
        self.check(Step::List)?;
        let n = self.listing.len().min(buf.len());
        buf[..n].copy_from_slice(&self.listing[..n]);
        Ok(n)
    }
}

/// Plaintext source that logs when it is closed.
pub struct RecordingSource {
    inner: Cursor<Vec<u8>>,
    log: Log,
}

impl RecordingSource {
    pub fn new(data: &[u8], log: Log) -> Self {
        Self {
            inner: Cursor::new(data.to_vec()),
            log,
        }
    }
}

impl Read for RecordingSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Drop for RecordingSource {
    fn drop(&mut self) {
        self.log.borrow_mut().push(Event::LocalClosed);
    }
}

/// Plaintext sink that logs when it is closed.
pub struct RecordingSink {
    pub data: Rc<RefCell<Vec<u8>>>,
    log: Log,
}

impl RecordingSink {
    pub fn new(log: Log) -> Self {
        Self {
            data: Rc::new(RefCell::new(Vec::new())),
            log,
        }
    }
}

impl Write for RecordingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        self.log.borrow_mut().push(Event::LocalClosed);
    }
}

/// Select `id`, open it and log in with the right PIN.
pub fn login<'t>(token: &'t MockToken, id: &str) -> Result<Session<'t, MockToken>, Error> {
    let info = device::select_by_identifier(token, id)?;
    let device = Device::open(token, info)?;
    session::authenticate(device, Attempts::ONCE, |_| Ok(Zeroizing::new(PIN.to_string())))
}

/// Events of a full successful login.
pub fn login_events(id: &str) -> Vec<Event> {
    vec![
        Event::Open(id.to_string()),
        Event::Login,
        Event::SetTime,
        Event::SecureInit,
    ]
}

/// Events of a full teardown after login.
pub fn teardown_events() -> Vec<Event> {
    vec![Event::SecureFinit, Event::Logout, Event::CloseDevice]
}
