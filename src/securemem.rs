use crate::error::Error;
use zeroize::Zeroize;

/// Size of the login credential buffer expected by the token.
pub const CREDENTIAL_LEN: usize = 32;

/// Fixed-size, zero-padded login credential.
///
/// The buffer lives on the heap so its address stays stable while it is
/// memory-locked, and it is wiped before the lock is released.
pub struct Credential {
    // Dropped before `bytes`: unlock, then free.
    lock: MemoryLock,
    bytes: Box<[u8; CREDENTIAL_LEN]>,
    len: usize,
}

impl Credential {
    pub fn new(password: &[u8]) -> Result<Self, Error> {
        if password.len() > CREDENTIAL_LEN {
            return Err(Error::CredentialTooLong {
                limit: CREDENTIAL_LEN,
            });
        }
        let mut bytes = Box::new([0u8; CREDENTIAL_LEN]);
        bytes[..password.len()].copy_from_slice(password);
        let lock = MemoryLock::lock(&bytes[..]);
        Ok(Self {
            lock,
            bytes,
            len: password.len(),
        })
    }

    /// The whole zero-padded buffer, as handed to the token.
    pub fn as_bytes(&self) -> &[u8; CREDENTIAL_LEN] {
        &self.bytes
    }

    /// Length of the password without padding.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_locked(&self) -> bool {
        self.lock.locked
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").field("len", &self.len).finish_non_exhaustive()
    }
}

/// Best-effort memory locking for secrets.
///
/// This reduces exposure to swapping on supported OSes, but it is not a complete mitigation:
/// - Small buffers share pages with other allocations.
/// - Locking may fail due to OS limits; failure is non-fatal.
pub struct MemoryLock {
    ptr: *const u8,
    len: usize,
    locked: bool,
}

impl MemoryLock {
    pub fn lock(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self {
                ptr: std::ptr::null(),
                len: 0,
                locked: false,
            };
        }
        let ptr = bytes.as_ptr();
        let len = bytes.len();
        let locked = match unsafe { lock_region(ptr, len) } {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(%err, "credential buffer not locked");
                false
            }
        };
        Self { ptr, len, locked }
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        if self.locked && !self.ptr.is_null() && self.len != 0 {
            let _ = unsafe { unlock_region(self.ptr, self.len) };
        }
    }
}

unsafe fn lock_region(ptr: *const u8, len: usize) -> Result<(), Error> {
    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Memory::VirtualLock;
        let ok = VirtualLock(ptr as *const core::ffi::c_void, len);
        if ok == 0 {
            return Err(Error::InvalidArgs("memory locking unavailable"));
        }
        return Ok(());
    }
    #[cfg(unix)]
    {
        let rc = libc::mlock(ptr as *const core::ffi::c_void, len);
        if rc != 0 {
            return Err(Error::InvalidArgs("memory locking unavailable"));
        }
        return Ok(());
    }
    #[cfg(not(any(windows, unix)))]
    {
        let _ = ptr;
        let _ = len;
        Err(Error::InvalidArgs("memory locking unsupported on this platform"))
    }
}

unsafe fn unlock_region(ptr: *const u8, len: usize) -> Result<(), Error> {
    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Memory::VirtualUnlock;
        let ok = VirtualUnlock(ptr as *const core::ffi::c_void, len);
        if ok == 0 {
            return Err(Error::InvalidArgs("memory unlocking unavailable"));
        }
        return Ok(());
    }
    #[cfg(unix)]
    {
        let rc = libc::munlock(ptr as *const core::ffi::c_void, len);
        if rc != 0 {
            return Err(Error::InvalidArgs("memory unlocking unavailable"));
        }
        return Ok(());
    }
    #[cfg(not(any(windows, unix)))]
    {
        let _ = ptr;
        let _ = len;
        Err(Error::InvalidArgs("memory unlocking unsupported on this platform"))
    }
}
