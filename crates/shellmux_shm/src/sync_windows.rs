//! Win32 named synchronization primitives for the bulk channel: a named
//! mutex (`CreateMutexW`) and named auto-reset events (`CreateEventW`),
//! the direct Windows analogue of `sync_unix`'s named semaphores.

use std::time::Duration;

use shellmux_protocol::ErrorKind;
use windows_sys::Win32::Foundation::{CloseHandle, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows_sys::Win32::System::Threading::{
    CreateEventW, CreateMutexW, ReleaseMutex, SetEvent, WaitForSingleObject, INFINITE,
};

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn millis(timeout: Option<Duration>) -> u32 {
    match timeout {
        None => INFINITE,
        Some(d) => d.as_millis().min(u32::MAX as u128) as u32,
    }
}

pub struct NamedMutex {
    handle: isize,
}

unsafe impl Send for NamedMutex {}
unsafe impl Sync for NamedMutex {}

impl NamedMutex {
    pub fn open(name: &str) -> Result<Self, ErrorKind> {
        let wname = wide(name);
        let handle = unsafe { CreateMutexW(std::ptr::null(), 0, wname.as_ptr()) };
        if handle == 0 {
            return Err(ErrorKind::SystemError(std::io::Error::last_os_error().to_string()));
        }
        Ok(Self { handle })
    }

    pub fn lock(&self, timeout: Option<Duration>) -> Result<(), ErrorKind> {
        match unsafe { WaitForSingleObject(self.handle, millis(timeout)) } {
            WAIT_OBJECT_0 => Ok(()),
            WAIT_TIMEOUT => Err(ErrorKind::TimedOut),
            _ => Err(ErrorKind::SystemError(std::io::Error::last_os_error().to_string())),
        }
    }

    pub fn unlock(&self) {
        unsafe {
            ReleaseMutex(self.handle);
        }
    }
}

impl Drop for NamedMutex {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

pub struct NamedEvent {
    handle: isize,
}

unsafe impl Send for NamedEvent {}
unsafe impl Sync for NamedEvent {}

impl NamedEvent {
    pub fn open(name: &str) -> Result<Self, ErrorKind> {
        let wname = wide(name);
        // Auto-reset (manual_reset = 0): a successful wait consumes the
        // signal, matching the semaphore-based Unix event.
        let handle = unsafe { CreateEventW(std::ptr::null(), 0, 0, wname.as_ptr()) };
        if handle == 0 {
            return Err(ErrorKind::SystemError(std::io::Error::last_os_error().to_string()));
        }
        Ok(Self { handle })
    }

    pub fn signal(&self) {
        unsafe {
            SetEvent(self.handle);
        }
    }

    pub fn wait(&self, timeout: Duration) -> Result<bool, ErrorKind> {
        match unsafe { WaitForSingleObject(self.handle, millis(Some(timeout))) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(ErrorKind::SystemError(std::io::Error::last_os_error().to_string())),
        }
    }

    /// Drain a pending signal without blocking, if any.
    pub fn try_consume(&self) {
        unsafe {
            WaitForSingleObject(self.handle, 0);
        }
    }
}

impl Drop for NamedEvent {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}
