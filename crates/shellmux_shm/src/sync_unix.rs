//! POSIX named synchronization primitives for the bulk channel: a named
//! mutex and named events, both built on `sem_open`-family named
//! semaphores so two unrelated processes can rendezvous by name alone,
//! the same trick `sem_open(3)` exists for.

use std::ffi::CString;
use std::time::Duration;

use shellmux_protocol::ErrorKind;

/// A binary named mutex backed by a POSIX named semaphore initialized
/// to 1. `lock`/`unlock` map to `sem_wait`/`sem_post`.
pub struct NamedMutex {
    sem: *mut libc::sem_t,
    name: CString,
}

unsafe impl Send for NamedMutex {}
unsafe impl Sync for NamedMutex {}

impl NamedMutex {
    pub fn open(name: &str) -> Result<Self, ErrorKind> {
        let cname = CString::new(format!("/{name}")).map_err(|e| ErrorKind::InvalidArg(e.to_string()))?;
        let sem = unsafe { libc::sem_open(cname.as_ptr(), libc::O_CREAT, 0o666, 1) };
        if sem == libc::SEM_FAILED {
            return Err(ErrorKind::SystemError(std::io::Error::last_os_error().to_string()));
        }
        Ok(Self { sem, name: cname })
    }

    /// Acquire the mutex, waiting up to `timeout`. `None` waits
    /// indefinitely.
    pub fn lock(&self, timeout: Option<Duration>) -> Result<(), ErrorKind> {
        match timeout {
            None => {
                let rc = unsafe { libc::sem_wait(self.sem) };
                if rc == 0 {
                    Ok(())
                } else {
                    Err(ErrorKind::SystemError(std::io::Error::last_os_error().to_string()))
                }
            }
            Some(timeout) => {
                let deadline = abs_timespec(timeout);
                loop {
                    let rc = unsafe { libc::sem_timedwait(self.sem, &deadline) };
                    if rc == 0 {
                        return Ok(());
                    }
                    let err = std::io::Error::last_os_error();
                    match err.raw_os_error() {
                        Some(libc::EINTR) => continue,
                        Some(libc::ETIMEDOUT) => return Err(ErrorKind::TimedOut),
                        _ => return Err(ErrorKind::SystemError(err.to_string())),
                    }
                }
            }
        }
    }

    pub fn unlock(&self) {
        unsafe {
            libc::sem_post(self.sem);
        }
    }
}

impl Drop for NamedMutex {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
        let _ = &self.name;
    }
}

/// A named, countable-to-one event. `signal` posts, `wait` blocks with a
/// timeout, `try_consume` drains a pending signal without blocking —
/// used to discard a stale ack left over from a prior exchange.
pub struct NamedEvent {
    sem: *mut libc::sem_t,
    name: CString,
}

unsafe impl Send for NamedEvent {}
unsafe impl Sync for NamedEvent {}

impl NamedEvent {
    pub fn open(name: &str) -> Result<Self, ErrorKind> {
        let cname = CString::new(format!("/{name}")).map_err(|e| ErrorKind::InvalidArg(e.to_string()))?;
        let sem = unsafe { libc::sem_open(cname.as_ptr(), libc::O_CREAT, 0o666, 0) };
        if sem == libc::SEM_FAILED {
            return Err(ErrorKind::SystemError(std::io::Error::last_os_error().to_string()));
        }
        Ok(Self { sem, name: cname })
    }

    pub fn signal(&self) {
        unsafe {
            libc::sem_post(self.sem);
        }
    }

    /// Wait up to `timeout` for a signal. Returns `Ok(true)` if
    /// signaled, `Ok(false)` on timeout.
    pub fn wait(&self, timeout: Duration) -> Result<bool, ErrorKind> {
        let deadline = abs_timespec(timeout);
        loop {
            let rc = unsafe { libc::sem_timedwait(self.sem, &deadline) };
            if rc == 0 {
                return Ok(true);
            }
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => return Ok(false),
                _ => return Err(ErrorKind::SystemError(err.to_string())),
            }
        }
    }

    /// Drain a pending signal without blocking, if any.
    pub fn try_consume(&self) {
        unsafe {
            libc::sem_trywait(self.sem);
        }
    }
}

impl Drop for NamedEvent {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
        let _ = &self.name;
    }
}

fn abs_timespec(timeout: Duration) -> libc::timespec {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut now);
    }
    let mut nsec = now.tv_nsec as i64 + timeout.subsec_nanos() as i64;
    let mut sec = now.tv_sec + timeout.as_secs() as i64;
    if nsec >= 1_000_000_000 {
        nsec -= 1_000_000_000;
        sec += 1;
    }
    libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec,
    }
}
