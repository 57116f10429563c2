//! The `LockPrimitive` capability: a cross-cutting, cross-process advisory
//! lock over the local user database, abstracted so tests can substitute an
//! in-process counter instead of talking to the filesystem.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Exposes the `lckpwdf`-equivalent write lock used to serialize edits to
/// the host's local user database across processes.
///
/// `write_rec_lock`/`write_rec_unlock` are the recursive variants: a holder
/// that already holds the lock may reacquire it without blocking on itself,
/// mirroring glibc's `lckpwdf`/`ulckpwdf` pairing used by `usermod`-family
/// tools.
pub trait LockPrimitive: Send + Sync {
    fn write_lock(&self, timeout: Duration) -> Result<()>;
    fn write_unlock(&self) -> Result<()>;
    fn write_rec_lock(&self, timeout: Duration) -> Result<()>;
    fn write_rec_unlock(&self) -> Result<()>;
}

/// Production lock primitive: a single well-known lock file guarded with an
/// advisory `flock`, polled with a bounded timeout rather than blocking
/// indefinitely (so a wedged holder cannot hang the whole daemon).
pub struct FileLockPrimitive {
    lock_path: PathBuf,
    held: Mutex<Option<(ThreadId, u32, std::fs::File)>>,
}

impl FileLockPrimitive {
    pub fn new<P: AsRef<Path>>(lock_path: P) -> Self {
        Self {
            lock_path: lock_path.as_ref().to_path_buf(),
            held: Mutex::new(None),
        }
    }

    fn acquire_file(&self, timeout: Duration) -> Result<std::fs::File> {
        use std::os::unix::io::AsRawFd;

        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_path)?;

        let deadline = Instant::now() + timeout;
        loop {
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc == 0 {
                return Ok(file);
            }
            if Instant::now() >= deadline {
                return Err(Error::LockTimeout(timeout));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

impl LockPrimitive for FileLockPrimitive {
    fn write_lock(&self, timeout: Duration) -> Result<()> {
        let file = self.acquire_file(timeout)?;
        let mut held = self.held.lock().unwrap();
        *held = Some((std::thread::current().id(), 1, file));
        Ok(())
    }

    fn write_unlock(&self) -> Result<()> {
        let mut held = self.held.lock().unwrap();
        *held = None;
        Ok(())
    }

    fn write_rec_lock(&self, timeout: Duration) -> Result<()> {
        let mut held = self.held.lock().unwrap();
        let this_thread = std::thread::current().id();
        if let Some((owner, depth, _)) = held.as_mut() {
            if *owner == this_thread {
                *depth += 1;
                return Ok(());
            }
        }
        drop(held);
        let file = self.acquire_file(timeout)?;
        let mut held = self.held.lock().unwrap();
        *held = Some((this_thread, 1, file));
        Ok(())
    }

    fn write_rec_unlock(&self) -> Result<()> {
        let mut held = self.held.lock().unwrap();
        if let Some((_, depth, _)) = held.as_mut() {
            *depth -= 1;
            if *depth == 0 {
                *held = None;
            }
        }
        Ok(())
    }
}

/// Test double: counts lock/unlock calls instead of touching the
/// filesystem. Recursion is tracked per-call (not per-thread) since tests
/// drive this single-threaded.
#[derive(Default)]
pub struct CountingLockPrimitive {
    locked: AtomicU32,
    rec_depth: AtomicU32,
    lock_calls: AtomicU64,
    unlock_calls: AtomicU64,
}

impl CountingLockPrimitive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_calls(&self) -> u64 {
        self.lock_calls.load(Ordering::SeqCst)
    }

    pub fn unlock_calls(&self) -> u64 {
        self.unlock_calls.load(Ordering::SeqCst)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst) > 0
    }
}

impl LockPrimitive for CountingLockPrimitive {
    fn write_lock(&self, _timeout: Duration) -> Result<()> {
        self.lock_calls.fetch_add(1, Ordering::SeqCst);
        self.locked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_unlock(&self) -> Result<()> {
        self.unlock_calls.fetch_add(1, Ordering::SeqCst);
        self.locked.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_rec_lock(&self, timeout: Duration) -> Result<()> {
        self.rec_depth.fetch_add(1, Ordering::SeqCst);
        self.write_lock(timeout)
    }

    fn write_rec_unlock(&self) -> Result<()> {
        self.rec_depth.fetch_sub(1, Ordering::SeqCst);
        self.write_unlock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_lock_tracks_calls() {
        let lock = CountingLockPrimitive::new();
        lock.write_lock(Duration::from_millis(10)).unwrap();
        assert!(lock.is_locked());
        assert_eq!(lock.lock_calls(), 1);
        lock.write_unlock().unwrap();
        assert!(!lock.is_locked());
        assert_eq!(lock.unlock_calls(), 1);
    }

    #[test]
    fn file_lock_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLockPrimitive::new(dir.path().join("lock"));
        lock.write_lock(Duration::from_millis(100)).unwrap();
        lock.write_unlock().unwrap();
    }

    #[test]
    fn file_lock_rec_lock_is_reentrant() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLockPrimitive::new(dir.path().join("lock"));
        lock.write_rec_lock(Duration::from_millis(100)).unwrap();
        lock.write_rec_lock(Duration::from_millis(100)).unwrap();
        lock.write_rec_unlock().unwrap();
        lock.write_rec_unlock().unwrap();
    }
}
