//! Cross-process lockfile protocol for snapshot generation.
//!
//! A generator takes `<cache_file>.lock` before writing. Locks carry the
//! owning `{pid, timestamp, hostname}`; a lock is stale once it is older than
//! [`LOCK_TTL`] or its owner provably died on this host. Losers poll until the
//! cache file appears or the lock can be taken over.

use crate::error::CacheResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

/// Age after which a lock is considered abandoned.
pub const LOCK_TTL: Duration = Duration::from_secs(180);

/// Extra patience on top of the TTL before a waiter forces takeover.
const LOCK_WAIT_EXTRA: Duration = Duration::from_secs(10);

/// Poll cadence while waiting on a foreign lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    timestamp: i64,
    hostname: String,
}

impl LockInfo {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            hostname: hostname(),
        }
    }

    fn is_stale(&self) -> bool {
        let age_ms = chrono::Utc::now().timestamp_millis() - self.timestamp;
        if age_ms > LOCK_TTL.as_millis() as i64 {
            return true;
        }
        self.hostname == hostname() && !process_alive(self.pid)
    }
}

/// Result of waiting for the right to generate a cache entry.
pub enum LockOutcome {
    /// This caller holds the lock and must generate.
    Acquired(CacheLock),
    /// Another writer finished first; the cache file is ready to read.
    CacheAppeared,
}

/// A held lockfile. Release removes the file only while its contents still
/// identify this process; `Drop` performs a best-effort synchronous release.
pub struct CacheLock {
    path: PathBuf,
    info: LockInfo,
    released: bool,
}

impl CacheLock {
    pub async fn release(mut self) {
        self.released = true;
        if Self::still_ours(&self.path, &self.info) {
            let _ = fs::remove_file(&self.path).await;
        }
    }

    fn still_ours(path: &Path, info: &LockInfo) -> bool {
        std::fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<LockInfo>(&bytes).ok())
            .is_some_and(|current| current == *info)
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if !self.released && Self::still_ours(&self.path, &self.info) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Wait for the right to generate `cache_file`. Returns once this caller
/// holds the lock or the cache file has been produced by a peer. A lock that
/// outlives the full waiting window is taken over.
pub async fn acquire(cache_file: &Path) -> CacheResult<LockOutcome> {
    let lock_path = lock_path_for(cache_file);
    let deadline = Instant::now() + LOCK_TTL + LOCK_WAIT_EXTRA;

    loop {
        if let Some(lock) = try_acquire(&lock_path).await? {
            return Ok(LockOutcome::Acquired(lock));
        }

        loop {
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;

            if fs::metadata(cache_file).await.is_ok() {
                return Ok(LockOutcome::CacheAppeared);
            }

            match read_lock(&lock_path).await {
                None => break,
                Some(info) if info.is_stale() => break,
                Some(_) if Instant::now() >= deadline => {
                    warn!(lock = %lock_path.display(), "lock wait exceeded, taking over");
                    let _ = fs::remove_file(&lock_path).await;
                    break;
                }
                Some(_) => {}
            }
        }
    }
}

async fn try_acquire(lock_path: &Path) -> CacheResult<Option<CacheLock>> {
    if let Some(existing) = read_lock(lock_path).await {
        if !existing.is_stale() {
            return Ok(None);
        }
        let _ = fs::remove_file(lock_path).await;
    }

    let info = LockInfo::current();
    let temp = lock_path.with_extension(format!("lock.{}.tmp", Uuid::new_v4().simple()));
    fs::write(&temp, serde_json::to_vec(&info)?).await?;

    match fs::hard_link(&temp, lock_path).await {
        Ok(()) => {
            let _ = fs::remove_file(&temp).await;
            Ok(Some(CacheLock {
                path: lock_path.to_path_buf(),
                info,
                released: false,
            }))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let _ = fs::remove_file(&temp).await;
            Ok(None)
        }
        Err(e) => {
            let _ = fs::remove_file(&temp).await;
            Err(e.into())
        }
    }
}

async fn read_lock(lock_path: &Path) -> Option<LockInfo> {
    let bytes = fs::read(lock_path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn lock_path_for(cache_file: &Path) -> PathBuf {
    let mut name = cache_file.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(unix)]
fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc == 0 {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        if let Ok(name) = std::str::from_utf8(&buf[..end]) {
            return name.to_string();
        }
    }
    "unknown".to_string()
}

#[cfg(not(unix))]
fn hostname() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // No portable probe; only the TTL retires locks here.
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn acquires_free_lock() {
        let tmp = TempDir::new().unwrap();
        let cache_file = tmp.path().join("snapshot.json");

        let outcome = acquire(&cache_file).await.unwrap();
        let lock = match outcome {
            LockOutcome::Acquired(lock) => lock,
            LockOutcome::CacheAppeared => panic!("no cache file exists"),
        };

        assert!(lock_path_for(&cache_file).exists());
        lock.release().await;
        assert!(!lock_path_for(&cache_file).exists());
    }

    #[tokio::test]
    async fn takes_over_stale_lock() {
        let tmp = TempDir::new().unwrap();
        let cache_file = tmp.path().join("snapshot.json");
        let lock_path = lock_path_for(&cache_file);

        let stale = LockInfo {
            pid: std::process::id(),
            timestamp: chrono::Utc::now().timestamp_millis() - 10 * 60 * 1000,
            hostname: hostname(),
        };
        fs::write(&lock_path, serde_json::to_vec(&stale).unwrap())
            .await
            .unwrap();

        let outcome = acquire(&cache_file).await.unwrap();
        assert!(matches!(outcome, LockOutcome::Acquired(_)));
    }

    #[tokio::test]
    async fn waiter_sees_cache_file_appear() {
        let tmp = TempDir::new().unwrap();
        let cache_file = tmp.path().join("snapshot.json");

        let outcome = acquire(&cache_file).await.unwrap();
        let LockOutcome::Acquired(lock) = outcome else {
            panic!("expected acquisition");
        };

        let waiter_file = cache_file.clone();
        let waiter = tokio::spawn(async move { acquire(&waiter_file).await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        fs::write(&cache_file, b"{\"resourceType\":\"StructureDefinition\"}")
            .await
            .unwrap();

        let outcome = waiter.await.unwrap().unwrap();
        assert!(matches!(outcome, LockOutcome::CacheAppeared));
        lock.release().await;
    }

    #[tokio::test]
    async fn release_leaves_foreign_lock_alone() {
        let tmp = TempDir::new().unwrap();
        let cache_file = tmp.path().join("snapshot.json");
        let lock_path = lock_path_for(&cache_file);

        let LockOutcome::Acquired(lock) = acquire(&cache_file).await.unwrap() else {
            panic!("expected acquisition");
        };

        // Simulate takeover by another process.
        let foreign = LockInfo {
            pid: 999_999,
            timestamp: chrono::Utc::now().timestamp_millis(),
            hostname: "elsewhere".to_string(),
        };
        fs::write(&lock_path, serde_json::to_vec(&foreign).unwrap())
            .await
            .unwrap();

        lock.release().await;
        assert!(lock_path.exists());
    }
}
