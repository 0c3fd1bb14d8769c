//! Snapshot cache coordination.
//!
//! Generated snapshots are cached per package under
//! `<cache>/<id>#<version>/.fsg.snapshots/v<major>.<minor>.x/<filename>`,
//! keyed by the engine's major.minor version so incompatible generations
//! never collide. Reads tolerate corruption (truncated or empty files are
//! treated as misses and removed), writes are atomic, and generation is
//! coordinated through an in-process single-flight map plus a cross-process
//! lockfile protocol.

pub mod error;
pub mod flight;
pub mod lock;

pub use error::{CacheError, CacheResult};
pub use lock::LOCK_TTL;

use anvil_package::PackageRef;
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

const SNAPSHOT_DIR_NAME: &str = ".fsg.snapshots";

/// Caching behaviour of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read through; generate and cache on miss.
    #[default]
    Lazy,
    /// Like `lazy`, plus batch pre-caching of every context profile on startup.
    Ensure,
    /// Delete the cache directories of all context packages, then `ensure`.
    Rebuild,
    /// Always generate; never read or write the cache.
    None,
}

impl CacheMode {
    /// Whether this mode touches the cache at all.
    pub fn caches(&self) -> bool {
        !matches!(self, CacheMode::None)
    }

    /// Whether `create()` pre-caches the whole context.
    pub fn precaches(&self) -> bool {
        matches!(self, CacheMode::Ensure | CacheMode::Rebuild)
    }
}

impl FromStr for CacheMode {
    type Err = CacheError;

    fn from_str(s: &str) -> CacheResult<Self> {
        match s {
            "lazy" => Ok(CacheMode::Lazy),
            "ensure" => Ok(CacheMode::Ensure),
            "rebuild" => Ok(CacheMode::Rebuild),
            "none" => Ok(CacheMode::None),
            other => Err(CacheError::UnknownMode(other.to_string())),
        }
    }
}

/// Coordinates all snapshot cache IO for one engine.
pub struct SnapshotCache {
    root: PathBuf,
    mode: CacheMode,
    version_dir: String,
}

impl SnapshotCache {
    pub fn new(root: impl Into<PathBuf>, mode: CacheMode) -> Self {
        Self::with_engine_version(root, mode, env!("CARGO_PKG_VERSION"))
    }

    /// Pin the engine version the cache directory is keyed by (tests).
    pub fn with_engine_version(
        root: impl Into<PathBuf>,
        mode: CacheMode,
        engine_version: &str,
    ) -> Self {
        Self {
            root: root.into(),
            mode,
            version_dir: version_dir(engine_version),
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Snapshot directory for one package.
    pub fn snapshot_dir(&self, package: &PackageRef) -> PathBuf {
        self.root
            .join(package.dir_name())
            .join(SNAPSHOT_DIR_NAME)
            .join(&self.version_dir)
    }

    /// Cache file for one snapshot; same filename as the source resource.
    pub fn cache_file(&self, package: &PackageRef, filename: &str) -> PathBuf {
        self.snapshot_dir(package).join(filename)
    }

    /// Read a cached snapshot. Empty files, files with only whitespace, files
    /// that fail to parse, and parseable files without a `resourceType` are
    /// treated as misses: removed best-effort and reported as absent. Other
    /// IO errors propagate.
    pub async fn read(&self, package: &PackageRef, filename: &str) -> CacheResult<Option<Value>> {
        let path = self.cache_file(package, filename);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let text = String::from_utf8_lossy(&bytes);
        if text.trim().is_empty() {
            debug!(path = %path.display(), "empty cache file, discarding");
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(value) if value.get("resourceType").is_some() => Ok(Some(value)),
            Ok(_) => {
                debug!(path = %path.display(), "cache file lacks resourceType, discarding");
                let _ = fs::remove_file(&path).await;
                Ok(None)
            }
            Err(_) => {
                debug!(path = %path.display(), "corrupt cache file, discarding");
                let _ = fs::remove_file(&path).await;
                Ok(None)
            }
        }
    }

    /// Atomically write a snapshot: serialize into a sibling temp file, then
    /// link it onto the final name without overwrite. Losing the race to
    /// another writer counts as success; the temp file is removed on every
    /// path.
    pub async fn write(
        &self,
        package: &PackageRef,
        filename: &str,
        value: &Value,
    ) -> CacheResult<()> {
        let path = self.cache_file(package, filename);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp = PathBuf::from(format!(
            "{}.{}.{}.{}.tmp",
            path.display(),
            std::process::id(),
            chrono::Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        ));

        if let Err(e) = fs::write(&temp, serde_json::to_vec(value)?).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        let result = match fs::hard_link(&temp, &path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        };
        let _ = fs::remove_file(&temp).await;
        result
    }

    /// Remove the entire snapshot cache subtree of a package (all engine
    /// versions). Used by `rebuild`.
    pub async fn clear_package(&self, package: &PackageRef) -> CacheResult<()> {
        let dir = self.root.join(package.dir_name()).join(SNAPSHOT_DIR_NAME);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The cache-gated generation path: read through the cache, and on miss
    /// run `generate` under in-process single-flight and the cross-process
    /// lockfile protocol, writing the result back. In `none` mode this is a
    /// plain call to `generate` with no cache or lock traffic.
    pub async fn get_or_generate<F, Fut, E>(
        &self,
        package: &PackageRef,
        filename: &str,
        generate: F,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: From<CacheError>,
    {
        if !self.mode.caches() {
            return generate().await;
        }

        if let Some(value) = self.read(package, filename).await.map_err(E::from)? {
            return Ok(value);
        }

        let key = flight::flight_key(&package.id, &package.version, filename);
        flight::run(&key, || self.generate_locked(package, filename, generate)).await
    }

    async fn generate_locked<F, Fut, E>(
        &self,
        package: &PackageRef,
        filename: &str,
        generate: F,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: From<CacheError>,
    {
        let cache_file = self.cache_file(package, filename);
        if let Some(parent) = cache_file.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| E::from(CacheError::from(e)))?;
        }

        match lock::acquire(&cache_file).await.map_err(E::from)? {
            lock::LockOutcome::CacheAppeared => {
                if let Some(value) = self.read(package, filename).await.map_err(E::from)? {
                    return Ok(value);
                }
                // The peer's file was unreadable; produce our own.
                let value = generate().await?;
                self.write(package, filename, &value).await.map_err(E::from)?;
                Ok(value)
            }
            lock::LockOutcome::Acquired(held) => {
                if let Some(value) = self.read(package, filename).await.map_err(E::from)? {
                    held.release().await;
                    return Ok(value);
                }
                let result = async {
                    let value = generate().await?;
                    self.write(package, filename, &value).await.map_err(E::from)?;
                    Ok(value)
                }
                .await;
                held.release().await;
                result
            }
        }
    }
}

/// Cache directory component for an engine version: `v<major>.<minor>.x`.
fn version_dir(engine_version: &str) -> String {
    let mut parts = engine_version.split('.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) => format!("v{}.{}.x", major, minor),
        _ => format!("v{}", engine_version),
    }
}
