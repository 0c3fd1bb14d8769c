//! Package metadata resolution over the on-disk package cache.
//!
//! The snapshot engine consumes packages exclusively through the
//! [`PackageExplorer`] trait; [`DirectoryExplorer`] is the default
//! implementation, reading the `<cache>/<id>#<version>/package/` layout that
//! package managers populate. It never touches the network.

use crate::error::{PackageError, PackageResult};
use crate::{
    clean_json_bytes, compare_versions, version_matches, PackageIndex, PackageManifest, PackageRef,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

/// Metadata for one conformance resource in a loaded package.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceMeta {
    pub filename: String,
    pub resource_type: String,
    pub id: Option<String>,
    pub url: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub kind: Option<String>,
    pub type_name: Option<String>,
    pub derivation: Option<String>,
    pub package: PackageRef,
}

/// Lookup key for [`PackageExplorer::resolve_meta`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaKey {
    Id(String),
    Url(String),
    Name(String),
    Filename(String),
}

impl MetaKey {
    /// Whether a metadata entry answers to this key.
    pub fn matches(&self, meta: &ResourceMeta) -> bool {
        match self {
            MetaKey::Id(id) => meta.id.as_deref() == Some(id),
            MetaKey::Url(url) => match url.split_once('|') {
                Some((base, version)) => {
                    meta.url.as_deref() == Some(base) && meta.version.as_deref() == Some(version)
                }
                None => meta.url.as_deref() == Some(url),
            },
            MetaKey::Name(name) => meta.name.as_deref() == Some(name),
            MetaKey::Filename(filename) => meta.filename == *filename,
        }
    }
}

impl std::fmt::Display for MetaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaKey::Id(v) => write!(f, "id {}", v),
            MetaKey::Url(v) => write!(f, "url {}", v),
            MetaKey::Name(v) => write!(f, "name {}", v),
            MetaKey::Filename(v) => write!(f, "filename {}", v),
        }
    }
}

/// Predicate for [`PackageExplorer::lookup_meta`]. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct MetaFilter {
    pub resource_type: Option<String>,
    pub derivation: Option<String>,
    pub package: Option<PackageRef>,
}

impl MetaFilter {
    /// Whether a metadata entry satisfies this filter.
    pub fn matches(&self, meta: &ResourceMeta) -> bool {
        if let Some(rt) = &self.resource_type {
            if meta.resource_type != *rt {
                return false;
            }
        }
        if let Some(derivation) = &self.derivation {
            if meta.derivation.as_deref() != Some(derivation) {
                return false;
            }
        }
        if let Some(package) = &self.package {
            if meta.package != *package {
                return false;
            }
        }
        true
    }
}

/// The package-loader surface the snapshot engine consumes. Implementations
/// resolve metadata and raw resources from an already-installed package set.
#[async_trait]
pub trait PackageExplorer: Send + Sync {
    /// Read the raw resource stored under `filename` in the given package.
    async fn resolve_by_filename(
        &self,
        package: &PackageRef,
        filename: &str,
    ) -> PackageResult<Value>;

    /// Resolve a single resource's metadata by id, url, name or filename.
    /// `package_filter` restricts the search to one package id (or `id@version`).
    async fn resolve_meta(
        &self,
        resource_type: &str,
        key: &MetaKey,
        package_filter: Option<&str>,
    ) -> PackageResult<ResourceMeta>;

    /// All metadata entries matching the filter, in package load order.
    async fn lookup_meta(&self, filter: &MetaFilter) -> PackageResult<Vec<ResourceMeta>>;

    /// The resolved context packages, in configuration order.
    fn context_packages(&self) -> Vec<PackageRef>;

    /// Direct dependencies of a loaded package, resolved to installed versions.
    fn direct_dependencies(&self, package: &PackageRef) -> Vec<PackageRef>;

    /// Manifest of a loaded package.
    fn package_manifest(&self, package: &PackageRef) -> Option<PackageManifest>;

    /// Root of the package cache.
    fn cache_path(&self) -> PathBuf;
}

struct LoadedPackage {
    reference: PackageRef,
    manifest: PackageManifest,
    dependencies: Vec<PackageRef>,
    metas: Vec<ResourceMeta>,
}

/// [`PackageExplorer`] over an on-disk package cache.
///
/// Context packages and their transitive dependencies are loaded up front;
/// metadata lookups are answered from memory, resource reads go to disk.
pub struct DirectoryExplorer {
    cache_path: PathBuf,
    context: Vec<PackageRef>,
    packages: Vec<LoadedPackage>,
    by_ref: HashMap<PackageRef, usize>,
}

impl DirectoryExplorer {
    /// Load the given context packages (and their dependency closure) from
    /// `cache_path`. Unpinned context references resolve to the newest
    /// installed version; a missing context package is an error, a missing
    /// dependency is logged and skipped.
    pub async fn load(
        cache_path: impl Into<PathBuf>,
        context: &[PackageRef],
    ) -> PackageResult<Self> {
        let cache_path = cache_path.into();
        let mut explorer = Self {
            cache_path,
            context: Vec::new(),
            packages: Vec::new(),
            by_ref: HashMap::new(),
        };

        let mut queue: VecDeque<(PackageRef, bool)> = VecDeque::new();
        for reference in context {
            let resolved = resolve_reference(&explorer.cache_path, reference).await?;
            explorer.context.push(resolved.clone());
            queue.push_back((resolved, true));
        }

        while let Some((reference, required)) = queue.pop_front() {
            if explorer.by_ref.contains_key(&reference) {
                continue;
            }
            let loaded = match load_package(&explorer.cache_path, &reference).await {
                Ok(loaded) => loaded,
                Err(e) if !required => {
                    warn!(package = %reference, error = %e, "skipping unavailable dependency");
                    continue;
                }
                Err(e) => return Err(e),
            };
            for dependency in &loaded.dependencies {
                queue.push_back((dependency.clone(), false));
            }
            explorer
                .by_ref
                .insert(reference.clone(), explorer.packages.len());
            explorer.packages.push(loaded);
        }

        Ok(explorer)
    }

    fn package_matches_filter(reference: &PackageRef, filter: &str) -> bool {
        reference.id == filter
            || reference.to_string() == filter
            || reference.dir_name() == filter
    }
}

#[async_trait]
impl PackageExplorer for DirectoryExplorer {
    async fn resolve_by_filename(
        &self,
        package: &PackageRef,
        filename: &str,
    ) -> PackageResult<Value> {
        let path = self
            .cache_path
            .join(package.dir_name())
            .join("package")
            .join(filename);
        let bytes = fs::read(&path)
            .await
            .map_err(|_| PackageError::MissingFile(path.to_string_lossy().into_owned()))?;
        Ok(serde_json::from_str(&clean_json_bytes(&bytes)?)?)
    }

    async fn resolve_meta(
        &self,
        resource_type: &str,
        key: &MetaKey,
        package_filter: Option<&str>,
    ) -> PackageResult<ResourceMeta> {
        for package in &self.packages {
            if let Some(filter) = package_filter {
                if !Self::package_matches_filter(&package.reference, filter) {
                    continue;
                }
            }
            if let Some(meta) = package
                .metas
                .iter()
                .find(|m| m.resource_type == resource_type && key.matches(m))
            {
                return Ok(meta.clone());
            }
        }
        Err(PackageError::ResourceNotFound(format!(
            "{} with {}{}",
            resource_type,
            key,
            package_filter
                .map(|f| format!(" in package {}", f))
                .unwrap_or_default()
        )))
    }

    async fn lookup_meta(&self, filter: &MetaFilter) -> PackageResult<Vec<ResourceMeta>> {
        Ok(self
            .packages
            .iter()
            .flat_map(|p| p.metas.iter())
            .filter(|m| filter.matches(m))
            .cloned()
            .collect())
    }

    fn context_packages(&self) -> Vec<PackageRef> {
        self.context.clone()
    }

    fn direct_dependencies(&self, package: &PackageRef) -> Vec<PackageRef> {
        self.by_ref
            .get(package)
            .map(|&i| self.packages[i].dependencies.clone())
            .unwrap_or_default()
    }

    fn package_manifest(&self, package: &PackageRef) -> Option<PackageManifest> {
        self.by_ref
            .get(package)
            .map(|&i| self.packages[i].manifest.clone())
    }

    fn cache_path(&self) -> PathBuf {
        self.cache_path.clone()
    }
}

/// Resolve an unpinned or wildcard reference against the installed versions.
async fn resolve_reference(
    cache_path: &Path,
    reference: &PackageRef,
) -> PackageResult<PackageRef> {
    if !reference.is_latest() {
        let exact = cache_path.join(reference.dir_name());
        if fs::metadata(&exact).await.is_ok() {
            return Ok(reference.clone());
        }
    }

    let mut versions = installed_versions(cache_path, &reference.id).await?;
    versions.retain(|v| reference.is_latest() || version_matches(v, &reference.version));
    versions.sort_by(|a, b| compare_versions(a, b));

    match versions.last() {
        Some(version) => Ok(PackageRef::new(reference.id.clone(), version.clone())),
        None => Err(PackageError::PackageNotInstalled(reference.to_string())),
    }
}

async fn installed_versions(cache_path: &Path, id: &str) -> PackageResult<Vec<String>> {
    let mut versions = Vec::new();
    let mut entries = match fs::read_dir(cache_path).await {
        Ok(entries) => entries,
        Err(_) => return Ok(versions),
    };
    while let Some(entry) = entries.next_entry().await? {
        let dir_name = entry.file_name().to_string_lossy().into_owned();
        if let Some((dir_id, version)) = dir_name.split_once('#') {
            if dir_id == id {
                versions.push(version.to_string());
            }
        }
    }
    Ok(versions)
}

async fn load_package(cache_path: &Path, reference: &PackageRef) -> PackageResult<LoadedPackage> {
    let package_dir = cache_path.join(reference.dir_name()).join("package");
    let manifest_path = package_dir.join("package.json");
    let manifest_bytes = fs::read(&manifest_path)
        .await
        .map_err(|_| PackageError::PackageNotInstalled(reference.to_string()))?;
    let manifest: PackageManifest = serde_json::from_str(&clean_json_bytes(&manifest_bytes)?)?;

    let mut dependencies = Vec::new();
    for (dep_id, dep_version) in &manifest.dependencies {
        let dep_ref = PackageRef::new(dep_id.clone(), dep_version.clone());
        match resolve_reference(cache_path, &dep_ref).await {
            Ok(resolved) => dependencies.push(resolved),
            Err(_) => {
                warn!(package = %reference, dependency = %dep_ref, "dependency not installed");
            }
        }
    }

    let metas = load_metas(&package_dir, reference).await?;

    Ok(LoadedPackage {
        reference: reference.clone(),
        manifest,
        dependencies,
        metas,
    })
}

/// Build resource metadata, preferring `.index.json` when present so only
/// StructureDefinitions (whose derivation the engine dispatches on) need a
/// full read.
async fn load_metas(package_dir: &Path, reference: &PackageRef) -> PackageResult<Vec<ResourceMeta>> {
    if let Ok(bytes) = fs::read(package_dir.join(".index.json")).await {
        if let Ok(index) = serde_json::from_str::<PackageIndex>(&clean_json_bytes(&bytes)?) {
            return metas_from_index(package_dir, reference, index).await;
        }
    }
    metas_from_scan(package_dir, reference).await
}

async fn metas_from_index(
    package_dir: &Path,
    reference: &PackageRef,
    index: PackageIndex,
) -> PackageResult<Vec<ResourceMeta>> {
    let mut metas = Vec::with_capacity(index.files.len());
    for file in index.files {
        let derivation = if file.resource_type == "StructureDefinition" {
            read_field(&package_dir.join(&file.filename), "derivation").await
        } else {
            None
        };
        metas.push(ResourceMeta {
            filename: file.filename,
            resource_type: file.resource_type,
            id: file.id,
            url: file.url,
            name: file.name,
            version: file.version,
            kind: file.kind,
            type_name: file.r#type,
            derivation,
            package: reference.clone(),
        });
    }
    Ok(metas)
}

async fn metas_from_scan(
    package_dir: &Path,
    reference: &PackageRef,
) -> PackageResult<Vec<ResourceMeta>> {
    let mut metas = Vec::new();
    let mut entries = fs::read_dir(package_dir)
        .await
        .map_err(|_| PackageError::PackageNotInstalled(reference.to_string()))?;

    let mut filenames = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let filename = entry.file_name().to_string_lossy().into_owned();
        if filename.ends_with(".json") && filename != "package.json" && filename != ".index.json" {
            filenames.push(filename);
        }
    }
    filenames.sort();

    for filename in filenames {
        let bytes = fs::read(package_dir.join(&filename)).await?;
        let Ok(value) = serde_json::from_str::<Value>(&clean_json_bytes(&bytes)?) else {
            continue;
        };
        let Some(resource_type) = value.get("resourceType").and_then(Value::as_str) else {
            continue;
        };
        metas.push(ResourceMeta {
            filename,
            resource_type: resource_type.to_string(),
            id: str_field(&value, "id"),
            url: str_field(&value, "url"),
            name: str_field(&value, "name"),
            version: str_field(&value, "version"),
            kind: str_field(&value, "kind"),
            type_name: str_field(&value, "type"),
            derivation: str_field(&value, "derivation"),
            package: reference.clone(),
        });
    }
    Ok(metas)
}

async fn read_field(path: &Path, field: &str) -> Option<String> {
    let bytes = fs::read(path).await.ok()?;
    let value: Value = serde_json::from_str(&clean_json_bytes(&bytes).ok()?).ok()?;
    str_field(&value, field)
}

fn str_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}
