//! Snapshot engine orchestration
//!
//! Answers `get_snapshot(identifier)` by resolving metadata through the
//! package explorer and dispatching on derivation: base types return their
//! stored snapshot, profiles go through the cache-gated generation path.
//! Generation may re-enter the orchestrator for parent and referenced
//! profiles; a per-chain ancestry list turns cyclic references into errors
//! instead of deadlocks.

use crate::core_package::{normalize_core_package, CorePackageResolver};
use crate::error::{Error, Result};
use crate::fetcher::{DefinitionFetcher, SnapshotFetchFn};
use crate::generator::generate_profile_snapshot;
use crate::logging::{Logger, TracingLogger};
use crate::paths::first_segment;
use crate::release::FhirRelease;
use anvil_cache::{CacheMode, SnapshotCache};
use anvil_models::{CorePackage, Snapshot, StructureDefinition, DERIVATION_CONSTRAINT};
use anvil_package::{
    DirectoryExplorer, MetaFilter, MetaKey, PackageExplorer, PackageRef, ResourceMeta,
};
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;

/// Engine configuration.
pub struct EngineConfig {
    /// Packages whose profiles the engine serves, with their dependencies.
    pub context: Vec<PackageRef>,
    /// Root of the package cache.
    pub cache_path: PathBuf,
    /// FHIR version identifier; decides the default base library.
    pub fhir_version: String,
    pub cache_mode: CacheMode,
    /// Optional custom logger; defaults to `tracing`.
    pub logger: Option<Arc<dyn Logger>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context: Vec::new(),
            cache_path: default_cache_path(),
            fhir_version: "4.0.1".to_string(),
            cache_mode: CacheMode::Lazy,
            logger: None,
        }
    }
}

fn default_cache_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".fhir").join("packages"),
        None => PathBuf::from(".fhir/packages"),
    }
}

pub struct SnapshotEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    explorer: Arc<dyn PackageExplorer>,
    cache: SnapshotCache,
    release: FhirRelease,
    core_resolver: CorePackageResolver,
    logger: Arc<dyn Logger>,
}

impl SnapshotEngine {
    /// Create an engine over the on-disk package cache named by the config.
    /// In `ensure`/`rebuild` modes this pre-caches every context profile.
    pub async fn create(config: EngineConfig) -> Result<Self> {
        FhirRelease::parse(&config.fhir_version)?;
        let explorer: Arc<dyn PackageExplorer> =
            Arc::new(DirectoryExplorer::load(&config.cache_path, &config.context).await?);
        Self::create_with_explorer(config, explorer).await
    }

    /// Create an engine over a caller-supplied package explorer.
    pub async fn create_with_explorer(
        config: EngineConfig,
        explorer: Arc<dyn PackageExplorer>,
    ) -> Result<Self> {
        let release = FhirRelease::parse(&config.fhir_version)?;
        let logger: Arc<dyn Logger> = config.logger.unwrap_or_else(|| Arc::new(TracingLogger));
        let cache = SnapshotCache::new(explorer.cache_path(), config.cache_mode);
        let core_resolver = CorePackageResolver::new(release, Arc::clone(&explorer));

        let inner = Arc::new(EngineInner {
            explorer,
            cache,
            release,
            core_resolver,
            logger,
        });
        run_precache(&inner).await?;
        Ok(Self { inner })
    }

    /// Resolve an identifier (canonical URL, id, or name) to its full
    /// snapshot. `package_filter` restricts resolution to one package.
    pub async fn get_snapshot(
        &self,
        identifier: &str,
        package_filter: Option<&str>,
    ) -> Result<StructureDefinition> {
        get_snapshot_task(
            Arc::clone(&self.inner),
            identifier.to_string(),
            package_filter.map(str::to_string),
            Vec::new(),
        )
        .await
        .map_err(|e| self.inner.prethrow(identifier, e))
    }

    /// The release the engine was configured with.
    pub fn release(&self) -> FhirRelease {
        self.inner.release
    }
}

/// Boxed entry point so generation can re-enter the orchestrator.
fn get_snapshot_task(
    inner: Arc<EngineInner>,
    identifier: String,
    package_filter: Option<String>,
    ancestry: Vec<String>,
) -> BoxFuture<'static, Result<StructureDefinition>> {
    Box::pin(async move {
        if identifier.starts_with('#') {
            return base_type_subtree(&inner, &identifier, ancestry).await;
        }

        let meta = inner
            .resolve_identifier(&identifier, package_filter.as_deref())
            .await?;

        if meta.derivation.as_deref() == Some(DERIVATION_CONSTRAINT) {
            profile_snapshot(&inner, meta, ancestry).await
        } else {
            inner.stored_snapshot(&identifier, &meta).await
        }
    })
}

/// Cache-gated snapshot of one profile.
async fn profile_snapshot(
    inner: &Arc<EngineInner>,
    meta: ResourceMeta,
    ancestry: Vec<String>,
) -> Result<StructureDefinition> {
    let raw = inner
        .explorer
        .resolve_by_filename(&meta.package, &meta.filename)
        .await?;
    let profile = StructureDefinition::from_value(raw)?;
    let url = profile
        .url
        .clone()
        .or_else(|| meta.url.clone())
        .unwrap_or_else(|| meta.filename.clone());

    if ancestry.contains(&url) {
        return Err(Error::Cycle { url });
    }

    let package = meta.package.clone();
    let filename = meta.filename.clone();
    let value = inner
        .cache
        .get_or_generate::<_, _, Error>(&package, &filename, || {
            generate_or_fallback(Arc::clone(inner), profile, meta, url, ancestry)
        })
        .await?;
    Ok(StructureDefinition::from_value(value)?)
}

/// Run the generator; on failure fall back to the profile's stored snapshot
/// when it has one.
async fn generate_or_fallback(
    inner: Arc<EngineInner>,
    profile: StructureDefinition,
    meta: ResourceMeta,
    url: String,
    ancestry: Vec<String>,
) -> Result<serde_json::Value> {
    let core = inner
        .core_resolver
        .resolve(&meta.package, inner.logger.as_ref());

    let mut chain = ancestry;
    chain.push(url.clone());

    let fetcher = DefinitionFetcher::new(
        meta.package.clone(),
        core.clone(),
        Arc::clone(&inner.explorer),
        snapshot_fetch_fn(&inner, chain),
    );

    let result = generate_profile_snapshot(&profile, &fetcher, inner.logger.as_ref()).await;
    let generated = match result {
        Ok(sd) => sd,
        Err(e) if profile.snapshot.is_some() => {
            inner.logger.warn(&format!(
                "snapshot generation for {} ({}) failed with {}: {}; falling back to the stored snapshot",
                url,
                meta.package,
                e.kind(),
                e
            ));
            let mut sd = profile;
            sd.core_package = Some(CorePackage {
                id: core.id.clone(),
                version: core.version.clone(),
            });
            sd
        }
        Err(e) => return Err(e),
    };

    Ok(serde_json::to_value(generated)?)
}

/// The re-entrant snapshot fetcher handed to the definition fetcher: resolves
/// any canonical URL to expanded elements via the orchestrator, carrying the
/// generation ancestry for cycle detection.
fn snapshot_fetch_fn(inner: &Arc<EngineInner>, ancestry: Vec<String>) -> SnapshotFetchFn {
    let inner = Arc::clone(inner);
    Arc::new(
        move |target: String| -> BoxFuture<'static, Result<Vec<anvil_models::Element>>> {
            let inner = Arc::clone(&inner);
            let ancestry = ancestry.clone();
            Box::pin(async move {
                let sd = get_snapshot_task(inner, target.clone(), None, ancestry).await?;
                let snapshot = sd
                    .snapshot
                    .ok_or_else(|| Error::NoSnapshot { what: target })?;
                Ok(snapshot.element)
            })
        },
    )
}

/// Historical `#`-prefixed identifiers select a sub-tree of a base type.
async fn base_type_subtree(
    inner: &Arc<EngineInner>,
    reference: &str,
    ancestry: Vec<String>,
) -> Result<StructureDefinition> {
    let core = normalize_core_package(inner.release.core_package());
    let fetcher = DefinitionFetcher::new(
        core.clone(),
        core.clone(),
        Arc::clone(&inner.explorer),
        snapshot_fetch_fn(inner, ancestry),
    );

    let elements = fetcher.get_content_reference(reference).await?;
    let type_name = first_segment(&reference[1..]);
    let meta = fetcher.resolve_base_type_meta(type_name).await?;
    let raw = inner
        .explorer
        .resolve_by_filename(&meta.package, &meta.filename)
        .await?;

    let mut sd = StructureDefinition::from_value(raw)?;
    sd.snapshot = Some(Snapshot::new((*elements).clone()));
    sd.core_package = Some(CorePackage {
        id: core.id,
        version: core.version,
    });
    Ok(sd)
}

/// Batch pre-caching for `ensure`/`rebuild`. Failures are collected per file
/// and logged once at the end; the batch never aborts early.
async fn run_precache(inner: &Arc<EngineInner>) -> Result<()> {
    let mode = inner.cache.mode();
    if !mode.precaches() {
        return Ok(());
    }

    let context = inner.explorer.context_packages();
    if mode == CacheMode::Rebuild {
        for package in &context {
            inner.cache.clear_package(package).await?;
        }
    }

    let mut failures = Vec::new();
    for package in &context {
        let filter = MetaFilter {
            resource_type: Some("StructureDefinition".to_string()),
            derivation: Some(DERIVATION_CONSTRAINT.to_string()),
            package: Some(package.clone()),
        };
        for meta in inner.explorer.lookup_meta(&filter).await? {
            let filename = meta.filename.clone();
            if let Err(e) = profile_snapshot(inner, meta, Vec::new()).await {
                failures.push(format!("{} in {}: {}", filename, package, e));
            }
        }
    }

    if !failures.is_empty() {
        inner.logger.error(&format!(
            "snapshot pre-caching failed for {} file(s):\n{}",
            failures.len(),
            failures.join("\n")
        ));
    }
    Ok(())
}

impl EngineInner {
    /// Identifier fan-out: canonical URL (when the identifier can be one),
    /// then id, then name. Attempt errors accumulate into the final
    /// `not-found`.
    async fn resolve_identifier(
        &self,
        identifier: &str,
        package_filter: Option<&str>,
    ) -> Result<ResourceMeta> {
        let mut attempts = Vec::new();

        if identifier.contains(':') {
            match self
                .explorer
                .resolve_meta(
                    "StructureDefinition",
                    &MetaKey::Url(identifier.to_string()),
                    package_filter,
                )
                .await
            {
                Ok(meta) => return Ok(meta),
                Err(e) => attempts.push(format!("as url: {}", e)),
            }
        }

        for key in [
            MetaKey::Id(identifier.to_string()),
            MetaKey::Name(identifier.to_string()),
        ] {
            let label = match &key {
                MetaKey::Id(_) => "as id",
                _ => "as name",
            };
            match self
                .explorer
                .resolve_meta("StructureDefinition", &key, package_filter)
                .await
            {
                Ok(meta) => return Ok(meta),
                Err(e) => attempts.push(format!("{}: {}", label, e)),
            }
        }

        for attempt in &attempts {
            self.logger.warn(&format!("resolving '{}' {}", identifier, attempt));
        }
        Err(Error::NotFound {
            identifier: identifier.to_string(),
            attempts: attempts.join("; "),
        })
    }

    /// Base types and other specializations: the stored snapshot is
    /// authoritative and returned verbatim, annotated with the core package.
    async fn stored_snapshot(
        &self,
        identifier: &str,
        meta: &ResourceMeta,
    ) -> Result<StructureDefinition> {
        let raw = self
            .explorer
            .resolve_by_filename(&meta.package, &meta.filename)
            .await?;
        let mut sd = StructureDefinition::from_value(raw)?;
        if sd.snapshot.is_none() {
            return Err(Error::NoSnapshot {
                what: format!("{} ({})", identifier, meta.package),
            });
        }
        let core = self.core_resolver.resolve(&meta.package, self.logger.as_ref());
        sd.core_package = Some(CorePackage {
            id: core.id,
            version: core.version,
        });
        Ok(sd)
    }

    /// Log a caller-visible error exactly once at the boundary.
    fn prethrow(&self, identifier: &str, error: Error) -> Error {
        self.logger.error(&format!(
            "get_snapshot('{}') failed with {}: {}",
            identifier,
            error.kind(),
            error
        ));
        error
    }
}
