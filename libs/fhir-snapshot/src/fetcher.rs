//! Definition fetching with per-generation memoisation
//!
//! One fetcher is constructed per profile generation. It composes three
//! resolution sources: base types from the core library, cross-profile
//! snapshots through an injected fetcher closure (which may re-enter the
//! orchestrator), and content references into base types. Results are
//! memoised under string keys for the lifetime of the generation.

use crate::error::{Error, Result};
use crate::inheritance::migrate_elements;
use crate::normalization::ensure_ids;
use crate::paths::first_segment;
use anvil_models::{Element, StructureDefinition, DERIVATION_CONSTRAINT, DERIVATION_SPECIALIZATION};
use anvil_package::{MetaKey, PackageExplorer, PackageRef, ResourceMeta};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Resolves a canonical URL to fully-expanded snapshot elements, possibly by
/// re-entering the orchestrator.
pub type SnapshotFetchFn =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<Vec<Element>>> + Send + Sync>;

pub struct DefinitionFetcher {
    source_package: PackageRef,
    core_package: PackageRef,
    explorer: Arc<dyn PackageExplorer>,
    fetch_snapshot: SnapshotFetchFn,
    memo: Mutex<HashMap<String, Arc<Vec<Element>>>>,
}

impl DefinitionFetcher {
    pub fn new(
        source_package: PackageRef,
        core_package: PackageRef,
        explorer: Arc<dyn PackageExplorer>,
        fetch_snapshot: SnapshotFetchFn,
    ) -> Self {
        Self {
            source_package,
            core_package,
            explorer,
            fetch_snapshot,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn core_package(&self) -> &PackageRef {
        &self.core_package
    }

    /// Resolve a type by name in the core library. `Element` and `Resource`
    /// accept any derivation; every other type must be a specialization.
    pub async fn get_base_type(&self, type_name: &str) -> Result<Arc<Vec<Element>>> {
        if let Some(hit) = self.memo_get(type_name) {
            return Ok(hit);
        }

        let meta = self.resolve_base_type_meta(type_name).await?;
        if !matches!(type_name, "Element" | "Resource") {
            if let Some(derivation) = meta.derivation.as_deref() {
                if derivation != DERIVATION_SPECIALIZATION {
                    return Err(Error::UnsupportedDerivation {
                        url: type_name.to_string(),
                        derivation: derivation.to_string(),
                    });
                }
            }
        }

        let elements = Arc::new(self.load_snapshot_elements(&meta).await?);
        self.memo_put(type_name.to_string(), Arc::clone(&elements));
        Ok(elements)
    }

    /// Resolve an internal content reference (`#Observation.referenceRange`)
    /// to the referenced sub-sequence of its base type.
    pub async fn get_content_reference(&self, reference: &str) -> Result<Arc<Vec<Element>>> {
        if let Some(hit) = self.memo_get(reference) {
            return Ok(hit);
        }

        let Some(element_id) = reference.strip_prefix('#') else {
            return Err(Error::CannotExpand {
                id: reference.to_string(),
                reason: "content reference must start with '#'".to_string(),
            });
        };

        let base = self.get_base_type(first_segment(element_id)).await?;
        let prefix = format!("{}.", element_id);
        let sub: Vec<Element> = base
            .iter()
            .filter(|e| {
                let id = e.id_or_path();
                id == element_id || id.starts_with(&prefix)
            })
            .cloned()
            .collect();

        if sub.is_empty() {
            return Err(Error::NotFound {
                identifier: reference.to_string(),
                attempts: format!(
                    "no element '{}' in {}",
                    element_id,
                    first_segment(element_id)
                ),
            });
        }

        let sub = Arc::new(sub);
        self.memo_put(reference.to_string(), Arc::clone(&sub));
        Ok(sub)
    }

    /// Resolve a canonical URL, preferring the source package. Specializations
    /// return their stored snapshot; constraints go through the injected
    /// snapshot fetcher. Both are migrated before returning.
    pub async fn get_by_url(&self, url: &str) -> Result<Arc<Vec<Element>>> {
        if let Some(hit) = self.memo_get(url) {
            return Ok(hit);
        }

        let key = MetaKey::Url(url.to_string());
        let source_filter = self.source_package.to_string();
        let meta = match self
            .explorer
            .resolve_meta("StructureDefinition", &key, Some(&source_filter))
            .await
        {
            Ok(meta) => meta,
            Err(_) => {
                self.explorer
                    .resolve_meta("StructureDefinition", &key, None)
                    .await?
            }
        };

        let elements = match meta.derivation.as_deref() {
            None | Some(DERIVATION_SPECIALIZATION) => self.load_snapshot_elements(&meta).await?,
            Some(DERIVATION_CONSTRAINT) => {
                let mut elements = (self.fetch_snapshot)(url.to_string()).await?;
                ensure_ids(&mut elements);
                migrate_elements(&mut elements, url);
                elements
            }
            Some(other) => {
                return Err(Error::UnsupportedDerivation {
                    url: url.to_string(),
                    derivation: other.to_string(),
                })
            }
        };

        let elements = Arc::new(elements);
        self.memo_put(url.to_string(), Arc::clone(&elements));
        Ok(elements)
    }

    /// Metadata of a base type in the core library, resolved by id first and
    /// name second.
    pub async fn resolve_base_type_meta(&self, type_name: &str) -> Result<ResourceMeta> {
        let filter = self.core_package.to_string();
        if let Ok(meta) = self
            .explorer
            .resolve_meta(
                "StructureDefinition",
                &MetaKey::Id(type_name.to_string()),
                Some(&filter),
            )
            .await
        {
            return Ok(meta);
        }
        self.explorer
            .resolve_meta(
                "StructureDefinition",
                &MetaKey::Name(type_name.to_string()),
                Some(&filter),
            )
            .await
            .map_err(|_| Error::NotFound {
                identifier: type_name.to_string(),
                attempts: format!("as id and as name in {}", filter),
            })
    }

    /// Load a resource's stored snapshot, id-normalized and migrated.
    async fn load_snapshot_elements(&self, meta: &ResourceMeta) -> Result<Vec<Element>> {
        let raw = self
            .explorer
            .resolve_by_filename(&meta.package, &meta.filename)
            .await?;
        let sd = StructureDefinition::from_value(raw)?;
        let url = sd
            .url
            .clone()
            .or_else(|| meta.url.clone())
            .unwrap_or_else(|| meta.filename.clone());

        let snapshot = sd.snapshot.ok_or_else(|| Error::NoSnapshot {
            what: format!("{} ({})", url, meta.package),
        })?;

        let mut elements = snapshot.element;
        ensure_ids(&mut elements);
        migrate_elements(&mut elements, &url);
        Ok(elements)
    }

    fn memo_get(&self, key: &str) -> Option<Arc<Vec<Element>>> {
        self.memo.lock().ok().and_then(|memo| memo.get(key).cloned())
    }

    fn memo_put(&self, key: String, value: Arc<Vec<Element>>) {
        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(key, value);
        }
    }
}
