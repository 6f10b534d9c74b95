//! Plugin discovery and catalog
//!
//! The registry scans one or more plugin directories for packages (a
//! subdirectory with a `plugin.json` descriptor) and maintains the catalog.
//! A broken package never aborts discovery and never disappears: it is
//! cataloged as unavailable with the failure reason attached. Identifier
//! collisions across locations resolve to the first package discovered, in
//! the configured directory order.

use crate::core::error::{NetProbeError, Result};
use crate::plugin::descriptor::{CatalogEntry, PluginDescriptor, PluginId};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const DESCRIPTOR_FILE: &str = "plugin.json";
const STATE_FILE: &str = "plugin_state.json";

/// Discovers plugin packages and serves the catalog.
pub struct PluginRegistry {
    locations: Vec<PathBuf>,
    /// Persisted enabled/disabled overrides, keyed by identifier.
    state_path: PathBuf,
    catalog: RwLock<BTreeMap<PluginId, CatalogEntry>>,
}

impl PluginRegistry {
    /// `locations` are scanned in order; `data_dir` holds the enabled-state
    /// overlay file.
    pub fn new(locations: Vec<PathBuf>, data_dir: &Path) -> Self {
        Self {
            locations,
            state_path: data_dir.join(STATE_FILE),
            catalog: RwLock::new(BTreeMap::new()),
        }
    }

    /// Rescan all configured locations and rebuild the catalog.
    ///
    /// Returns the number of available plugins. Unreadable locations and
    /// broken packages are logged and recorded, never fatal.
    pub async fn scan(&self) -> Result<usize> {
        let overrides = self.load_state_overlay().await;
        let mut catalog = BTreeMap::new();

        for location in &self.locations {
            let mut dir = match tokio::fs::read_dir(location).await {
                Ok(dir) => dir,
                Err(e) => {
                    warn!(location = %location.display(), error = %e, "skipping unreadable plugin directory");
                    continue;
                }
            };
            let mut packages = Vec::new();
            while let Some(entry) = dir.next_entry().await.map_err(|e| {
                NetProbeError::DiscoveryError(format!(
                    "error listing {}: {}",
                    location.display(),
                    e
                ))
            })? {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                if !path.is_dir() || name.starts_with('.') || name.starts_with('_') {
                    continue;
                }
                packages.push((name, path));
            }
            // deterministic order within a location
            packages.sort();

            for (dir_name, package_dir) in packages {
                let entry = self.catalog_package(&dir_name, &package_dir, &overrides);
                match catalog.entry(entry.identifier.clone()) {
                    std::collections::btree_map::Entry::Vacant(slot) => {
                        slot.insert(entry);
                    }
                    std::collections::btree_map::Entry::Occupied(existing) => {
                        warn!(
                            plugin = %entry.identifier,
                            kept = %existing.get().package_dir.display(),
                            ignored = %package_dir.display(),
                            "duplicate plugin identifier, keeping first discovered"
                        );
                    }
                }
            }
        }

        let available = catalog.values().filter(|e| e.available).count();
        info!(
            total = catalog.len(),
            available,
            "plugin scan complete"
        );
        *self.catalog.write().await = catalog;
        Ok(available)
    }

    fn catalog_package(
        &self,
        dir_name: &str,
        package_dir: &Path,
        overrides: &HashMap<String, bool>,
    ) -> CatalogEntry {
        let descriptor_path = package_dir.join(DESCRIPTOR_FILE);
        let fallback_id = dir_name.to_ascii_lowercase();

        if !descriptor_path.is_file() {
            debug!(package = %package_dir.display(), "package has no descriptor");
            return CatalogEntry {
                identifier: fallback_id,
                package_dir: package_dir.to_path_buf(),
                available: false,
                enabled: false,
                error: Some(format!("missing {}", DESCRIPTOR_FILE)),
                descriptor: None,
            };
        }

        match PluginDescriptor::from_file(&descriptor_path) {
            Ok(descriptor) => {
                let enabled = overrides
                    .get(&descriptor.name)
                    .copied()
                    .unwrap_or(true);
                CatalogEntry {
                    identifier: descriptor.name.clone(),
                    package_dir: package_dir.to_path_buf(),
                    available: true,
                    enabled,
                    error: None,
                    descriptor: Some(descriptor),
                }
            }
            Err(e) => {
                warn!(package = %package_dir.display(), error = %e, "invalid plugin package");
                CatalogEntry {
                    identifier: fallback_id,
                    package_dir: package_dir.to_path_buf(),
                    available: false,
                    enabled: false,
                    error: Some(e.to_string()),
                    descriptor: None,
                }
            }
        }
    }

    /// Descriptor of an available plugin.
    pub async fn get(&self, identifier: &str) -> Result<PluginDescriptor> {
        let catalog = self.catalog.read().await;
        match catalog.get(identifier) {
            Some(entry) => match (&entry.descriptor, &entry.error) {
                (Some(descriptor), _) => Ok(descriptor.clone()),
                (None, reason) => Err(NetProbeError::PluginUnavailable(format!(
                    "{}: {}",
                    identifier,
                    reason.as_deref().unwrap_or("unknown")
                ))),
            },
            None => Err(NetProbeError::PluginNotFound(identifier.to_string())),
        }
    }

    /// Full catalog row, including unavailable packages.
    pub async fn entry(&self, identifier: &str) -> Option<CatalogEntry> {
        self.catalog.read().await.get(identifier).cloned()
    }

    /// All catalog entries, sorted by identifier.
    pub async fn list(&self) -> Vec<CatalogEntry> {
        self.catalog.read().await.values().cloned().collect()
    }

    pub async fn contains(&self, identifier: &str) -> bool {
        self.catalog.read().await.contains_key(identifier)
    }

    pub async fn is_enabled(&self, identifier: &str) -> bool {
        self.catalog
            .read()
            .await
            .get(identifier)
            .map(|e| e.enabled)
            .unwrap_or(false)
    }

    /// Flip the enabled flag and persist it across rescans and restarts.
    ///
    /// Disabling does not touch a run already in flight; the engine simply
    /// refuses to start new ones.
    pub async fn set_enabled(&self, identifier: &str, enabled: bool) -> Result<()> {
        {
            let mut catalog = self.catalog.write().await;
            let entry = catalog
                .get_mut(identifier)
                .ok_or_else(|| NetProbeError::PluginNotFound(identifier.to_string()))?;
            if !entry.available {
                return Err(NetProbeError::PluginUnavailable(format!(
                    "{}: {}",
                    identifier,
                    entry.error.as_deref().unwrap_or("unknown")
                )));
            }
            entry.enabled = enabled;
        }
        let mut overrides = self.load_state_overlay().await;
        overrides.insert(identifier.to_string(), enabled);
        self.save_state_overlay(&overrides).await?;
        info!(plugin = %identifier, enabled, "plugin enabled state changed");
        Ok(())
    }

    /// Mark a cataloged plugin unavailable after a load failure, keeping the
    /// reason so callers can see it.
    pub async fn mark_unavailable(&self, identifier: &str, reason: &str) {
        let mut catalog = self.catalog.write().await;
        if let Some(entry) = catalog.get_mut(identifier) {
            entry.available = false;
            entry.error = Some(reason.to_string());
        }
    }

    async fn load_state_overlay(&self) -> HashMap<String, bool> {
        match tokio::fs::read_to_string(&self.state_path).await {
            Ok(raw) => match serde_json::from_str::<HashMap<String, Value>>(&raw) {
                Ok(map) => map
                    .into_iter()
                    .filter_map(|(k, v)| v.as_bool().map(|b| (k, b)))
                    .collect(),
                Err(e) => {
                    warn!(path = %self.state_path.display(), error = %e, "ignoring corrupt plugin state file");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        }
    }

    async fn save_state_overlay(&self, overrides: &HashMap<String, bool>) -> Result<()> {
        if let Some(parent) = self.state_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(overrides)
            .map_err(|e| NetProbeError::SerializationError(e.to_string()))?;
        tokio::fs::write(&self.state_path, raw).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_package(root: &Path, dir: &str, descriptor: Option<Value>) {
        let package = root.join(dir);
        std::fs::create_dir_all(&package).unwrap();
        if let Some(doc) = descriptor {
            std::fs::write(
                package.join(DESCRIPTOR_FILE),
                serde_json::to_string_pretty(&doc).unwrap(),
            )
            .unwrap();
        }
    }

    fn descriptor(name: &str) -> Value {
        json!({
            "name": name,
            "version": "1.0.0",
            "description": "a diagnostic",
            "author": "tests",
        })
    }

    fn registry(plugins: &TempDir, data: &TempDir) -> PluginRegistry {
        PluginRegistry::new(vec![plugins.path().to_path_buf()], data.path())
    }

    #[tokio::test]
    async fn scan_catalogs_valid_and_broken_packages() {
        let plugins = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        write_package(plugins.path(), "ping", Some(descriptor("ping")));
        write_package(plugins.path(), "broken", None);
        std::fs::create_dir_all(plugins.path().join("mangled")).unwrap();
        std::fs::write(
            plugins.path().join("mangled").join(DESCRIPTOR_FILE),
            "not json {",
        )
        .unwrap();
        write_package(plugins.path(), "_template", Some(descriptor("template")));

        let registry = registry(&plugins, &data);
        let available = registry.scan().await.unwrap();
        assert_eq!(available, 1);

        let entries = registry.list().await;
        // underscore-prefixed skipped entirely
        assert_eq!(entries.len(), 3);

        let ping = registry.entry("ping").await.unwrap();
        assert!(ping.available && ping.enabled);

        let broken = registry.entry("broken").await.unwrap();
        assert!(!broken.available);
        assert!(broken.error.as_deref().unwrap().contains("plugin.json"));

        let mangled = registry.entry("mangled").await.unwrap();
        assert!(!mangled.available);
        assert!(mangled.error.is_some());
    }

    #[tokio::test]
    async fn list_is_sorted_by_identifier() {
        let plugins = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        for name in ["zeta", "alpha", "mid"] {
            write_package(plugins.path(), name, Some(descriptor(name)));
        }
        let registry = registry(&plugins, &data);
        registry.scan().await.unwrap();
        let ids: Vec<_> = registry
            .list()
            .await
            .into_iter()
            .map(|e| e.identifier)
            .collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn duplicate_identifiers_keep_first_location() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        write_package(first.path(), "ping", Some(descriptor("ping")));
        write_package(second.path(), "ping_alt", Some(descriptor("ping")));

        let registry = PluginRegistry::new(
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
            data.path(),
        );
        registry.scan().await.unwrap();
        let entry = registry.entry("ping").await.unwrap();
        assert!(entry.package_dir.starts_with(first.path()));
    }

    #[tokio::test]
    async fn set_enabled_survives_rescan() {
        let plugins = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        write_package(plugins.path(), "ping", Some(descriptor("ping")));
        let registry = registry(&plugins, &data);
        registry.scan().await.unwrap();

        registry.set_enabled("ping", false).await.unwrap();
        assert!(!registry.is_enabled("ping").await);

        registry.scan().await.unwrap();
        assert!(!registry.is_enabled("ping").await);

        registry.set_enabled("ping", true).await.unwrap();
        registry.scan().await.unwrap();
        assert!(registry.is_enabled("ping").await);
    }

    #[tokio::test]
    async fn set_enabled_rejects_unknown_and_unavailable() {
        let plugins = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        write_package(plugins.path(), "broken", None);
        let registry = registry(&plugins, &data);
        registry.scan().await.unwrap();

        assert!(matches!(
            registry.set_enabled("ghost", true).await,
            Err(NetProbeError::PluginNotFound(_))
        ));
        assert!(matches!(
            registry.set_enabled("broken", true).await,
            Err(NetProbeError::PluginUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn get_distinguishes_missing_from_unavailable() {
        let plugins = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        write_package(plugins.path(), "broken", None);
        let registry = registry(&plugins, &data);
        registry.scan().await.unwrap();

        assert!(matches!(
            registry.get("ghost").await,
            Err(NetProbeError::PluginNotFound(_))
        ));
        assert!(matches!(
            registry.get("broken").await,
            Err(NetProbeError::PluginUnavailable(_))
        ));
    }
}
