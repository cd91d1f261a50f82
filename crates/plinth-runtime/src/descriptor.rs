//! Plugin descriptor discovery from manifest files
//!
//! Each plugin directory carries a manifest (`plugin.toml`, `plugin.yaml`,
//! `plugin.yml` or `plugin.json` by default):
//!
//! ```toml
//! id = "audit"
//! version = "0.2.0"
//! plugin_class = "audit::AuditPlugin"
//! requires = ">=0.1"
//! dependencies = ["hello@^0.1", "metrics?"]
//! ```
//!
//! Dependencies are written compactly (`id`, `id@req`, `id?`) or as tables
//! `{ id = "hello", version = "^0.1", optional = false }`.

use crate::config::load_from_file;
use crate::error::{Result, RuntimeError};
use plinth_api::{PluginDependency, PluginDescriptor};
use semver::{Version, VersionReq};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Finds the descriptor of a plugin stored at a path
pub trait DescriptorFinder: Send + Sync + fmt::Debug {
    /// Whether this finder can read a descriptor at `path`
    fn is_applicable(&self, path: &Path) -> bool;

    /// Read and validate the descriptor at `path`
    fn find(&self, path: &Path) -> Result<PluginDescriptor>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DependencyEntry {
    Compact(String),
    Table {
        id: String,
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        optional: bool,
    },
}

#[derive(Debug, Deserialize)]
struct Manifest {
    id: String,
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    requires: Option<String>,
    plugin_class: String,
    #[serde(default)]
    dependencies: Vec<DependencyEntry>,
}

/// Reads the first manifest found in a plugin directory
#[derive(Debug, Clone)]
pub struct ManifestDescriptorFinder {
    manifest_names: Vec<String>,
}

impl ManifestDescriptorFinder {
    /// Create a finder searching the given manifest names, in order
    pub fn new(manifest_names: Vec<String>) -> Self {
        Self { manifest_names }
    }

    /// First manifest present in `dir`
    pub fn manifest_path(&self, dir: &Path) -> Option<PathBuf> {
        self.manifest_names
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    fn convert(manifest: Manifest, dir: &Path, manifest_path: &Path) -> Result<PluginDescriptor> {
        let invalid = |message: String| RuntimeError::invalid_manifest(manifest_path.display(), message);

        if manifest.id.trim().is_empty() {
            return Err(invalid("id must not be empty".into()));
        }
        if manifest.plugin_class.trim().is_empty() {
            return Err(invalid("plugin_class must not be empty".into()));
        }
        Version::parse(&manifest.version)
            .map_err(|e| invalid(format!("invalid version '{}': {e}", manifest.version)))?;
        if let Some(requires) = &manifest.requires {
            VersionReq::parse(requires)
                .map_err(|e| invalid(format!("invalid requires '{requires}': {e}")))?;
        }

        let mut dependencies = Vec::with_capacity(manifest.dependencies.len());
        for entry in manifest.dependencies {
            let dependency = match entry {
                DependencyEntry::Compact(spec) => {
                    PluginDependency::parse(&spec).map_err(|e| invalid(e.to_string()))?
                }
                DependencyEntry::Table {
                    id,
                    version,
                    optional,
                } => {
                    if let Some(req) = &version {
                        VersionReq::parse(req).map_err(|e| {
                            invalid(format!("invalid version requirement '{req}' for '{id}': {e}"))
                        })?;
                    }
                    PluginDependency {
                        plugin_id: id,
                        version_req: version,
                        optional,
                    }
                }
            };
            if dependency.plugin_id == manifest.id {
                return Err(invalid(format!("plugin '{}' depends on itself", manifest.id)));
            }
            dependencies.push(dependency);
        }

        Ok(PluginDescriptor {
            id: manifest.id,
            version: manifest.version,
            description: manifest.description,
            provider: manifest.provider,
            license: manifest.license,
            requires: manifest.requires,
            plugin_class: manifest.plugin_class,
            dependencies,
            path: dir.to_path_buf(),
        })
    }
}

impl Default for ManifestDescriptorFinder {
    fn default() -> Self {
        Self::new(crate::config::RuntimeConfig::default().manifest_names)
    }
}

impl DescriptorFinder for ManifestDescriptorFinder {
    fn is_applicable(&self, path: &Path) -> bool {
        path.is_dir() && self.manifest_path(path).is_some()
    }

    fn find(&self, path: &Path) -> Result<PluginDescriptor> {
        let manifest_path = self.manifest_path(path).ok_or_else(|| {
            RuntimeError::invalid_manifest(path.display(), "no plugin manifest found")
        })?;

        let manifest: Manifest = load_from_file(&manifest_path)
            .map_err(|e| RuntimeError::invalid_manifest(manifest_path.display(), e))?;
        Self::convert(manifest, path, &manifest_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_find_toml_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "plugin.toml",
            r#"
id = "audit"
version = "0.2.0"
description = "Audit trail"
plugin_class = "audit::AuditPlugin"
requires = ">=0.1"
dependencies = ["hello@^0.1", "metrics?", { id = "store", version = "1", optional = true }]
"#,
        );

        let finder = ManifestDescriptorFinder::default();
        assert!(finder.is_applicable(dir.path()));

        let descriptor = finder.find(dir.path()).unwrap();
        assert_eq!(descriptor.id, "audit");
        assert_eq!(descriptor.path, dir.path());
        assert_eq!(descriptor.dependencies.len(), 3);
        assert_eq!(descriptor.dependencies[0].version_req.as_deref(), Some("^0.1"));
        assert!(descriptor.dependencies[1].optional);
        assert!(descriptor.dependencies[2].optional);
        assert_eq!(descriptor.required_dependencies().count(), 1);
    }

    #[test]
    fn test_find_yaml_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "plugin.yaml",
            "id: hello\nversion: 0.1.0\nplugin_class: hello::HelloPlugin\n",
        );

        let descriptor = ManifestDescriptorFinder::default().find(dir.path()).unwrap();
        assert_eq!(descriptor.id, "hello");
        assert!(descriptor.dependencies.is_empty());
    }

    #[test]
    fn test_manifest_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "plugin.json", r#"{"id":"json","version":"1.0.0","plugin_class":"j"}"#);
        write(dir.path(), "plugin.toml", "id = \"toml\"\nversion = \"1.0.0\"\nplugin_class = \"t\"\n");

        let descriptor = ManifestDescriptorFinder::default().find(dir.path()).unwrap();
        assert_eq!(descriptor.id, "toml");
    }

    #[test]
    fn test_invalid_manifests() {
        let finder = ManifestDescriptorFinder::default();

        let dir = tempfile::tempdir().unwrap();
        assert!(!finder.is_applicable(dir.path()));
        assert!(finder.find(dir.path()).is_err());

        write(dir.path(), "plugin.toml", "id = \"x\"\nversion = \"one\"\nplugin_class = \"x\"\n");
        assert!(matches!(
            finder.find(dir.path()),
            Err(RuntimeError::InvalidManifest { .. })
        ));

        write(
            dir.path(),
            "plugin.toml",
            "id = \"x\"\nversion = \"1.0.0\"\nplugin_class = \"x\"\ndependencies = [\"x\"]\n",
        );
        assert!(finder.find(dir.path()).is_err());
    }
}
