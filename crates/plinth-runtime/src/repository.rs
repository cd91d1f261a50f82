//! Plugin repositories: where plugin artifacts live

use crate::error::Result;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Source of plugin paths
pub trait PluginRepository: Send + Sync + fmt::Debug {
    /// Every candidate plugin path
    fn plugin_paths(&self) -> Result<Vec<PathBuf>>;
}

/// Repository treating each sub-directory of a root as one plugin
#[derive(Debug, Clone)]
pub struct DirectoryRepository {
    root: PathBuf,
}

impl DirectoryRepository {
    /// Create a repository over `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Repository root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Plugin directory that contains `path`, if any
    pub fn owning_plugin_path(&self, path: &Path) -> Option<PathBuf> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let first = relative.components().next()?;
        Some(self.root.join(first.as_os_str()))
    }
}

impl PluginRepository for DirectoryRepository {
    fn plugin_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            warn!(root = %self.root.display(), "Plugins root does not exist");
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(true, |n| n.starts_with('.'));
            if path.is_dir() && !hidden {
                paths.push(path);
            }
        }
        paths.sort();

        debug!(root = %self.root.display(), count = paths.len(), "Listed plugin directories");
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_directories_only() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("b")).unwrap();
        fs::create_dir(root.path().join("a")).unwrap();
        fs::create_dir(root.path().join(".cache")).unwrap();
        fs::write(root.path().join("README.md"), "docs").unwrap();

        let repository = DirectoryRepository::new(root.path());
        let names: Vec<_> = repository
            .plugin_paths()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let repository = DirectoryRepository::new("/definitely/not/here");
        assert!(repository.plugin_paths().unwrap().is_empty());
    }

    #[test]
    fn test_owning_plugin_path() {
        let repository = DirectoryRepository::new("/srv/plugins");
        assert_eq!(
            repository.owning_plugin_path(Path::new("/srv/plugins/hello/static/index.html")),
            Some(PathBuf::from("/srv/plugins/hello"))
        );
        assert_eq!(repository.owning_plugin_path(Path::new("/etc/hosts")), None);
        assert_eq!(repository.owning_plugin_path(Path::new("/srv/plugins")), None);
    }
}
