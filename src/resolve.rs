//! Script file resolution.

use std::path::{Path, PathBuf};

/// Turns a logical script name into a loadable path.
pub trait ScriptResolver: Send {
    /// Returns the path to load, or `None` if nothing matched.
    fn resolve(&self, name: &Path) -> Option<PathBuf>;
}

/// Checks the name as given, then `<package_dir>/examples/<name>`.
#[derive(Debug, Clone, Default)]
pub struct PackageResolver {
    package_dir: Option<PathBuf>,
}

impl PackageResolver {
    /// Creates a resolver with an optional package root.
    pub fn new(package_dir: Option<PathBuf>) -> Self {
        Self { package_dir }
    }
}

impl ScriptResolver for PackageResolver {
    fn resolve(&self, name: &Path) -> Option<PathBuf> {
        if name.as_os_str().is_empty() {
            return None;
        }
        if name.exists() {
            log::info!("loading: {}", name.display());
            return Some(name.to_path_buf());
        }
        let candidate = self.package_dir.as_ref()?.join("examples").join(name);
        if candidate.exists() {
            log::info!("loading: {}", candidate.display());
            Some(candidate)
        } else {
            None
        }
    }
}
