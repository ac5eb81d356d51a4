//! Binary resolution
//!
//! A bare command name is looked up, in order, in the explicit override table,
//! the caller-supplied directory, the process `PATH` and finally the fallback
//! directories. A name that cannot be found anywhere is handed back
//! unchanged; failing to run it surfaces later as a spawn error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::{debug, trace, warn};

use stagehand_core::config::DEFAULT_TOOLS_DIR;
use stagehand_core::constants::{ConstantRegistry, BIN_OVERRIDE_PREFIX, TOOLS_CACHE_DIR};

/// Platform-specific file name for an executable (`mc` -> `mc.exe` on Windows)
pub fn executable_name(name: &str) -> String {
    if cfg!(windows) && Path::new(name).extension().is_none() {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

/// Per-user cache directory for downloaded tools, computed once
pub fn default_cache_dir() -> Option<&'static Path> {
    static CACHE_DIR: OnceLock<Option<PathBuf>> = OnceLock::new();
    CACHE_DIR
        .get_or_init(|| dirs::cache_dir().map(|d| d.join("stagehand").join("bin")))
        .as_deref()
}

/// Resolve `name` with the process-wide default resolver.
///
/// See [`BinaryResolver::resolve`].
pub fn find(name: &str, dir: Option<&Path>) -> String {
    default_resolver().resolve(name, dir)
}

fn default_resolver() -> &'static BinaryResolver {
    static RESOLVER: OnceLock<BinaryResolver> = OnceLock::new();
    RESOLVER.get_or_init(|| {
        let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        BinaryResolver::with_defaults(&root)
    })
}

/// Locates executables by name
#[derive(Debug, Clone, Default)]
pub struct BinaryResolver {
    overrides: HashMap<String, PathBuf>,
    fallback_dirs: Vec<PathBuf>,
}

impl BinaryResolver {
    /// Resolver with no overrides and no fallback directories
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver falling back to `<project_root>/.stagehand/bin` and the user cache
    pub fn with_defaults(project_root: &Path) -> Self {
        let mut resolver = Self::new().with_fallback_dir(project_root.join(DEFAULT_TOOLS_DIR));
        if let Some(cache) = default_cache_dir() {
            resolver = resolver.with_fallback_dir(cache);
        }
        resolver
    }

    /// Resolver seeded from a constants table.
    ///
    /// `bin.<name>` entries become overrides and `tools.cache_dir`, when
    /// registered, replaces the project-local fallback directory.
    pub fn from_constants(constants: &ConstantRegistry, project_root: &Path) -> Self {
        let local = constants
            .get::<PathBuf>(TOOLS_CACHE_DIR)
            .unwrap_or_else(|| project_root.join(DEFAULT_TOOLS_DIR));

        let mut resolver = Self::new().with_fallback_dir(local);
        if let Some(cache) = default_cache_dir() {
            resolver = resolver.with_fallback_dir(cache);
        }

        for key in constants.keys() {
            if let Some(name) = key.strip_prefix(BIN_OVERRIDE_PREFIX) {
                if let Some(path) = constants.get::<PathBuf>(key) {
                    resolver = resolver.with_override(name, path);
                }
            }
        }
        resolver
    }

    /// Pin `name` to an explicit path
    pub fn with_override(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(name.into(), path.into());
        self
    }

    /// Append a directory searched after `PATH`
    pub fn with_fallback_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fallback_dirs.push(dir.into());
        self
    }

    /// Fallback directories in search order
    pub fn fallback_dirs(&self) -> &[PathBuf] {
        &self.fallback_dirs
    }

    /// Resolve `name` to an absolute path, or return it unchanged.
    ///
    /// An empty name resolves to an empty string.
    pub fn resolve(&self, name: &str, dir: Option<&Path>) -> String {
        if name.is_empty() {
            return String::new();
        }
        match self.locate(name, dir) {
            Some(path) => path.to_string_lossy().into_owned(),
            None => {
                debug!(name, "binary not found; passing name through unchanged");
                name.to_string()
            }
        }
    }

    /// Find `name`, returning `None` when it exists nowhere
    pub fn locate(&self, name: &str, dir: Option<&Path>) -> Option<PathBuf> {
        if name.is_empty() {
            return None;
        }

        if let Some(path) = self.overrides.get(name) {
            if path.is_file() {
                trace!(name, path = %path.display(), "resolved via override");
                return Some(absolute(path));
            }
            warn!(name, path = %path.display(), "override does not exist; continuing search");
        }

        let candidate = Path::new(name);
        if candidate.is_absolute() {
            return candidate.is_file().then(|| candidate.to_path_buf());
        }

        if let Some(dir) = dir {
            if let Some(path) = search_dir(name, dir) {
                trace!(name, path = %path.display(), "resolved in search directory");
                return Some(path);
            }
        }

        if candidate.components().count() == 1 {
            if let Ok(path) = which::which(name) {
                trace!(name, path = %path.display(), "resolved on PATH");
                return Some(path);
            }
        } else if candidate.is_file() {
            return Some(absolute(candidate));
        }

        self.fallback_dirs.iter().find_map(|dir| {
            let found = search_dir(name, dir);
            if let Some(path) = &found {
                trace!(name, path = %path.display(), "resolved in fallback directory");
            }
            found
        })
    }
}

/// Look for `name` inside `dir`: the plain file first, then any executable
/// variant the platform recognises (e.g. `PATHEXT` suffixes on Windows).
/// On Unix only files with an execute bit count.
fn search_dir(name: &str, dir: &Path) -> Option<PathBuf> {
    let dir = absolute(dir);
    let direct = dir.join(name);
    if is_executable(&direct) {
        return Some(direct);
    }
    which::which_in(name, Some(&dir), &dir).ok()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[test]
    fn test_empty_name_resolves_empty() {
        assert_eq!(BinaryResolver::new().resolve("", None), "");
        assert_eq!(find("", None), "");
    }

    #[test]
    fn test_missing_name_passes_through() {
        let resolver = BinaryResolver::new();
        assert_eq!(
            resolver.resolve("stagehand-surely-missing-binary", None),
            "stagehand-surely-missing-binary"
        );
        assert_eq!(
            find("stagehand-surely-missing-binary", None),
            "stagehand-surely-missing-binary"
        );
    }

    #[test]
    fn test_search_directory_yields_absolute_path() {
        let temp = TempDir::new().unwrap();
        let name = executable_name("stagehand-test-tool");
        let path = touch(temp.path(), &name);

        let resolved = BinaryResolver::new().resolve(&name, Some(temp.path()));
        assert_eq!(resolved, path.to_string_lossy());
        assert_eq!(find(&name, Some(temp.path())), path.to_string_lossy());
    }

    #[cfg(unix)]
    #[test]
    fn test_search_directory_skips_non_executable_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("stagehand-plain-file"), "not a program").unwrap();

        let resolver = BinaryResolver::new();
        assert!(resolver
            .locate("stagehand-plain-file", Some(temp.path()))
            .is_none());

        std::fs::write(temp.path().join("echo"), "not echo").unwrap();
        let echo = resolver.locate("echo", Some(temp.path())).unwrap();
        assert_ne!(echo, temp.path().join("echo"));
    }

    #[test]
    fn test_override_wins() {
        let temp = TempDir::new().unwrap();
        let pinned = touch(temp.path(), "pinned-tool");
        let other = TempDir::new().unwrap();
        touch(other.path(), "mytool");

        let resolver = BinaryResolver::new().with_override("mytool", &pinned);
        assert_eq!(resolver.locate("mytool", Some(other.path())), Some(pinned));
    }

    #[test]
    fn test_missing_override_falls_through() {
        let temp = TempDir::new().unwrap();
        let path = touch(temp.path(), "mytool");

        let resolver = BinaryResolver::new()
            .with_override("mytool", temp.path().join("does-not-exist"))
            .with_fallback_dir(temp.path());
        assert_eq!(resolver.locate("mytool", None), Some(path));
    }

    #[test]
    fn test_fallback_directory() {
        let temp = TempDir::new().unwrap();
        let path = touch(temp.path(), "stagehand-fallback-tool");

        let resolver = BinaryResolver::new().with_fallback_dir(temp.path());
        assert_eq!(resolver.locate("stagehand-fallback-tool", None), Some(path));
    }

    #[cfg(unix)]
    #[test]
    fn test_path_lookup() {
        let resolved = BinaryResolver::new().locate("sh", None).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("sh"));
    }

    #[test]
    fn test_from_constants() {
        let temp = TempDir::new().unwrap();
        let pinned = touch(temp.path(), "pinned-mc");
        let cache = TempDir::new().unwrap();
        let cached = touch(cache.path(), "cached-tool");

        let mut constants = ConstantRegistry::new();
        constants.register_value("bin.mc", pinned.clone());
        constants.register_value(TOOLS_CACHE_DIR, cache.path().to_path_buf());

        let resolver = BinaryResolver::from_constants(&constants, temp.path());
        assert_eq!(resolver.fallback_dirs()[0], cache.path());
        assert_eq!(resolver.locate("mc", None), Some(pinned));
        assert_eq!(resolver.locate("cached-tool", None), Some(cached));
    }

    #[test]
    fn test_with_defaults_uses_project_dir() {
        let temp = TempDir::new().unwrap();
        let resolver = BinaryResolver::with_defaults(temp.path());
        assert_eq!(resolver.fallback_dirs()[0], temp.path().join(DEFAULT_TOOLS_DIR));
    }

    #[test]
    fn test_executable_name() {
        if cfg!(windows) {
            assert_eq!(executable_name("mc"), "mc.exe");
        } else {
            assert_eq!(executable_name("mc"), "mc");
        }
        assert_eq!(executable_name("tool.cmd"), "tool.cmd");
    }
}
