//! Centralized path management for project-scoped storage.
//!
//! Resolves the project root, the `kuzu-memory/` data directory, and the
//! paths inside it (database directory, `config.yaml`, `logs/`).
//!
//! # Examples
//!
//! ```rust,ignore
//! use kuzu_memory::config::ProjectPaths;
//!
//! let paths = ProjectPaths::discover(std::env::current_dir()?)?;
//! paths.require_initialised()?;
//! let config = kuzu_memory::MemoryConfig::load(&paths.config_path())?;
//! let db = paths.database_path(&config);
//! ```

use super::MemoryConfig;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Preferred name of the project memory directory.
pub const MEMORY_DIR_NAME: &str = "kuzu-memory";

/// Hidden alternative accepted when present.
pub const HIDDEN_MEMORY_DIR_NAME: &str = ".kuzu-memory";

/// Name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Name of the log directory.
pub const LOGS_DIR_NAME: &str = "logs";

/// Markers that identify a project root when no memory directory exists yet.
const ROOT_MARKERS: &[&str] = &[".git", "Cargo.toml", "package.json", "pyproject.toml", "go.mod"];

/// Resolved locations for one project's memory store.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    /// The project root directory.
    project_root: PathBuf,
    /// The `kuzu-memory/` (or `.kuzu-memory/`) directory under the root.
    memory_dir: PathBuf,
}

impl ProjectPaths {
    /// Walks up from `start` to locate the project and its memory directory.
    ///
    /// A directory containing `kuzu-memory/` or `.kuzu-memory/` wins
    /// immediately. Otherwise the first ancestor carrying a project marker
    /// (`.git`, `Cargo.toml`, ...) becomes the root with the default
    /// directory name; as a last resort `start` itself is the root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if `start` cannot be canonicalised.
    pub fn discover(start: impl AsRef<Path>) -> Result<Self> {
        let start = start
            .as_ref()
            .canonicalize()
            .map_err(|e| Error::OperationFailed {
                operation: "discover_project_root".to_string(),
                cause: format!("{}: {e}", start.as_ref().display()),
            })?;

        // Pass 1: an existing memory directory anywhere up the tree wins.
        for dir in start.ancestors() {
            for name in [MEMORY_DIR_NAME, HIDDEN_MEMORY_DIR_NAME] {
                let candidate = dir.join(name);
                if candidate.is_dir() {
                    return Ok(Self {
                        project_root: dir.to_path_buf(),
                        memory_dir: candidate,
                    });
                }
            }
        }

        // Pass 2: nearest ancestor with a project marker.
        for dir in start.ancestors() {
            if ROOT_MARKERS.iter().any(|m| dir.join(m).exists()) {
                return Ok(Self {
                    project_root: dir.to_path_buf(),
                    memory_dir: dir.join(MEMORY_DIR_NAME),
                });
            }
        }

        Ok(Self {
            memory_dir: start.join(MEMORY_DIR_NAME),
            project_root: start,
        })
    }

    /// Creates paths rooted at an explicit project directory.
    #[must_use]
    pub fn at_root(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let hidden = project_root.join(HIDDEN_MEMORY_DIR_NAME);
        let memory_dir = if hidden.is_dir() {
            hidden
        } else {
            project_root.join(MEMORY_DIR_NAME)
        };
        Self {
            project_root,
            memory_dir,
        }
    }

    /// Returns the project root.
    #[must_use]
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Returns the memory data directory.
    #[must_use]
    pub fn memory_dir(&self) -> &Path {
        &self.memory_dir
    }

    /// Returns the configuration file path.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.memory_dir.join(CONFIG_FILE_NAME)
    }

    /// Returns the log directory path.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.memory_dir.join(LOGS_DIR_NAME)
    }

    /// Resolves the database directory from config, relative to the memory
    /// directory unless absolute.
    #[must_use]
    pub fn database_path(&self, config: &MemoryConfig) -> PathBuf {
        let configured = &config.storage.database_path;
        if configured.is_absolute() {
            configured.clone()
        } else {
            self.memory_dir.join(configured)
        }
    }

    /// True when the memory directory exists.
    #[must_use]
    pub fn is_initialised(&self) -> bool {
        self.memory_dir.is_dir()
    }

    /// Fails with [`Error::NotInitialised`] when the memory directory is
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialised`] carrying the expected path.
    pub fn require_initialised(&self) -> Result<()> {
        if self.is_initialised() {
            Ok(())
        } else {
            Err(Error::NotInitialised(self.memory_dir.clone()))
        }
    }

    /// Creates the memory directory tree and a default `config.yaml`.
    ///
    /// Idempotent: existing directories and config are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] on I/O failure.
    pub fn init(&self) -> Result<MemoryConfig> {
        let config = MemoryConfig::default();
        for dir in [
            self.memory_dir.clone(),
            self.database_path(&config),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| Error::OperationFailed {
                operation: "init_memory_dir".to_string(),
                cause: format!("{}: {e}", dir.display()),
            })?;
        }

        let config_path = self.config_path();
        if config_path.exists() {
            return MemoryConfig::load(&config_path);
        }
        config.save(&config_path)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_prefers_existing_memory_dir() {
        let tmp = TempDir::new().expect("tempdir");
        let nested = tmp.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(tmp.path().join(MEMORY_DIR_NAME)).unwrap();

        let paths = ProjectPaths::discover(&nested).expect("discover");
        assert_eq!(
            paths.memory_dir(),
            tmp.path().canonicalize().unwrap().join(MEMORY_DIR_NAME)
        );
    }

    #[test]
    fn test_discover_falls_back_to_project_marker() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        let nested = tmp.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();

        let paths = ProjectPaths::discover(&nested).expect("discover");
        assert_eq!(
            paths.project_root(),
            tmp.path().canonicalize().unwrap().as_path()
        );
        assert!(!paths.is_initialised());
    }

    #[test]
    fn test_hidden_dir_accepted() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join(HIDDEN_MEMORY_DIR_NAME)).unwrap();

        let paths = ProjectPaths::discover(tmp.path()).expect("discover");
        assert!(paths.memory_dir().ends_with(HIDDEN_MEMORY_DIR_NAME));
        assert!(paths.is_initialised());
    }

    #[test]
    fn test_init_is_idempotent() {
        let tmp = TempDir::new().expect("tempdir");
        let paths = ProjectPaths::at_root(tmp.path());
        assert!(paths.require_initialised().is_err());

        let config = paths.init().expect("init");
        assert!(paths.config_path().exists());
        assert!(paths.database_path(&config).is_dir());
        assert!(paths.require_initialised().is_ok());

        // Second init must not clobber an edited config.
        let mut edited = config;
        edited.recall.max_memories = 9;
        edited.save(&paths.config_path()).expect("save");
        let reloaded = paths.init().expect("re-init");
        assert_eq!(reloaded.recall.max_memories, 9);
    }
}
