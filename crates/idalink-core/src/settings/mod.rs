//! Persisted user settings.
//!
//! A small JSON document holding the database search roots and the known IDA
//! installations:
//!
//! ```json
//! {
//!   "search_paths": ["/home/me/re"],
//!   "default_install": "ida-9.2",
//!   "installs": { "ida-9.2": "/opt/ida-9.2" }
//! }
//! ```
//!
//! The core never reads this on its own; callers load it and pass the
//! resolved roots and executable in.

mod atomic;

pub use atomic::{atomic_read_json, atomic_write_json};

use crate::error::{IdaLinkError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variables naming an IDA install directory, in priority order.
pub const INSTALL_DIR_ENV_VARS: [&str; 2] = ["IDALINK_IDA_DIR", "IDADIR"];

/// User settings file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directories searched, in order, for database files.
    pub search_paths: Vec<PathBuf>,
    /// Name of the install used for launching.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_install: Option<String>,
    /// Known installs by name.
    pub installs: BTreeMap<String, PathBuf>,
}

impl Settings {
    pub const APP_DIR_NAME: &'static str = "idalink";
    pub const FILE_NAME: &'static str = "config.json";

    /// `<config dir>/idalink/config.json`.
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(Self::APP_DIR_NAME).join(Self::FILE_NAME))
            .ok_or_else(|| IdaLinkError::Config {
                message: "could not determine the user config directory".to_string(),
            })
    }

    /// Load settings; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = atomic_read_json(path)?.unwrap_or_default();
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)
    }

    /// Search roots in priority order.
    pub fn search_roots(&self) -> Vec<PathBuf> {
        self.search_paths.clone()
    }

    /// Add an existing directory to the search roots.
    ///
    /// The path is canonicalized first. Returns `false` if it was already
    /// present.
    pub fn add_search_path(&mut self, path: &Path) -> Result<bool> {
        if !path.is_dir() {
            return Err(IdaLinkError::Validation {
                field: "search_path".to_string(),
                message: format!("{} is not an existing directory", path.display()),
            });
        }
        let canonical = path
            .canonicalize()
            .map_err(|e| IdaLinkError::io_with_path(e, path))?;
        if self.search_paths.contains(&canonical) {
            return Ok(false);
        }
        self.search_paths.push(canonical);
        Ok(true)
    }

    /// Remove a search root. Matches either the path as given or its
    /// canonical form. Returns `false` if it was not present.
    pub fn remove_search_path(&mut self, path: &Path) -> bool {
        let canonical = path.canonicalize().ok();
        let before = self.search_paths.len();
        self.search_paths
            .retain(|p| p != path && Some(p) != canonical.as_ref());
        self.search_paths.len() != before
    }

    /// Register an install directory under `name`.
    pub fn add_install(&mut self, name: &str, dir: &Path, make_default: bool) -> Result<()> {
        if name.trim().is_empty() {
            return Err(IdaLinkError::Validation {
                field: "install".to_string(),
                message: "install name must not be empty".to_string(),
            });
        }
        if !dir.is_dir() {
            return Err(IdaLinkError::Validation {
                field: "install".to_string(),
                message: format!("{} is not an existing directory", dir.display()),
            });
        }
        self.installs.insert(name.to_string(), dir.to_path_buf());
        if make_default || self.default_install.is_none() {
            self.default_install = Some(name.to_string());
        }
        Ok(())
    }

    /// Forget an install. Clears the default if it pointed at it.
    pub fn remove_install(&mut self, name: &str) -> bool {
        let removed = self.installs.remove(name).is_some();
        if self.default_install.as_deref() == Some(name) {
            self.default_install = None;
        }
        removed
    }

    pub fn set_default_install(&mut self, name: &str) -> Result<()> {
        if !self.installs.contains_key(name) {
            return Err(IdaLinkError::Config {
                message: format!("unknown install: {}", name),
            });
        }
        self.default_install = Some(name.to_string());
        Ok(())
    }

    /// Resolve the IDA executable to launch.
    ///
    /// Tries the default install first, then `fallback_install_dir`
    /// (typically from [`install_dir_from_env`]). A configured install whose
    /// binary is missing is skipped with a warning.
    pub fn resolve_executable_path(&self, fallback_install_dir: Option<&Path>) -> Result<PathBuf> {
        let configured = self
            .default_install
            .as_deref()
            .and_then(|name| self.installs.get(name));

        if let Some(install_dir) = configured {
            let executable = executable_in(install_dir);
            if executable.is_file() {
                debug!("Using configured IDA {}", executable.display());
                return Ok(executable);
            }
            warn!("Configured IDA binary not found: {}", executable.display());
        }

        if let Some(install_dir) = fallback_install_dir {
            let executable = executable_in(install_dir);
            if executable.is_file() {
                debug!("Using discovered IDA {}", executable.display());
                return Ok(executable);
            }
            debug!("No IDA binary at {}", executable.display());
        }

        Err(IdaLinkError::NoInstallation)
    }
}

/// IDA binary inside an install directory.
///
/// A macOS `.app` bundle resolves to `Contents/MacOS/ida`; a directory that
/// already is `Contents/MacOS` is used as is.
pub fn executable_in(install_dir: &Path) -> PathBuf {
    let binary = if cfg!(windows) { "ida.exe" } else { "ida" };
    let is_bundle = install_dir
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("app"));
    if is_bundle {
        install_dir.join("Contents").join("MacOS").join(binary)
    } else {
        install_dir.join(binary)
    }
}

/// First non-empty install directory named by [`INSTALL_DIR_ENV_VARS`].
pub fn install_dir_from_env() -> Option<PathBuf> {
    INSTALL_DIR_ENV_VARS.iter().find_map(|var| {
        std::env::var_os(var)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    })
}
