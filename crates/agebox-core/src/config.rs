//! Box configuration management
//!
//! Configuration files:
//! - ~/.config/agebox/config.yaml - Global settings
//! - <box root>/agebox.yaml - Project-specific overrides
//!
//! Relative paths are resolved against the box root.

use crate::paths::Paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default extension appended to encrypted secret files
pub const DEFAULT_EXTENSION: &str = ".agebox";

/// Default registry file name
pub const DEFAULT_REGISTRY_FILE: &str = ".ageboxreg.yml";

/// Default ignore file name
pub const DEFAULT_IGNORE_FILE: &str = ".ageboxignore";

/// One configuration layer as written on disk. Unset fields inherit from
/// the layer below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    pub public_keys: Option<PathBuf>,
    pub private_keys: Option<PathBuf>,
    pub registry_file: Option<PathBuf>,
    pub ignore_file: Option<PathBuf>,
    pub extension: Option<String>,
    pub workers: Option<usize>,
}

impl ConfigLayer {
    /// Load a layer from a file, an absent file is an empty layer
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read agebox config from {:?}", path))?;
        let layer: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse agebox config from {:?}", path))?;

        debug!(path = %path.display(), "loaded config layer");
        Ok(layer)
    }
}

/// Fully resolved configuration for one box
#[derive(Debug, Clone, PartialEq)]
pub struct BoxConfig {
    /// Box root, all secret ids are relative to it
    pub root: PathBuf,
    /// Public keys (file or directory) used to encrypt
    pub public_keys: PathBuf,
    /// Private keys (file or directory) used to decrypt
    pub private_keys: PathBuf,
    /// Registry of tracked secrets
    pub registry_file: PathBuf,
    /// Glob patterns of ids that are never processed
    pub ignore_file: PathBuf,
    /// Extension of encrypted files
    pub extension: String,
    /// Number of secrets processed in parallel (1 = sequential)
    pub workers: usize,
}

impl BoxConfig {
    /// Defaults for a box rooted at `root`
    pub fn defaults(root: &Path) -> Self {
        let paths = Paths::new();
        Self {
            root: root.to_path_buf(),
            public_keys: root.join("keys"),
            private_keys: paths.private_keys(),
            registry_file: root.join(DEFAULT_REGISTRY_FILE),
            ignore_file: root.join(DEFAULT_IGNORE_FILE),
            extension: DEFAULT_EXTENSION.to_string(),
            workers: 1,
        }
    }

    /// Load configuration from the default locations
    pub fn load(root: &Path) -> Result<Self> {
        let paths = Paths::new();
        let global = ConfigLayer::load_from(&paths.global_config())?;
        let project = ConfigLayer::load_from(&Paths::project_config(root))?;

        Ok(Self::defaults(root).with_layer(global).with_layer(project))
    }

    /// Apply a layer on top of this configuration
    pub fn with_layer(mut self, layer: ConfigLayer) -> Self {
        if let Some(p) = layer.public_keys {
            self.public_keys = self.resolve(p);
        }
        if let Some(p) = layer.private_keys {
            self.private_keys = self.resolve(p);
        }
        if let Some(p) = layer.registry_file {
            self.registry_file = self.resolve(p);
        }
        if let Some(p) = layer.ignore_file {
            self.ignore_file = self.resolve(p);
        }
        if let Some(ext) = layer.extension {
            self.extension = normalize_extension(&ext);
        }
        if let Some(workers) = layer.workers {
            self.workers = workers.max(1);
        }
        self
    }

    fn resolve(&self, path: PathBuf) -> PathBuf {
        let path = expand_home(path);
        if path.is_absolute() {
            path
        } else {
            self.root.join(path)
        }
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim();
    if ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{}", ext)
    }
}

fn expand_home(path: PathBuf) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path
}
