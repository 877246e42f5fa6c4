//! Standard paths used by agebox

use std::path::{Path, PathBuf};

/// Standard agebox paths
pub struct Paths {
    /// Config directory (~/.config/agebox)
    pub config: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let config = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("agebox");

        Self { config }
    }

    /// Global configuration file
    pub fn global_config(&self) -> PathBuf {
        self.config.join("config.yaml")
    }

    /// Default location of the private keys used for decryption
    pub fn private_keys(&self) -> PathBuf {
        self.config.join("keys")
    }

    /// Project configuration file inside a box root
    pub fn project_config(root: &Path) -> PathBuf {
        root.join("agebox.yaml")
    }
}
