//! File layout and environment configuration.

use std::path::{Path, PathBuf};

/// Festival-level configuration document at the festival root.
pub const FESTIVAL_CONFIG_FILE: &str = "fest.yaml";

/// Per-phase / per-sequence override documents, in lookup order.
pub const OVERRIDE_FILE_NAMES: &[&str] = &[".fest.gates.yml", ".fest.gates.yaml"];

/// Phase goal document whose frontmatter may declare the phase type.
pub const PHASE_GOAL_FILE: &str = "PHASE_GOAL.md";

/// Policy directory relative to the user config dir.
pub const USER_POLICY_DIR: &str = "gates/policies";

/// Policy directory relative to the festival root.
pub const FESTIVAL_POLICY_DIR: &str = ".festival/gates/policies";

/// Runtime configuration for loaders and the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatesConfig {
    /// User-level config directory (`~/.config/fest` by default).
    pub user_config_dir: Option<PathBuf>,
    /// Override file names tried in each phase/sequence directory.
    pub override_file_names: Vec<String>,
}

impl Default for GatesConfig {
    fn default() -> Self {
        let user_config_dir = std::env::var_os("FESTGATE_CONFIG_DIR")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("XDG_CONFIG_HOME").map(|d| PathBuf::from(d).join("fest")))
            .or_else(|| {
                std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config").join("fest"))
            });
        Self {
            user_config_dir,
            override_file_names: OVERRIDE_FILE_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl GatesConfig {
    /// Resolve configuration from environment variables.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Configuration without any user-level directory (tests, hermetic runs).
    pub fn isolated() -> Self {
        Self {
            user_config_dir: None,
            ..Self::default()
        }
    }

    /// Set the user config directory.
    pub fn with_user_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_config_dir = Some(dir.into());
        self
    }

    pub fn user_policy_dir(&self) -> Option<PathBuf> {
        self.user_config_dir.as_ref().map(|d| d.join(USER_POLICY_DIR))
    }

    pub fn festival_policy_dir(&self, festival_root: &Path) -> PathBuf {
        festival_root.join(FESTIVAL_POLICY_DIR)
    }

    /// First existing override file in `dir`, if any.
    pub fn find_override_file(&self, dir: &Path) -> Option<PathBuf> {
        self.override_file_names
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
    }
}
