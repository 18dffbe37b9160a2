//! Configuration types for the mockfs engine

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Case sensitivity modes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseSensitivity {
    Sensitive,
    InsensitivePreserving,
}

/// Platform behavior set the engine emulates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Windows,
    Unix,
}

const WINDOWS_SHARING_VIOLATION: i32 = 32;
const UNIX_EWOULDBLOCK: i32 = 11;

impl Profile {
    pub fn separator(self) -> char {
        match self {
            Profile::Windows => '\\',
            Profile::Unix => '/',
        }
    }

    pub fn is_separator(self, c: char) -> bool {
        c == '/' || c == '\\'
    }

    pub fn default_case_sensitivity(self) -> CaseSensitivity {
        match self {
            Profile::Windows => CaseSensitivity::InsensitivePreserving,
            Profile::Unix => CaseSensitivity::Sensitive,
        }
    }

    /// Characters rejected anywhere in a path.
    pub fn is_illegal_path_char(self, c: char) -> bool {
        match self {
            Profile::Windows => matches!(c, '<' | '>' | '"' | '|' | '*' | '?') || (c as u32) < 0x20,
            Profile::Unix => c == '\0',
        }
    }

    /// Characters rejected in a search pattern (wildcards are legal there).
    pub fn is_illegal_pattern_char(self, c: char) -> bool {
        match self {
            Profile::Windows => matches!(c, '<' | '>' | '"' | '|') || (c as u32) < 0x20,
            Profile::Unix => c == '\0',
        }
    }

    pub fn max_symlink_hops(self) -> u32 {
        match self {
            Profile::Windows => 63,
            Profile::Unix => 40,
        }
    }

    pub fn sharing_violation_code(self) -> i32 {
        match self {
            Profile::Windows => WINDOWS_SHARING_VIOLATION,
            Profile::Unix => UNIX_EWOULDBLOCK,
        }
    }

    pub fn default_current_directory(self) -> &'static str {
        match self {
            Profile::Windows => "C:\\",
            Profile::Unix => "/",
        }
    }
}

/// System limits
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FsLimits {
    pub max_open_handles: u32,
    /// Overrides the profile's symlink hop limit when set.
    pub max_symlink_hops: Option<u32>,
}

impl Default for FsLimits {
    fn default() -> Self {
        Self {
            max_open_handles: 10000,
            max_symlink_hops: None,
        }
    }
}

/// Main filesystem configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub profile: Profile,
    /// Overrides the profile's case rule when set.
    pub case_sensitivity: Option<CaseSensitivity>,
    pub limits: FsLimits,
    /// Initial working directory; the profile default when unset.
    pub current_directory: Option<String>,
    pub track_events: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            case_sensitivity: None,
            limits: FsLimits::default(),
            current_directory: None,
            track_events: true,
        }
    }
}

impl FsConfig {
    pub fn windows() -> Self {
        Self {
            profile: Profile::Windows,
            ..Self::default()
        }
    }

    pub fn unix() -> Self {
        Self {
            profile: Profile::Unix,
            ..Self::default()
        }
    }

    pub fn case_sensitivity(&self) -> CaseSensitivity {
        self.case_sensitivity
            .unwrap_or_else(|| self.profile.default_case_sensitivity())
    }

    pub fn max_symlink_hops(&self) -> u32 {
        self.limits
            .max_symlink_hops
            .unwrap_or_else(|| self.profile.max_symlink_hops())
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }
}
