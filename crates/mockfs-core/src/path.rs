//! Path normalization
//!
//! Every user-supplied path string passes through [`PathNormalizer`] before it
//! reaches the node store. The output is absolute, uses the profile separator,
//! has `.`/`..` resolved (clamped at the root) and keeps the caller's casing.
//! Case folding is applied separately by the store when it looks names up.

use std::fmt;

use crate::config::{CaseSensitivity, Profile};
use crate::error::{FsError, FsResult};

const UNC_FORM_MESSAGE: &str = "UNC path should be of the form \\\\server\\share.";
const UNSUPPORTED_FORMAT_MESSAGE: &str = "The given path's format is not supported.";

/// Canonical absolute path
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct NormalizedPath {
    root: String,
    segments: Vec<String>,
    separator: char,
    full: String,
}

impl NormalizedPath {
    pub(crate) fn new(root: String, segments: Vec<String>, separator: char) -> Self {
        let mut full = root.clone();
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                full.push(separator);
            }
            full.push_str(segment);
        }
        Self {
            root,
            segments,
            separator,
            full,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Volume root including its trailing separator (`C:\`, `\\server\share\`, `/`).
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<NormalizedPath> {
        if self.segments.is_empty() {
            return None;
        }
        let segments = self.segments[..self.segments.len() - 1].to_vec();
        Some(Self::new(self.root.clone(), segments, self.separator))
    }

    /// Append a single, already valid name.
    pub fn join(&self, name: &str) -> NormalizedPath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self::new(self.root.clone(), segments, self.separator)
    }

    /// Key identifying the volume this path lives on.
    pub fn volume_key(&self) -> String {
        // Drive letters and UNC shares never distinguish case.
        self.root.to_uppercase()
    }

    pub fn same_volume(&self, other: &NormalizedPath) -> bool {
        self.volume_key() == other.volume_key()
    }

    /// Equality under the given case rule.
    pub fn eq_with(&self, other: &NormalizedPath, case: CaseSensitivity) -> bool {
        self.same_volume(other)
            && self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| fold_name(a, case) == fold_name(b, case))
    }

    /// True if `self` is a strict ancestor of `other` under the given case rule.
    pub fn is_ancestor_of(&self, other: &NormalizedPath, case: CaseSensitivity) -> bool {
        self.same_volume(other)
            && self.segments.len() < other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| fold_name(a, case) == fold_name(b, case))
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl fmt::Debug for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NormalizedPath({:?})", self.full)
    }
}

impl AsRef<str> for NormalizedPath {
    fn as_ref(&self) -> &str {
        &self.full
    }
}

/// Lookup key for a single name under a case rule.
pub(crate) fn fold_name(name: &str, case: CaseSensitivity) -> String {
    match case {
        CaseSensitivity::Sensitive => name.to_string(),
        CaseSensitivity::InsensitivePreserving => name.to_lowercase(),
    }
}

/// Turns raw path strings into [`NormalizedPath`]s for one profile.
#[derive(Clone, Copy, Debug)]
pub struct PathNormalizer {
    profile: Profile,
}

impl PathNormalizer {
    pub fn new(profile: Profile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Root directory of the profile's default volume.
    pub fn default_root(&self) -> NormalizedPath {
        let root = self.profile.default_current_directory().to_string();
        NormalizedPath::new(root, Vec::new(), self.profile.separator())
    }

    /// Normalize a path that must not depend on a working directory.
    pub fn normalize_absolute(&self, raw: &str) -> FsResult<NormalizedPath> {
        self.normalize(raw, &self.default_root())
    }

    /// Normalize `raw`, resolving relative forms against `cwd`.
    pub fn normalize(&self, raw: &str, cwd: &NormalizedPath) -> FsResult<NormalizedPath> {
        if raw.trim().is_empty() {
            return Err(FsError::NotLegalForm);
        }
        if raw.chars().any(|c| self.profile.is_illegal_path_char(c)) {
            return Err(FsError::IllegalCharacters);
        }

        let sep = self.profile.separator();
        let unified: String = raw
            .chars()
            .map(|c| if self.profile.is_separator(c) { sep } else { c })
            .collect();

        let (root, base, rest) = match self.profile {
            Profile::Windows => self.split_windows(&unified, cwd)?,
            Profile::Unix => {
                if let Some(rest) = unified.strip_prefix(sep) {
                    ("/".to_string(), Vec::new(), rest.to_string())
                } else {
                    (cwd.root.clone(), cwd.segments.clone(), unified)
                }
            }
        };

        let mut segments = base;
        for part in rest.split(sep).filter(|p| !p.is_empty()) {
            match part {
                "." => {}
                ".." => {
                    segments.pop();
                }
                name => segments.push(name.to_string()),
            }
        }
        self.trim_final_segment(&mut segments);

        Ok(NormalizedPath::new(root, segments, sep))
    }

    /// Returns the root, the base segments relative paths build on, and the
    /// remaining text to resolve.
    fn split_windows(
        &self,
        path: &str,
        cwd: &NormalizedPath,
    ) -> FsResult<(String, Vec<String>, String)> {
        let sep = self.profile.separator();

        if let Some(unc) = path.strip_prefix("\\\\") {
            if unc.contains(':') {
                return Err(FsError::unsupported(UNSUPPORTED_FORMAT_MESSAGE));
            }
            let mut parts = unc.split(sep).filter(|p| !p.is_empty());
            let (Some(server), Some(share)) = (parts.next(), parts.next()) else {
                return Err(FsError::invalid_argument(UNC_FORM_MESSAGE));
            };
            let root = format!("\\\\{server}\\{share}\\");
            let rest: Vec<&str> = parts.collect();
            return Ok((root, Vec::new(), rest.join("\\")));
        }

        let chars: Vec<char> = path.chars().collect();
        let colons: Vec<usize> = chars
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == ':')
            .map(|(i, _)| i)
            .collect();

        if colons.is_empty() {
            if let Some(rest) = path.strip_prefix(sep) {
                return Ok((cwd.root.clone(), Vec::new(), rest.to_string()));
            }
            return Ok((cwd.root.clone(), cwd.segments.clone(), path.to_string()));
        }

        if colons != [1] || !chars[0].is_ascii_alphabetic() {
            return Err(FsError::unsupported(UNSUPPORTED_FORMAT_MESSAGE));
        }

        let root = format!("{}:\\", chars[0].to_ascii_uppercase());
        let rest: String = chars[2..].iter().collect();
        if let Some(rest) = rest.strip_prefix(sep) {
            return Ok((root, Vec::new(), rest.to_string()));
        }
        // Drive-relative: only the cwd's own drive carries a working directory.
        let base = if cwd.root.eq_ignore_ascii_case(&root) {
            cwd.segments.clone()
        } else {
            Vec::new()
        };
        Ok((root, base, rest))
    }

    fn trim_final_segment(&self, segments: &mut Vec<String>) {
        while let Some(last) = segments.last_mut() {
            let trimmed = match self.profile {
                Profile::Windows => last.trim_end_matches(|c: char| c == '.' || c.is_whitespace()),
                Profile::Unix => last.trim_end(),
            };
            if trimmed.is_empty() {
                segments.pop();
                continue;
            }
            if trimmed.len() != last.len() {
                *last = trimmed.to_string();
            }
            break;
        }
    }
}
