//! Reconciliation keys
//!
//! A [`SyncKey`] is a relative, `/`-separated path. Folder keys carry a
//! trailing `/`, file keys never do. The synthetic root folder is `/` and is
//! never planned itself; it only shows up as the parent of top-level keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;

/// Key of the synthetic root folder
pub const ROOT_KEY: &str = "/";

/// Validated path-like identifier of a file or folder
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyncKey(String);

impl SyncKey {
    /// Creates a key after validating its shape
    ///
    /// Rejects empty keys, absolute keys, backslashes, empty segments and
    /// `.`/`..` segments. The root key `/` is accepted.
    pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        if raw == ROOT_KEY {
            return Ok(Self(raw));
        }
        if raw.is_empty() {
            return Err(DomainError::InvalidKey("key is empty".to_string()));
        }
        if raw.starts_with('/') {
            return Err(DomainError::InvalidKey(format!("{raw}: must be relative")));
        }
        if raw.contains('\\') {
            return Err(DomainError::InvalidKey(format!(
                "{raw}: backslashes are not allowed"
            )));
        }

        let trimmed = raw.strip_suffix('/').unwrap_or(&raw);
        for segment in trimmed.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(DomainError::InvalidKey(format!(
                    "{raw}: invalid segment '{segment}'"
                )));
            }
        }

        Ok(Self(raw))
    }

    /// The synthetic root folder
    pub fn root() -> Self {
        Self(ROOT_KEY.to_string())
    }

    /// Builds the folder key for a relative directory path (adds the trailing `/`)
    pub fn folder(raw: &str) -> Result<Self, DomainError> {
        if raw.ends_with('/') {
            Self::new(raw)
        } else {
            Self::new(format!("{raw}/"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_KEY
    }

    pub fn is_folder(&self) -> bool {
        self.0.ends_with('/')
    }

    /// Number of path segments (`a.txt` = 1, `a/` = 1, `a/b/c.txt` = 3, root = 0)
    pub fn depth(&self) -> usize {
        if self.is_root() {
            return 0;
        }
        self.trimmed().split('/').count()
    }

    /// Last path segment without the folder slash
    pub fn name(&self) -> &str {
        let trimmed = self.trimmed();
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    /// Parent folder key
    ///
    /// `a/b/c.txt` -> `a/b/`, `a/b/` -> `a/`, `a.txt` -> `/`, `/` -> `/`.
    pub fn parent(&self) -> SyncKey {
        if self.is_root() {
            return Self::root();
        }
        let trimmed = self.trimmed();
        match trimmed.rfind('/') {
            Some(pos) => Self(trimmed[..=pos].to_string()),
            None => Self::root(),
        }
    }

    /// Returns a sibling key in the same folder with a different file name
    pub fn with_name(&self, name: &str) -> Result<SyncKey, DomainError> {
        let parent = self.parent();
        let mut raw = if parent.is_root() {
            String::new()
        } else {
            parent.0
        };
        raw.push_str(name);
        if self.is_folder() {
            raw.push('/');
        }
        Self::new(raw)
    }

    /// Whether `self` lies strictly below the folder `ancestor`
    pub fn is_under(&self, ancestor: &SyncKey) -> bool {
        if ancestor.is_root() {
            return !self.is_root();
        }
        ancestor.is_folder() && self.0.len() > ancestor.0.len() && self.0.starts_with(&ancestor.0)
    }

    fn trimmed(&self) -> &str {
        self.0.strip_suffix('/').unwrap_or(&self.0)
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SyncKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SyncKey> for String {
    fn from(key: SyncKey) -> Self {
        key.0
    }
}

impl AsRef<str> for SyncKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
