//! Conflict copy naming
//!
//! Backup copies are siblings of the original key, following the pattern:
//! `filename (conflicted copy YYYY-MM-DD XXXXXXXX).ext`

use chrono::Utc;
use uuid::Uuid;

use tidesync_core::domain::SyncKey;

use crate::error::ConflictError;

/// Extensions whose backups get a readable warning banner appended
const TEXT_EXTENSIONS: &[&str] = &[
    "md", "markdown", "txt", "org", "rst", "csv", "json", "yaml", "yml", "toml", "html", "css",
    "js", "ts",
];

/// Generates conflict copy names
pub struct ConflictNamer;

impl ConflictNamer {
    /// Generates a conflict copy file name
    ///
    /// Given "report.md", produces something like:
    /// "report (conflicted copy 2026-10-19 a1b2c3d4).md"
    pub fn generate(original_name: &str) -> String {
        let timestamp = Utc::now().format("%Y-%m-%d");
        let short_uuid = &Uuid::new_v4().simple().to_string()[..8];

        match original_name.rfind('.') {
            // Dot-files like ".env" have no extension
            Some(dot_pos) if dot_pos > 0 => {
                let stem = &original_name[..dot_pos];
                let ext = &original_name[dot_pos..];
                format!("{stem} (conflicted copy {timestamp} {short_uuid}){ext}")
            }
            _ => format!("{original_name} (conflicted copy {timestamp} {short_uuid})"),
        }
    }

    /// Sibling key holding the conflict copy of a file key
    pub fn backup_key(key: &SyncKey) -> Result<SyncKey, ConflictError> {
        let name = Self::generate(key.name());
        key.with_name(&name)
            .map_err(|_| ConflictError::InvalidName(name))
    }

    /// Whether a warning banner can be appended to a copy of this key
    pub fn is_text(key: &SyncKey) -> bool {
        key.name()
            .rsplit_once('.')
            .map(|(_, ext)| {
                let ext = ext.to_ascii_lowercase();
                TEXT_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
    }
}
