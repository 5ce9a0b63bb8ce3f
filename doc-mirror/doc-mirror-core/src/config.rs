use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables shared by the reconciler and the lifecycle manager.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MirrorConfig {
    /// Remote id used when an operation names no parent folder.
    pub root_folder_key: String,
    pub max_upload_bytes: u64,
    pub max_name_len: usize,
    /// Upper bound on concurrent upserts while materializing one listing.
    pub materialize_concurrency: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            root_folder_key: "root".to_string(),
            max_upload_bytes: 50 * 1024 * 1024,
            max_name_len: 255,
            materialize_concurrency: 8,
        }
    }
}

impl MirrorConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&data)?)
    }
}
