use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MANIFEST_FILENAME: &str = "manifest.json";
pub const TRANSPARENT_FLAG: &str = "transparent";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub path: String,
    #[serde(rename = "type")]
    pub asset_type: String,
    pub description: String,
    pub prompt_used: String,
    #[serde(rename = "model", alias = "model_id")]
    pub model_id: String,
    #[serde(default)]
    pub model_text: String,
    pub generated_at: String,
    pub dimensions: String,
    pub aspect_ratio: String,
    #[serde(default)]
    pub flags: BTreeSet<String>,
    pub original_size: (u32, u32),
    pub file_size_bytes: u64,
    #[serde(default)]
    pub promoted: bool,
    #[serde(default)]
    pub promoted_to: Option<String>,
}

/// JSON array log of generation attempts for one output directory.
///
/// Loading never fails: a missing, unreadable, or non-array file is treated as
/// an empty log. Existing elements are carried over verbatim on save.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub path: PathBuf,
    pub entries: Vec<Value>,
}

impl Manifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::new(path),
            Err(err) => {
                tracing::warn!(path = %path.display(), "manifest unreadable, starting fresh: {err}");
                return Self::new(path);
            }
        };
        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(entries) => Self { path, entries },
            Err(err) => {
                tracing::warn!(path = %path.display(), "manifest corrupt, starting fresh: {err}");
                Self::new(path)
            }
        }
    }

    pub fn push(&mut self, entry: &ManifestEntry) -> anyhow::Result<()> {
        self.entries.push(serde_json::to_value(entry)?);
        Ok(())
    }

    /// Entries that decode as [`ManifestEntry`]; foreign elements are skipped.
    pub fn typed_entries(&self) -> Vec<ManifestEntry> {
        self.entries
            .iter()
            .filter_map(|item| serde_json::from_value::<ManifestEntry>(item.clone()).ok())
            .collect()
    }

    /// Replaces the whole file: write to a sibling temp file, then rename over.
    pub fn save(&self) -> anyhow::Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;

        let rendered = serde_json::to_string_pretty(&self.entries)?;
        let mut staged = tempfile::NamedTempFile::new_in(&parent)
            .with_context(|| format!("failed to stage manifest in {}", parent.display()))?;
        staged.write_all(rendered.as_bytes())?;
        staged.write_all(b"\n")?;
        staged.flush()?;
        // Temp files start owner-only; keep whatever mode the manifest already had.
        if let Ok(existing) = std::fs::metadata(&self.path) {
            staged
                .as_file()
                .set_permissions(existing.permissions())
                .with_context(|| format!("failed to copy permissions of {}", self.path.display()))?;
        }
        staged
            .persist(&self.path)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

/// Appends one entry to the manifest at `path`. Callers serialize access per path.
pub fn append_entry(path: &Path, entry: &ManifestEntry) -> anyhow::Result<()> {
    let mut manifest = Manifest::load(path);
    manifest.push(entry)?;
    manifest.save()
}
