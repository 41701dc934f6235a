use std::path::PathBuf;

use thiserror::Error;

/// Fatal configuration problems. Each message carries the remediation hint
/// shown to the operator.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("asset type config not found at {}", path.display())]
    ConfigNotFound { path: PathBuf },

    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid asset type config {}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown asset type '{requested}'. Valid types: {}", valid.join(", "))]
    UnknownAssetType {
        requested: String,
        valid: Vec<String>,
    },

    #[error("asset type '{asset_type}' has an invalid default_size {width}x{height}")]
    InvalidTargetSize {
        asset_type: String,
        width: u32,
        height: u32,
    },

    #[error("style section pattern failed to compile")]
    StylePattern(#[from] regex::Error),

    #[error(
        "{key} not found in {} or the environment. Create it with: {key}=your_key_here",
        env_path.display()
    )]
    MissingCredential { key: String, env_path: PathBuf },
}
