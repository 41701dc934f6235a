use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetTypeConfig {
    pub display_name: String,
    /// Format string; `{description}` is the only placeholder.
    pub prompt_template: String,
    #[serde(default)]
    pub framing: String,
    #[serde(default)]
    pub technical_params: String,
    pub aspect_ratio: String,
    pub default_size: (u32, u32),
    #[serde(default)]
    pub transparent_default: bool,
    #[serde(default)]
    pub output_subdir: Option<String>,
}

impl AssetTypeConfig {
    /// Directory under the output root for this type; falls back to the type key.
    pub fn output_subdir<'a>(&'a self, key: &'a str) -> &'a str {
        self.output_subdir
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(key)
    }

    pub fn dimensions(&self) -> String {
        format!("{}x{}", self.default_size.0, self.default_size.1)
    }
}

/// Asset type configs keyed by type name, in file order.
#[derive(Debug, Clone, Default)]
pub struct AssetTypeRegistry {
    types: IndexMap<String, AssetTypeConfig>,
}

impl AssetTypeRegistry {
    pub fn new(types: IndexMap<String, AssetTypeConfig>) -> Result<Self, ConfigError> {
        for (key, config) in &types {
            let (width, height) = config.default_size;
            if width == 0 || height == 0 {
                return Err(ConfigError::InvalidTargetSize {
                    asset_type: key.clone(),
                    width,
                    height,
                });
            }
        }
        Ok(Self { types })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::ConfigNotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let types = serde_json::from_str::<IndexMap<String, AssetTypeConfig>>(&raw).map_err(
            |source| ConfigError::ConfigParse {
                path: path.to_path_buf(),
                source,
            },
        )?;
        Self::new(types)
    }

    pub fn get(&self, key: &str) -> Result<&AssetTypeConfig, ConfigError> {
        self.types
            .get(key)
            .ok_or_else(|| ConfigError::UnknownAssetType {
                requested: key.to_string(),
                valid: self.keys(),
            })
    }

    pub fn keys(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AssetTypeConfig)> {
        self.types.iter()
    }
}
