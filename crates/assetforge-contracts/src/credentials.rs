use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const API_KEY_VAR: &str = "GEMINI_API_KEY";
const FALLBACK_API_KEY_VAR: &str = "GOOGLE_API_KEY";

/// Resolves the service credential. Only consulted for live generation.
pub trait CredentialSource {
    fn api_key(&self) -> Result<String, ConfigError>;
}

/// `GEMINI_API_KEY` from the process environment, then from a dotenv file,
/// then `GOOGLE_API_KEY`. An exported variable is never overridden by the file.
#[derive(Debug, Clone)]
pub struct DotenvCredentials {
    env_path: PathBuf,
    env: fn(&str) -> Option<String>,
}

impl DotenvCredentials {
    pub fn new(env_path: impl Into<PathBuf>) -> Self {
        Self {
            env_path: env_path.into(),
            env: non_empty_env,
        }
    }

    pub fn for_project(project_root: &Path) -> Self {
        Self::new(project_root.join(".env"))
    }
}

impl CredentialSource for DotenvCredentials {
    fn api_key(&self) -> Result<String, ConfigError> {
        (self.env)(API_KEY_VAR)
            .or_else(|| {
                parse_dotenv(&self.env_path)
                    .remove(API_KEY_VAR)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
            .or_else(|| (self.env)(FALLBACK_API_KEY_VAR))
            .ok_or_else(|| ConfigError::MissingCredential {
                key: API_KEY_VAR.to_string(),
                env_path: self.env_path.clone(),
            })
    }
}

/// A credential supplied directly by the caller.
#[derive(Debug, Clone)]
pub struct StaticCredential(pub String);

impl CredentialSource for StaticCredential {
    fn api_key(&self) -> Result<String, ConfigError> {
        if self.0.trim().is_empty() {
            return Err(ConfigError::MissingCredential {
                key: API_KEY_VAR.to_string(),
                env_path: PathBuf::new(),
            });
        }
        Ok(self.0.clone())
    }
}

pub fn parse_dotenv(path: &Path) -> HashMap<String, String> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    parse_dotenv_str(&content)
}

pub fn parse_dotenv_str(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = value.trim().to_string();
        if value.len() >= 2 {
            let bytes = value.as_bytes();
            if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
                || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
            {
                value = value[1..value.len() - 1].to_string();
            }
        }
        vars.insert(key.to_string(), value);
    }
    vars
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
