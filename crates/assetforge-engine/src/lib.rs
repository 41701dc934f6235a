pub mod client;
pub mod orchestrator;
pub mod postprocess;
pub mod prompt;
pub mod response;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use assetforge_contracts::assets::{AssetTypeRegistry, StyleFragments};
use assetforge_contracts::error::ConfigError;
use assetforge_contracts::events::EventSink;

pub use client::{
    GeminiClient, GeminiConfig, GenerateError, GenerationRequest, ImageGenerator, RetryPolicy,
};
pub use orchestrator::{
    resolve_transparency, sanitize_filename, AssetError, AssetRequest, DryRunReport,
    FailurePolicy, Orchestrator, RunOutcome,
};
pub use postprocess::{process, ImageMetadata, ProcessError};
pub use prompt::{assemble, TemplateError};
pub use response::{GeneratedImage, GenerationResponse};

pub const DEFAULT_SKILL_DIR: &str = ".assetforge";
pub const ASSET_TYPES_FILENAME: &str = "asset-types.json";
pub const STYLE_REFERENCE_FILENAME: &str = "style-reference.md";

/// Where the asset type config and style reference live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillPaths {
    pub asset_types: PathBuf,
    pub style_reference: PathBuf,
}

impl SkillPaths {
    /// Explicit file paths win; otherwise both files come from `skill_dir`,
    /// which defaults to `{project_root}/.assetforge`.
    pub fn resolve(
        project_root: &Path,
        skill_dir: Option<&Path>,
        asset_types: Option<&Path>,
        style_reference: Option<&Path>,
    ) -> Self {
        let skill_dir = skill_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project_root.join(DEFAULT_SKILL_DIR));
        Self {
            asset_types: asset_types
                .map(Path::to_path_buf)
                .unwrap_or_else(|| skill_dir.join(ASSET_TYPES_FILENAME)),
            style_reference: style_reference
                .map(Path::to_path_buf)
                .unwrap_or_else(|| skill_dir.join(STYLE_REFERENCE_FILENAME)),
        }
    }

    pub fn load_registry(&self) -> Result<AssetTypeRegistry, ConfigError> {
        AssetTypeRegistry::load(&self.asset_types)
    }

    pub fn load_orchestrator(&self, events: Arc<dyn EventSink>) -> Result<Orchestrator, ConfigError> {
        let registry = self.load_registry()?;
        let style = StyleFragments::load(&self.style_reference)?;
        if style.is_empty() {
            tracing::debug!(
                "no style fragments loaded from {}",
                self.style_reference.display()
            );
        }
        Ok(Orchestrator::new(registry, style, events))
    }
}
