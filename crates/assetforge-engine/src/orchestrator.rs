use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use assetforge_contracts::assets::{AssetTypeConfig, AssetTypeRegistry, StyleFragments};
use assetforge_contracts::credentials::CredentialSource;
use assetforge_contracts::error::ConfigError;
use assetforge_contracts::events::{EventPayload, EventSink};
use assetforge_contracts::runs::manifest::{
    append_entry, ManifestEntry, MANIFEST_FILENAME, TRANSPARENT_FLAG,
};
use assetforge_contracts::runs::summary::{new_run_id, now_utc_iso, RunSummary, VariationFailure};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::client::{GenerateError, GenerationRequest, ImageGenerator};
use crate::postprocess::{process, ProcessError};
use crate::prompt::{assemble, TemplateError};

const MAX_NAME_CHARS: usize = 40;
const FALLBACK_NAME: &str = "untitled";
const NOTES_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("variation {variation} failed")]
    Generate {
        variation: u32,
        #[source]
        source: GenerateError,
    },

    #[error("variation {variation} could not be saved")]
    Process {
        variation: u32,
        #[source]
        source: ProcessError,
    },

    #[error("failed to update manifest {}: {error:#}", path.display())]
    Manifest { path: PathBuf, error: anyhow::Error },

    #[error("variations must be at least 1")]
    InvalidVariations,

    #[error("generation client setup failed")]
    Client(#[source] GenerateError),
}

/// What to do when one variation fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    #[default]
    FailFast,
    KeepGoing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    pub run_id: String,
    pub asset_type: String,
    pub description: String,
    pub output_dir: PathBuf,
    pub variations: u32,
    /// `None` uses the asset type's `transparent_default`.
    pub transparent: Option<bool>,
    pub reference: Option<PathBuf>,
    pub dry_run: bool,
    pub policy: FailurePolicy,
}

impl AssetRequest {
    pub fn new(asset_type: &str, description: &str, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: new_run_id(),
            asset_type: asset_type.to_string(),
            description: description.to_string(),
            output_dir: output_dir.into(),
            variations: 1,
            transparent: None,
            reference: None,
            dry_run: false,
            policy: FailurePolicy::FailFast,
        }
    }
}

/// `--no-transparent` beats `--transparent` beats the type default.
pub fn resolve_transparency(force_on: bool, force_off: bool) -> Option<bool> {
    if force_off {
        Some(false)
    } else if force_on {
        Some(true)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedOutput {
    pub variation: u32,
    pub filename: String,
    pub path: PathBuf,
}

/// Everything a dry run reports: no credentials, network, or disk involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DryRunReport {
    pub asset_type: String,
    pub display_name: String,
    pub description: String,
    pub prompt: String,
    pub aspect_ratio: String,
    pub target_size: (u32, u32),
    pub transparent: bool,
    pub reference: Option<PathBuf>,
    pub variations: u32,
    pub manifest_path: PathBuf,
    pub outputs: Vec<PlannedOutput>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    DryRun(DryRunReport),
    Generated(RunSummary),
}

pub struct Orchestrator {
    registry: AssetTypeRegistry,
    style: StyleFragments,
    events: Arc<dyn EventSink>,
}

impl Orchestrator {
    pub fn new(
        registry: AssetTypeRegistry,
        style: StyleFragments,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            style,
            events,
        }
    }

    /// Validates the request and computes the prompt and output paths.
    pub fn plan(&self, request: &AssetRequest) -> Result<DryRunReport, AssetError> {
        if request.variations == 0 {
            return Err(AssetError::InvalidVariations);
        }
        let config = self.registry.get(&request.asset_type)?;
        let transparent = request.transparent.unwrap_or(config.transparent_default);
        let prompt = assemble(&self.style, config, &request.description, transparent)?;

        let subdir = request
            .output_dir
            .join(config.output_subdir(&request.asset_type));
        let name = sanitize_filename(&request.description);
        let outputs = (1..=request.variations)
            .map(|variation| {
                let filename = output_filename(&request.asset_type, &name, variation);
                PlannedOutput {
                    variation,
                    path: subdir.join(&filename),
                    filename,
                }
            })
            .collect();

        Ok(DryRunReport {
            asset_type: request.asset_type.clone(),
            display_name: config.display_name.clone(),
            description: request.description.clone(),
            prompt,
            aspect_ratio: config.aspect_ratio.clone(),
            target_size: config.default_size,
            transparent,
            reference: request.reference.clone(),
            variations: request.variations,
            manifest_path: request.output_dir.join(MANIFEST_FILENAME),
            outputs,
        })
    }

    /// Runs the request. `connect` receives the resolved API key and is only
    /// called in live mode.
    pub fn run<G, F>(
        &self,
        request: &AssetRequest,
        credentials: &dyn CredentialSource,
        connect: F,
    ) -> Result<RunOutcome, AssetError>
    where
        G: ImageGenerator,
        F: FnOnce(String) -> Result<G, GenerateError>,
    {
        let plan = self.plan(request)?;
        if request.dry_run {
            self.emit("dry_run", json!({
                "asset_type": plan.asset_type,
                "variations": plan.variations,
            }));
            return Ok(RunOutcome::DryRun(plan));
        }

        let api_key = credentials.api_key()?;
        let generator = connect(api_key).map_err(AssetError::Client)?;
        let config = self.registry.get(&request.asset_type)?;

        let mut summary = RunSummary::start(
            &request.run_id,
            &request.asset_type,
            &request.description,
            request.variations,
        );
        self.emit("run_started", json!({
            "run_id": summary.run_id,
            "asset_type": request.asset_type,
            "description": request.description,
            "variations": request.variations,
            "model": generator.model_id(),
        }));

        let generation = GenerationRequest {
            prompt: plan.prompt.clone(),
            aspect_ratio: config.aspect_ratio.clone(),
            reference_image: request.reference.clone(),
        };

        for output in &plan.outputs {
            tracing::info!(
                "Generating variation {}/{}...",
                output.variation,
                plan.variations
            );
            self.emit("variation_started", json!({
                "variation": output.variation,
                "filename": output.filename,
            }));

            match self.produce(&generator, &generation, &plan, config, output) {
                Ok(entry) => {
                    append_entry(&plan.manifest_path, &entry).map_err(|error| {
                        AssetError::Manifest {
                            path: plan.manifest_path.clone(),
                            error,
                        }
                    })?;
                    self.report_saved(&entry, output);
                    summary.succeeded.push(entry);
                }
                Err(err) => {
                    let message = error_chain(&err);
                    self.emit("variation_failed", json!({
                        "variation": output.variation,
                        "filename": output.filename,
                        "error": message,
                    }));
                    // Aborting errors are reported once, by the caller.
                    if request.policy == FailurePolicy::FailFast || aborts_run(&err) {
                        return Err(err);
                    }
                    tracing::error!("{message}");
                    summary.failed.push(VariationFailure {
                        variation: output.variation,
                        filename: output.filename.clone(),
                        error: message,
                    });
                }
            }
        }

        summary.finish();
        self.emit("run_finished", json!({
            "run_id": summary.run_id,
            "succeeded": summary.succeeded.len(),
            "failed": summary.failed.len(),
        }));
        Ok(RunOutcome::Generated(summary))
    }

    fn produce<G: ImageGenerator>(
        &self,
        generator: &G,
        generation: &GenerationRequest,
        plan: &DryRunReport,
        config: &AssetTypeConfig,
        output: &PlannedOutput,
    ) -> Result<ManifestEntry, AssetError> {
        let variation = output.variation;
        let image = generator
            .generate(generation)
            .and_then(|response| response.extract_image())
            .map_err(|source| AssetError::Generate { variation, source })?;
        let meta = process(&image.bytes, &output.path, config.default_size)
            .map_err(|source| AssetError::Process { variation, source })?;

        let mut flags = BTreeSet::new();
        if plan.transparent {
            flags.insert(TRANSPARENT_FLAG.to_string());
        }
        Ok(ManifestEntry {
            filename: output.filename.clone(),
            path: output.path.to_string_lossy().to_string(),
            asset_type: plan.asset_type.clone(),
            description: plan.description.clone(),
            prompt_used: plan.prompt.clone(),
            model_id: generator.model_id().to_string(),
            model_text: image.model_text,
            generated_at: now_utc_iso(),
            dimensions: config.dimensions(),
            aspect_ratio: config.aspect_ratio.clone(),
            flags,
            original_size: meta.original_size,
            file_size_bytes: meta.file_size_bytes,
            promoted: false,
            promoted_to: None,
        })
    }

    fn report_saved(&self, entry: &ManifestEntry, output: &PlannedOutput) {
        tracing::info!("  Saved: {}", output.path.display());
        tracing::info!("  Size: {} bytes", entry.file_size_bytes);
        if !entry.model_text.is_empty() {
            let notes = entry
                .model_text
                .chars()
                .take(NOTES_PREVIEW_CHARS)
                .collect::<String>();
            tracing::info!("  Model notes: {notes}");
        }
        self.emit("variation_saved", json!({
            "variation": output.variation,
            "path": entry.path,
            "file_size_bytes": entry.file_size_bytes,
            "original_size": [entry.original_size.0, entry.original_size.1],
        }));
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let payload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        self.events.emit(event_type, payload);
    }
}

/// Errors that would repeat identically on every remaining variation.
fn aborts_run(err: &AssetError) -> bool {
    matches!(
        err,
        AssetError::Generate {
            source: GenerateError::Auth { .. } | GenerateError::Connection(_),
            ..
        }
    )
}

/// Renders an error and its sources as one `a: b: c` line.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Filename-safe form of a free-text description: lowercase, `[a-z0-9_]` only,
/// runs of whitespace or hyphens collapsed to one `_`, at most 40 characters.
/// Underscores already in the description are kept as they are.
pub fn sanitize_filename(description: &str) -> String {
    let mut out = String::with_capacity(description.len().min(MAX_NAME_CHARS));
    let mut in_separator = false;
    for ch in description.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
            in_separator = false;
        } else if (ch.is_whitespace() || ch == '-') && !in_separator {
            out.push('_');
            in_separator = true;
        }
    }
    out.truncate(MAX_NAME_CHARS);
    if out.is_empty() {
        return FALLBACK_NAME.to_string();
    }
    out
}

fn output_filename(asset_type: &str, name: &str, variation: u32) -> String {
    format!("{asset_type}_{name}_{variation:03}.png")
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    use assetforge_contracts::credentials::StaticCredential;
    use assetforge_contracts::events::MemorySink;
    use assetforge_contracts::runs::manifest::Manifest;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
    use indexmap::IndexMap;

    use super::*;
    use crate::client::{GeminiClient, GeminiConfig, HttpReply, Sleeper, Transport, TransportFailure};
    use crate::response::GenerationResponse;

    struct ScriptedGenerator {
        replies: RefCell<VecDeque<Result<GenerationResponse, GenerateError>>>,
        calls: Cell<usize>,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<Result<GenerationResponse, GenerateError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                calls: Cell::new(0),
            }
        }
    }

    impl ImageGenerator for &ScriptedGenerator {
        fn model_id(&self) -> &str {
            "test-model"
        }

        fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResponse, GenerateError> {
            self.calls.set(self.calls.get() + 1);
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(GenerateError::Transport("script exhausted".to_string())))
        }
    }

    fn image_reply(width: u32, height: u32) -> anyhow::Result<GenerationResponse> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 120, 30, 255]));
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img).write_to(&mut png, ImageFormat::Png)?;
        Ok(serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "A fiery dragon."},
                    {"inlineData": {"mimeType": "image/png", "data": BASE64.encode(png.into_inner())}}
                ]},
                "finishReason": "STOP"
            }]
        }))?)
    }

    fn registry() -> anyhow::Result<AssetTypeRegistry> {
        let mut types = IndexMap::new();
        types.insert(
            "monster".to_string(),
            AssetTypeConfig {
                display_name: "Monster".to_string(),
                prompt_template: "A {description} creature".to_string(),
                framing: "Full body".to_string(),
                technical_params: "Clean edges.".to_string(),
                aspect_ratio: "1:1".to_string(),
                default_size: (48, 48),
                transparent_default: true,
                output_subdir: Some("monsters".to_string()),
            },
        );
        types.insert(
            "background".to_string(),
            AssetTypeConfig {
                display_name: "Background".to_string(),
                prompt_template: "{description}".to_string(),
                framing: String::new(),
                technical_params: String::new(),
                aspect_ratio: "16:9".to_string(),
                default_size: (64, 36),
                transparent_default: false,
                output_subdir: None,
            },
        );
        Ok(AssetTypeRegistry::new(types)?)
    }

    fn orchestrator(events: Arc<MemorySink>) -> anyhow::Result<Orchestrator> {
        Ok(Orchestrator::new(registry()?, StyleFragments::default(), events))
    }

    fn no_network(_key: String) -> Result<&'static ScriptedGenerator, GenerateError> {
        panic!("no generator may be built here")
    }

    #[test]
    fn two_variations_produce_numbered_files_and_entries() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = Arc::new(MemorySink::new());
        let generator =
            ScriptedGenerator::new(vec![Ok(image_reply(96, 96)?), Ok(image_reply(30, 40)?)]);
        let mut request = AssetRequest::new("monster", "Fire Dragon", temp.path());
        request.variations = 2;

        let outcome = orchestrator(events.clone())?.run(
            &request,
            &StaticCredential("secret".to_string()),
            |key| {
                assert_eq!(key, "secret");
                Ok(&generator)
            },
        )?;

        let RunOutcome::Generated(summary) = outcome else {
            panic!("expected a live run");
        };
        assert!(summary.is_complete_success());
        assert_eq!(generator.calls.get(), 2);

        let manifest = Manifest::load(temp.path().join(MANIFEST_FILENAME));
        let entries = manifest.typed_entries();
        let names = entries.iter().map(|e| e.filename.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["monster_fire_dragon_001.png", "monster_fire_dragon_002.png"]);
        for entry in &entries {
            let path = temp.path().join("monsters").join(&entry.filename);
            assert_eq!(image::open(&path)?.dimensions(), (48, 48));
            assert_eq!(entry.path, path.to_string_lossy());
            assert_eq!(entry.dimensions, "48x48");
            assert_eq!(entry.model_id, "test-model");
            assert_eq!(entry.model_text, "A fiery dragon.");
            assert!(entry.flags.contains(TRANSPARENT_FLAG));
            assert!(entry.prompt_used.starts_with("Subject: A Fire Dragon creature"));
            assert!(!entry.promoted);
        }
        assert_eq!(entries[0].original_size, (96, 96));
        assert_eq!(entries[1].original_size, (30, 40));
        assert_eq!(events.of_type("variation_saved").len(), 2);
        assert_eq!(events.of_type("run_finished")[0]["succeeded"], json!(2));
        Ok(())
    }

    struct StatusTransport {
        status: u16,
        calls: Cell<usize>,
    }

    impl Transport for &StatusTransport {
        fn post_json(
            &self,
            _endpoint: &str,
            _api_key: &str,
            _payload: &Value,
        ) -> Result<HttpReply, TransportFailure> {
            self.calls.set(self.calls.get() + 1);
            Ok(HttpReply {
                status: self.status,
                body: "{}".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct CountingSleeper {
        sleeps: Cell<usize>,
    }

    impl Sleeper for &CountingSleeper {
        fn sleep(&self, _duration: Duration) {
            self.sleeps.set(self.sleeps.get() + 1);
        }
    }

    #[test]
    fn unauthorized_aborts_without_retry_or_manifest() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = Arc::new(MemorySink::new());
        let transport = StatusTransport {
            status: 401,
            calls: Cell::new(0),
        };
        let sleeper = CountingSleeper::default();
        let mut request = AssetRequest::new("monster", "Fire Dragon", temp.path());
        request.variations = 2;
        request.policy = FailurePolicy::KeepGoing;

        let sink: Arc<dyn EventSink> = events.clone();
        let result = orchestrator(events.clone())?.run(
            &request,
            &StaticCredential("bad-key".to_string()),
            |key| {
                Ok(GeminiClient::with_parts(
                    key,
                    GeminiConfig::default(),
                    &transport,
                    &sleeper,
                    sink,
                ))
            },
        );

        assert!(matches!(
            result,
            Err(AssetError::Generate {
                variation: 1,
                source: GenerateError::Auth { status: 401 }
            })
        ));
        assert_eq!(transport.calls.get(), 1);
        assert_eq!(sleeper.sleeps.get(), 0);
        assert!(!temp.path().join(MANIFEST_FILENAME).exists());
        Ok(())
    }

    #[test]
    fn dry_run_needs_no_credential_and_writes_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let output_dir = temp.path().join("out");
        let mut request = AssetRequest::new("background", "Misty Forest", &output_dir);
        request.variations = 3;
        request.dry_run = true;

        let outcome = orchestrator(Arc::new(MemorySink::new()))?.run(
            &request,
            &StaticCredential(String::new()),
            no_network,
        )?;

        let RunOutcome::DryRun(report) = outcome else {
            panic!("expected a dry run");
        };
        assert_eq!(report.display_name, "Background");
        assert_eq!(report.prompt, "Subject: Misty Forest");
        assert_eq!(report.target_size, (64, 36));
        assert!(!report.transparent);
        assert_eq!(
            report.outputs[2].path,
            output_dir.join("background").join("background_misty_forest_003.png")
        );
        assert!(!output_dir.exists());
        Ok(())
    }

    #[test]
    fn missing_credential_aborts_before_any_request() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let request = AssetRequest::new("monster", "Imp", temp.path());
        let result = orchestrator(Arc::new(MemorySink::new()))?.run(
            &request,
            &StaticCredential("  ".to_string()),
            no_network,
        );
        assert!(matches!(
            result,
            Err(AssetError::Config(ConfigError::MissingCredential { .. }))
        ));
        Ok(())
    }

    #[test]
    fn fail_fast_keeps_earlier_rounds() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let generator = ScriptedGenerator::new(vec![
            Ok(image_reply(48, 48)?),
            Err(GenerateError::RateLimitExceeded { attempts: 3 }),
            Ok(image_reply(48, 48)?),
        ]);
        let mut request = AssetRequest::new("monster", "Imp", temp.path());
        request.variations = 3;

        let result = orchestrator(Arc::new(MemorySink::new()))?.run(
            &request,
            &StaticCredential("k".to_string()),
            |_| Ok(&generator),
        );

        assert!(matches!(result, Err(AssetError::Generate { variation: 2, .. })));
        assert_eq!(generator.calls.get(), 2);
        let entries = Manifest::load(temp.path().join(MANIFEST_FILENAME)).typed_entries();
        assert_eq!(entries.len(), 1);
        assert!(temp.path().join("monsters").join("monster_imp_001.png").exists());
        Ok(())
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .map_err(|_| std::io::Error::other("log buffer poisoned"))?
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn text(&self) -> String {
            self.0
                .lock()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default()
        }
    }

    fn run_with_logs(
        policy: FailurePolicy,
        dir: &Path,
        events: Arc<MemorySink>,
    ) -> anyhow::Result<(Result<RunOutcome, AssetError>, String)> {
        let generator = ScriptedGenerator::new(vec![
            Err(GenerateError::RateLimitExceeded { attempts: 3 }),
            Ok(image_reply(48, 48)?),
        ]);
        let mut request = AssetRequest::new("monster", "Imp", dir);
        request.variations = 2;
        request.policy = policy;

        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let orchestrator = orchestrator(events)?;
        let result = tracing::subscriber::with_default(subscriber, || {
            orchestrator.run(&request, &StaticCredential("k".to_string()), |_| Ok(&generator))
        });
        Ok((result, logs.text()))
    }

    #[test]
    fn fail_fast_leaves_error_reporting_to_the_caller() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = Arc::new(MemorySink::new());
        let (result, logs) = run_with_logs(FailurePolicy::FailFast, temp.path(), events.clone())?;

        let err = match result {
            Err(err) => err,
            Ok(_) => anyhow::bail!("expected the run to abort"),
        };
        assert!(!logs.contains("ERROR"), "unexpected error log: {logs}");
        let failed = events.of_type("variation_failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["error"], error_chain(&err));
        assert!(events.of_type("run_finished").is_empty());

        let temp = tempfile::tempdir()?;
        let (result, logs) =
            run_with_logs(FailurePolicy::KeepGoing, temp.path(), Arc::new(MemorySink::new()))?;
        assert!(result.is_ok());
        assert_eq!(logs.matches("ERROR").count(), 1);
        Ok(())
    }

    #[test]
    fn keep_going_collects_failures_per_variation() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = Arc::new(MemorySink::new());
        let generator = ScriptedGenerator::new(vec![
            Ok(image_reply(48, 48)?),
            Err(GenerateError::NoImage {
                finish_reason: Some("SAFETY".to_string()),
                model_text: "cannot draw that".to_string(),
            }),
            Ok(image_reply(48, 48)?),
        ]);
        let mut request = AssetRequest::new("monster", "Imp", temp.path());
        request.variations = 3;
        request.policy = FailurePolicy::KeepGoing;
        request.transparent = Some(false);

        let outcome = orchestrator(events.clone())?.run(
            &request,
            &StaticCredential("k".to_string()),
            |_| Ok(&generator),
        )?;

        let RunOutcome::Generated(summary) = outcome else {
            panic!("expected a live run");
        };
        assert_eq!(summary.succeeded.len(), 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].variation, 2);
        assert_eq!(summary.failed[0].filename, "monster_imp_002.png");
        assert!(summary.failed[0].error.contains("SAFETY"));
        assert!(!summary.is_complete_success());
        assert!(summary.succeeded.iter().all(|entry| entry.flags.is_empty()));

        let names = Manifest::load(temp.path().join(MANIFEST_FILENAME))
            .typed_entries()
            .into_iter()
            .map(|entry| entry.filename)
            .collect::<Vec<_>>();
        assert_eq!(names, ["monster_imp_001.png", "monster_imp_003.png"]);
        assert_eq!(events.of_type("variation_failed").len(), 1);
        Ok(())
    }

    #[test]
    fn invalid_requests_are_configuration_errors() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let orchestrator = orchestrator(Arc::new(MemorySink::new()))?;

        let mut zero = AssetRequest::new("monster", "Imp", temp.path());
        zero.variations = 0;
        assert!(matches!(orchestrator.plan(&zero), Err(AssetError::InvalidVariations)));

        let unknown = AssetRequest::new("vehicle", "Cart", temp.path());
        match orchestrator.plan(&unknown) {
            Err(err @ AssetError::Config(ConfigError::UnknownAssetType { .. })) => {
                assert_eq!(
                    err.to_string(),
                    "unknown asset type 'vehicle'. Valid types: monster, background"
                );
            }
            other => panic!("expected unknown type, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn transparency_flags_resolve_in_precedence_order() -> anyhow::Result<()> {
        assert_eq!(resolve_transparency(false, false), None);
        assert_eq!(resolve_transparency(true, false), Some(true));
        assert_eq!(resolve_transparency(true, true), Some(false));

        let temp = tempfile::tempdir()?;
        let orchestrator = orchestrator(Arc::new(MemorySink::new()))?;
        let mut request = AssetRequest::new("background", "Sky", temp.path());
        assert!(!orchestrator.plan(&request)?.transparent);
        request.transparent = resolve_transparency(true, false);
        let plan = orchestrator.plan(&request)?;
        assert!(plan.transparent);
        assert!(plan.prompt.contains("Technical: Transparent/alpha background"));
        Ok(())
    }

    #[test]
    fn sanitize_produces_short_safe_names() {
        assert_eq!(sanitize_filename("Fire Dragon"), "fire_dragon");
        assert_eq!(sanitize_filename("Ice-Golem  of__the north"), "ice_golem_of__the_north");
        assert_eq!(sanitize_filename("a_ b"), "a__b");
        assert_eq!(sanitize_filename("snake_case - name"), "snake_case_name");
        assert_eq!(sanitize_filename("Café au lait!"), "caf_au_lait");
        assert_eq!(sanitize_filename("?!"), FALLBACK_NAME);

        let long = "An extraordinarily long description of a very ornate treasure chest";
        for input in [long, "Tabs\tand\nnewlines", "ÜBER-Schwert #3", long] {
            let name = sanitize_filename(input);
            assert!(name.len() <= MAX_NAME_CHARS);
            assert!(name
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_'));
            assert_eq!(name, sanitize_filename(input));
        }
    }

    #[test]
    fn error_chain_includes_sources() {
        let err = AssetError::Generate {
            variation: 2,
            source: GenerateError::Timeout { attempts: 3 },
        };
        assert_eq!(
            error_chain(&err),
            "variation 2 failed: request timed out after 3 attempts"
        );
    }
}
