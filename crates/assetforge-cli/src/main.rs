use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use assetforge_contracts::assets::AssetTypeRegistry;
use assetforge_contracts::credentials::DotenvCredentials;
use assetforge_contracts::events::{EventSink, EventWriter, FanoutSink, TracingSink};
use assetforge_contracts::runs::summary::{write_summary, RunSummary};
use assetforge_engine::{
    resolve_transparency, AssetRequest, DryRunReport, FailurePolicy, GeminiClient, GeminiConfig,
    RunOutcome, SkillPaths,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "assetforge",
    version,
    about = "Generate game art assets from text descriptions"
)]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence).
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one or more variations of an asset.
    Generate(GenerateArgs),
    /// List the configured asset types.
    Types(TypesArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    /// Project root; `.env` and the default skill directory live here.
    #[arg(long, default_value = ".")]
    project_root: PathBuf,
    #[arg(long)]
    skill_dir: Option<PathBuf>,
    /// Asset type config, overriding `{skill_dir}/asset-types.json`.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Style reference, overriding `{skill_dir}/style-reference.md`.
    #[arg(long)]
    style: Option<PathBuf>,
}

impl ConfigArgs {
    fn skill_paths(&self) -> SkillPaths {
        SkillPaths::resolve(
            &self.project_root,
            self.skill_dir.as_deref(),
            self.config.as_deref(),
            self.style.as_deref(),
        )
    }
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long = "type")]
    asset_type: String,
    #[arg(long)]
    description: String,
    #[arg(long)]
    output_dir: PathBuf,
    #[command(flatten)]
    config: ConfigArgs,
    #[arg(long, default_value_t = 1)]
    variations: u32,
    /// Request a transparent background.
    #[arg(long)]
    transparent: bool,
    /// Force an opaque background; wins over --transparent.
    #[arg(long)]
    no_transparent: bool,
    /// Style reference image sent along with the prompt.
    #[arg(long)]
    reference: Option<PathBuf>,
    /// Print the prompt and planned outputs without calling the service.
    #[arg(long)]
    dry_run: bool,
    /// Continue with the remaining variations when one fails.
    #[arg(long)]
    keep_going: bool,
    #[arg(long)]
    model: Option<String>,
    /// Append structured pipeline events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Also write the run summary JSON here.
    #[arg(long)]
    summary: Option<PathBuf>,
}

impl GenerateArgs {
    fn to_request(&self) -> AssetRequest {
        let mut request = AssetRequest::new(&self.asset_type, &self.description, &self.output_dir);
        request.variations = self.variations;
        request.transparent = resolve_transparency(self.transparent, self.no_transparent);
        request.reference = self.reference.clone();
        request.dry_run = self.dry_run;
        request.policy = if self.keep_going {
            FailurePolicy::KeepGoing
        } else {
            FailurePolicy::FailFast
        };
        request
    }
}

#[derive(Debug, Args)]
struct TypesArgs {
    #[command(flatten)]
    config: ConfigArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("assetforge error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Types(args) => run_types(args),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let request = args.to_request();

    let mut sinks = FanoutSink::new().with(Arc::new(TracingSink));
    if let Some(path) = args.events.as_ref() {
        sinks = sinks.with(Arc::new(EventWriter::new(path, request.run_id.clone())));
    }
    let events: Arc<dyn EventSink> = Arc::new(sinks);

    let orchestrator = args.config.skill_paths().load_orchestrator(events.clone())?;
    let credentials = DotenvCredentials::for_project(&args.config.project_root);
    let mut gemini = GeminiConfig::from_env();
    if let Some(model) = args.model.as_ref() {
        gemini.model = model.clone();
    }

    let outcome = orchestrator.run(&request, &credentials, |api_key| {
        GeminiClient::new(api_key, gemini, events.clone())
    })?;

    match outcome {
        RunOutcome::DryRun(report) => {
            print!("{}", render_dry_run(&report));
            Ok(0)
        }
        RunOutcome::Generated(summary) => {
            if let Some(path) = args.summary.as_ref() {
                write_summary(path, &summary)
                    .with_context(|| format!("failed to write summary {}", path.display()))?;
                tracing::info!("summary written to {}", path.display());
            }
            println!("\n=== GENERATION_RESULT ===");
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(exit_code(&summary))
        }
    }
}

fn run_types(args: TypesArgs) -> Result<i32> {
    let registry = args.config.skill_paths().load_registry()?;
    print!("{}", render_types(&registry));
    Ok(0)
}

fn exit_code(summary: &RunSummary) -> i32 {
    if summary.is_complete_success() {
        0
    } else {
        1
    }
}

fn render_dry_run(report: &DryRunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== DRY RUN - Prompt ===");
    let _ = writeln!(out, "{}", report.prompt);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Asset type: {} ({})",
        report.asset_type, report.display_name
    );
    let _ = writeln!(out, "Aspect ratio: {}", report.aspect_ratio);
    let _ = writeln!(
        out,
        "Target size: {}x{}",
        report.target_size.0, report.target_size.1
    );
    let _ = writeln!(out, "Transparent: {}", report.transparent);
    if let Some(reference) = report.reference.as_ref() {
        let _ = writeln!(out, "Reference image: {}", reference.display());
    }
    let _ = writeln!(out, "Variations: {}", report.variations);
    let _ = writeln!(out, "Manifest: {}", report.manifest_path.display());
    let _ = writeln!(out, "Planned outputs:");
    for output in &report.outputs {
        let _ = writeln!(out, "  {}", output.path.display());
    }
    out
}

fn render_types(registry: &AssetTypeRegistry) -> String {
    let mut out = String::new();
    for (key, config) in registry.iter() {
        let _ = writeln!(
            out,
            "{key}\t{}\t{}\t{}\ttransparent={}",
            config.display_name,
            config.dimensions(),
            config.aspect_ratio,
            config.transparent_default
        );
    }
    out
}
