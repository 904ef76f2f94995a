use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use keepsake_contracts::credentials::{
    Credential, CredentialProvider, EnvCredentialProvider, StaticCredentialProvider,
};
use keepsake_contracts::errors::CollageError;
use keepsake_contracts::events::EventLog;
use keepsake_contracts::runs::summary::{read_summary, write_summary};
use keepsake_contracts::scenarios::{SCENARIOS, SCENARIO_COUNT};
use keepsake_contracts::settings::{CollageSettings, ConcurrencyMode};
use keepsake_engine::{
    default_provider_registry, export_png, preprocess_batch, CollageCompositor, CollageSession,
    RawPhoto,
};
use serde_json::{json, Map};

const DRYRUN_MODEL: &str = "dryrun-image-1";
const PROGRESS_BAR_WIDTH: usize = 20;

#[derive(Debug, Parser)]
#[command(name = "keepsake", version, about = "Christmas baby portrait collage generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate all ten scenario portraits and the tree collage.
    Generate(GenerateArgs),
    /// Downscale and re-encode photos the way generation would.
    Preprocess(PreprocessArgs),
    /// List the scenario catalog.
    Scenarios(ScenariosArgs),
    /// Re-render a collage from an earlier run.
    Compose(ComposeArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long = "photo", required = true)]
    photos: Vec<PathBuf>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    /// sequential, batched[:N] or parallel[:N]
    #[arg(long)]
    concurrency: Option<ConcurrencyMode>,
    /// Use the offline placeholder provider; no credential needed.
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    template: Option<PathBuf>,
    #[arg(long, default_value_t = 1)]
    scale: u32,
}

#[derive(Debug, Parser)]
struct PreprocessArgs {
    #[arg(long = "photo", required = true)]
    photos: Vec<PathBuf>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ScenariosArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct ComposeArgs {
    #[arg(long)]
    run: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    template: Option<PathBuf>,
    #[arg(long, default_value_t = 1)]
    scale: u32,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("keepsake error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Preprocess(args) => run_preprocess(args),
        Command::Scenarios(args) => run_scenarios(args),
        Command::Compose(args) => run_compose(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut settings = CollageSettings::load(args.settings.as_deref())?;
    if let Some(model) = args.model {
        settings.model = model;
    }
    if let Some(mode) = args.concurrency {
        settings.concurrency = mode;
    }
    if args.dry_run {
        settings.model = DRYRUN_MODEL.to_string();
    }

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let run_id = format!("run-{}", compact_timestamp());
    let events_path = args
        .events
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let events = EventLog::to_file(events_path, run_id);
    let credentials: Box<dyn CredentialProvider> = if args.dry_run {
        Box::new(StaticCredentialProvider::new(Credential::new("dryrun")))
    } else {
        Box::new(PromptCredentialProvider::default())
    };
    let providers = default_provider_registry(&settings);
    let mut session = CollageSession::from_settings(settings, credentials, events, &providers)?;
    if let Some(reason) = &session.selection().fallback_reason {
        eprintln!("{reason}");
    }
    println!(
        "Model: {} | concurrency: {}",
        session.selection().model.name,
        session.settings().concurrency
    );

    let photos = args
        .photos
        .iter()
        .map(|path| RawPhoto::from_path(path))
        .collect::<Result<Vec<RawPhoto>>>()?;

    let started = Instant::now();
    let mut stdout = io::stdout();
    let outcome = session.start(&photos, &mut |completed| {
        let _ = write!(stdout, "\r{}", progress_line(completed, SCENARIO_COUNT));
        let _ = stdout.flush();
    });
    match outcome {
        Ok(_) => println!(),
        Err(CollageError::MissingCredential) => {
            eprintln!("{}", CollageError::MissingCredential);
            return Ok(2);
        }
        Err(err) => return Err(err.into()),
    }

    let summary = session
        .summary()
        .context("generation finished without a summary")?;
    let mut extra = Map::new();
    extra.insert(
        "elapsed_ms".to_string(),
        json!(started.elapsed().as_millis() as u64),
    );
    extra.insert("photos".to_string(), json!(photos.len()));
    write_summary(&args.out.join("summary.json"), &summary, Some(&extra))?;

    let collage_path = args.out.join("collage.png");
    let compositor = build_compositor(args.template.as_deref(), args.scale)?;
    export_png(&compositor.render(&summary.results), &collage_path)?;
    let (width, height) = compositor.dimensions();
    let exported = json!({
        "path": collage_path.to_string_lossy(),
        "width": width,
        "height": height,
        "placeholder_tiles": summary.failed,
    });
    session
        .events()
        .emit("collage_exported", exported.as_object().cloned().unwrap_or_default())?;

    if summary.failed > 0 {
        println!(
            "{} of {} portraits failed and show a placeholder tile.",
            summary.failed, SCENARIO_COUNT
        );
    }
    println!("Collage written to {}", collage_path.display());
    Ok(if summary.succeeded == 0 { 1 } else { 0 })
}

fn run_preprocess(args: PreprocessArgs) -> Result<i32> {
    let settings = CollageSettings::load(args.settings.as_deref())?;
    let photos = args
        .photos
        .iter()
        .map(|path| RawPhoto::from_path(path))
        .collect::<Result<Vec<RawPhoto>>>()?;
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;

    let (encoded, rejected) = preprocess_batch(&photos, &settings, &EventLog::disabled());
    for err in &rejected {
        eprintln!("skipped: {err}");
    }
    for (position, image) in encoded.iter().enumerate() {
        let bytes = BASE64
            .decode(image.payload.as_bytes())
            .with_context(|| format!("invalid payload for {}", image.id))?;
        let path = args.out.join(format!("{position:02}.jpg"));
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        println!("{} {}x{}", path.display(), image.width, image.height);
    }
    Ok(if rejected.is_empty() { 0 } else { 1 })
}

fn run_scenarios(args: ScenariosArgs) -> Result<i32> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(&SCENARIOS)?);
        return Ok(0);
    }
    for scenario in SCENARIOS.iter() {
        println!("{:>2}. {}", scenario.index + 1, scenario.text);
    }
    Ok(0)
}

fn run_compose(args: ComposeArgs) -> Result<i32> {
    let summary_path = args.run.join("summary.json");
    let summary = read_summary(&summary_path)?;
    let compositor = build_compositor(args.template.as_deref(), args.scale)?;
    export_png(&compositor.render(&summary.results), &args.out)?;
    println!(
        "Collage for {} written to {}",
        summary.run_id,
        args.out.display()
    );
    Ok(0)
}

fn build_compositor(template: Option<&Path>, scale: u32) -> Result<CollageCompositor> {
    let compositor = CollageCompositor::new(scale);
    let Some(path) = template else {
        return Ok(compositor);
    };
    let image = image::open(path)
        .with_context(|| format!("failed to open template {}", path.display()))?;
    Ok(compositor.with_template(&image))
}

fn progress_line(completed: usize, total: usize) -> String {
    let total = total.max(1);
    let completed = completed.min(total);
    let filled = completed * PROGRESS_BAR_WIDTH / total;
    format!(
        "[{}{}] {completed}/{total} ({}%)",
        "#".repeat(filled),
        ".".repeat(PROGRESS_BAR_WIDTH - filled),
        completed * 100 / total
    )
}

fn compact_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

/// Environment first; otherwise asks once on an interactive stdin and remembers the answer.
#[derive(Default)]
struct PromptCredentialProvider {
    env: EnvCredentialProvider,
    typed: Mutex<Option<Credential>>,
}

impl CredentialProvider for PromptCredentialProvider {
    fn credential(&self) -> Option<Credential> {
        self.env
            .credential()
            .or_else(|| self.typed.lock().ok().and_then(|typed| typed.clone()))
    }

    fn request_credential(&self) {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return;
        }
        eprint!("Gemini API key: ");
        let _ = io::stderr().flush();
        let Some(credential) = read_credential(&mut stdin.lock()) else {
            return;
        };
        if let Ok(mut typed) = self.typed.lock() {
            *typed = Some(credential);
        }
    }
}

fn read_credential(reader: &mut dyn BufRead) -> Option<Credential> {
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    Credential::new(line)
}
