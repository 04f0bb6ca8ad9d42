use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::{json, Value};
use thumbforge_contracts::events::EventWriter;
use thumbforge_contracts::jobs::new_job_id;
use thumbforge_contracts::layout::Anchor;
use thumbforge_contracts::request::{GenerationRequest, PlacementHints, Priority, QualityTier, ReferenceImage};
use thumbforge_contracts::zones::{Canvas, Platform};
use thumbforge_engine::composition::{CompositionPlanner, CompositionRequest, Zone};
use thumbforge_engine::layout::{self, FitConstraints, TextStyle};
use thumbforge_engine::pipeline::PipelineOutcome;
use thumbforge_engine::queue::{DirJobQueue, JobQueue, RetryPolicy, Worker};
use thumbforge_engine::router::{BackendRouter, RoutingInput};
use thumbforge_engine::scoring::{QualityScorer, ScoringContext};
use thumbforge_engine::{BackendSet, EngineConfig, EngineError, ThumbforgeEngine};

#[derive(Debug, Parser)]
#[command(name = "thumbforge", version, about = "Thumbnail generation engine")]
struct Cli {
    /// Config JSON layered over ~/.thumbforge/config.json and THUMBFORGE_CONFIG.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    /// Target platform: youtube, youtube-mobile, shorts, instagram-square, twitter-card.
    #[arg(long, global = true)]
    platform: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one job in-process and write its variants.
    Generate(GenerateArgs),
    /// Add a job to a queue directory.
    Submit(SubmitArgs),
    /// Drain a queue directory.
    Worker(WorkerArgs),
    /// Text placement analysis for an existing image.
    Analyze(AnalyzeArgs),
    /// Fit headline text on a canvas.
    Fit(FitArgs),
    /// Quality score for an existing image.
    Score(ScoreArgs),
    /// Show the backend routing decision.
    Route(RouteArgs),
}

#[derive(Debug, Args)]
struct RequestArgs {
    /// Request JSON; flags below override its fields.
    #[arg(long)]
    request: Option<PathBuf>,
    #[arg(long)]
    brief: Option<String>,
    #[arg(long)]
    niche: Option<String>,
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    expression: Option<String>,
    #[arg(long)]
    text: Option<String>,
    /// Reference face image; repeatable.
    #[arg(long = "face")]
    faces: Vec<PathBuf>,
    #[arg(long)]
    variants: Option<u32>,
    #[arg(long)]
    tier: Option<String>,
    #[arg(long)]
    priority: Option<String>,
    #[arg(long)]
    text_zone: Option<String>,
    #[arg(long)]
    subject_position: Option<String>,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[command(flatten)]
    request: RequestArgs,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Use offline backends even when endpoints are configured.
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Args)]
struct SubmitArgs {
    #[command(flatten)]
    request: RequestArgs,
    #[arg(long)]
    queue: PathBuf,
}

#[derive(Debug, Args)]
struct WorkerArgs {
    #[arg(long)]
    queue: PathBuf,
    /// Handle at most one job.
    #[arg(long)]
    once: bool,
    #[arg(long)]
    max_jobs: Option<usize>,
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,
    #[arg(long, default_value_t = 30)]
    retry_base_s: u64,
    /// Seconds before a claimed job left in running/ is taken back.
    #[arg(long, default_value_t = 1800)]
    lease_s: u64,
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    text: Option<String>,
    #[arg(long, default_value_t = 120.0)]
    font_size: f64,
    #[arg(long)]
    zone: Option<String>,
}

#[derive(Debug, Args)]
struct FitArgs {
    #[arg(long)]
    text: String,
    /// Defaults to the configured output size.
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Named zone such as top-left or lower-center.
    #[arg(long)]
    zone: Option<String>,
    #[arg(long)]
    x: Option<f64>,
    #[arg(long)]
    y: Option<f64>,
    #[arg(long)]
    anchor: Option<String>,
}

#[derive(Debug, Args)]
struct ScoreArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    niche: Option<String>,
    #[arg(long)]
    text: Option<String>,
    /// Score as if a face was expected.
    #[arg(long)]
    face: bool,
}

#[derive(Debug, Args)]
struct RouteArgs {
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    niche: Option<String>,
    #[arg(long)]
    face: bool,
    #[arg(long, default_value = "quality")]
    priority: String,
    #[arg(long, default_value = "pro")]
    tier: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("thumbforge error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mut config = EngineConfig::load(cli.config.as_deref())?;
    apply_platform_flag(&mut config, cli.platform.as_deref())?;
    match cli.command {
        Command::Generate(args) => run_generate(args, config),
        Command::Submit(args) => run_submit(args),
        Command::Worker(args) => run_worker(args, config),
        Command::Analyze(args) => run_analyze(args, &config),
        Command::Fit(args) => run_fit(args, &config),
        Command::Score(args) => run_score(args, &config),
        Command::Route(args) => run_route(args, &config),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    // A second init (tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn apply_platform_flag(config: &mut EngineConfig, raw: Option<&str>) -> Result<()> {
    if let Some(raw) = raw {
        let platform = Platform::parse(raw).with_context(|| format!("unknown platform '{raw}'"))?;
        config.apply_platform(platform);
        tracing::debug!(
            %platform,
            width = config.output_width,
            height = config.output_height,
            "platform selected"
        );
    }
    Ok(())
}

fn build_engine(config: EngineConfig, dryrun: bool) -> Result<ThumbforgeEngine> {
    let tables = config.tables()?;
    let backends = if dryrun {
        BackendSet::dryrun(&tables.backends)
    } else {
        BackendSet::from_env(&tables.backends, config.http_timeout_s)?
    };
    tracing::debug!(backends = ?backends.ids(), "backends ready");
    Ok(ThumbforgeEngine::new(config, tables, backends))
}

fn build_request(args: &RequestArgs) -> Result<GenerationRequest> {
    let mut request = match &args.request {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading request {}", path.display()))?;
            serde_json::from_str::<GenerationRequest>(&raw)
                .with_context(|| format!("invalid request JSON in {}", path.display()))?
        }
        None => match &args.brief {
            Some(brief) => GenerationRequest::new(brief.clone()),
            None => bail!("either --request or --brief is required"),
        },
    };
    if let Some(brief) = &args.brief {
        request.brief = brief.clone();
    }
    override_opt(&mut request.niche, &args.niche);
    override_opt(&mut request.creator_style, &args.style);
    override_opt(&mut request.expression, &args.expression);
    override_opt(&mut request.text, &args.text);
    if let Some(count) = args.variants {
        request.variant_count = count;
    }
    if let Some(raw) = &args.tier {
        request.quality_tier =
            QualityTier::parse(raw).with_context(|| format!("unknown quality tier '{raw}'"))?;
    }
    if let Some(raw) = &args.priority {
        request.priority = Priority::parse(raw).with_context(|| format!("unknown priority '{raw}'"))?;
    }
    let placement: &mut PlacementHints = &mut request.placement;
    override_opt(&mut placement.text_zone, &args.text_zone);
    override_opt(&mut placement.subject_position, &args.subject_position);
    for path in &args.faces {
        let bytes = fs::read(path).with_context(|| format!("failed reading face {}", path.display()))?;
        request.reference_faces.push(ReferenceImage {
            bytes,
            mime: mime_for_path(path).to_string(),
        });
    }
    Ok(request)
}

fn override_opt(slot: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = value {
        *slot = Some(value.clone());
    }
}

fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

fn run_generate(args: GenerateArgs, config: EngineConfig) -> Result<i32> {
    let request = build_request(&args.request)?;
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed creating {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let events = EventWriter::new(events_path, new_job_id());
    let engine = build_engine(config, args.dryrun)?;

    match engine.generate(&request, &events) {
        Ok(outcome) => {
            let summary = write_outcome(&args.out, &outcome)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(0)
        }
        Err(err) => {
            let mut summary = json!({
                "job_id": events.job_id(),
                "status": "failed",
                "error": err.to_string(),
            });
            if let EngineError::AllPipelineVersionsFailed { failures, .. } = &err {
                summary["failures"] = json!(failures);
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(match err {
                EngineError::InvalidRequest(_) => 2,
                _ => 1,
            })
        }
    }
}

fn write_outcome(out: &Path, outcome: &PipelineOutcome) -> Result<Value> {
    let mut variants = Vec::with_capacity(outcome.variants.len());
    for variant in &outcome.variants {
        let ext = if variant.mime == "image/png" { "png" } else { "bin" };
        let path = out.join(format!("variant-{}.{ext}", variant.label));
        fs::write(&path, &variant.image).with_context(|| format!("failed writing {}", path.display()))?;
        let mut row = serde_json::to_value(variant)?;
        row["image_path"] = json!(path.to_string_lossy());
        variants.push(row);
    }
    let summary = json!({
        "status": "completed",
        "pipeline_version": outcome.pipeline_version,
        "variants": variants,
        "prior_failures": outcome.prior_failures,
        "warnings": outcome.warnings,
        "trace": outcome.trace.iter().map(|stage| stage.as_str()).collect::<Vec<_>>(),
    });
    let path = out.join("result.json");
    fs::write(&path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(summary)
}

fn run_submit(args: SubmitArgs) -> Result<i32> {
    let request = build_request(&args.request)?;
    if let Err(message) = request.validate() {
        bail!("invalid request: {message}");
    }
    let queue = DirJobQueue::open(&args.queue)?;
    let job_id = queue.submit(request)?;
    println!("{job_id}");
    Ok(0)
}

fn run_worker(args: WorkerArgs, config: EngineConfig) -> Result<i32> {
    let queue = DirJobQueue::open(&args.queue)?;
    let engine = build_engine(config, args.dryrun)?;
    let policy = RetryPolicy {
        max_attempts: args.max_attempts.max(1),
        base_delay: Duration::from_secs(args.retry_base_s),
        ..RetryPolicy::default()
    };
    let events = EventWriter::new(queue.events_path(), "worker");
    let worker = Worker::new(&engine, &queue, events)
        .with_policy(policy)
        .with_lease(Duration::from_secs(args.lease_s));
    let limit = if args.once { Some(1) } else { args.max_jobs };
    let summary = worker.run_until_idle(limit)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "completed": summary.completed,
            "requeued": summary.requeued,
            "failed": summary.failed,
        }))?
    );
    Ok(0)
}

fn run_analyze(args: AnalyzeArgs, config: &EngineConfig) -> Result<i32> {
    let bytes = fs::read(&args.image).with_context(|| format!("failed reading {}", args.image.display()))?;
    let request = CompositionRequest {
        text_len: args.text.as_deref().map(|text| text.chars().count()).unwrap_or(12),
        font_size: args.font_size,
        preferred_zone: args.zone.clone(),
        preferred_sides: Vec::new(),
        platform: config.layout.platform,
    };
    let analysis = CompositionPlanner::new(config.analysis.clone()).plan_bytes(&bytes, &request);
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(0)
}

fn run_fit(args: FitArgs, config: &EngineConfig) -> Result<i32> {
    let width = args.width.unwrap_or(config.output_width).max(1);
    let height = args.height.unwrap_or(config.output_height).max(1);
    let canvas = Canvas::new(width as f64, height as f64);
    let requested = match (&args.zone, args.x, args.y) {
        (Some(name), _, _) => {
            let zone = Zone::find(name).with_context(|| format!("unknown zone '{name}'"))?;
            layout::requested_position(zone.anchor, zone.fx * canvas.width, zone.fy * canvas.height)
        }
        (None, Some(x), Some(y)) => {
            let anchor = match &args.anchor {
                Some(raw) => Anchor::parse(raw).with_context(|| format!("unknown anchor '{raw}'"))?,
                None => Anchor::TopCenter,
            };
            layout::requested_position(anchor, x, y)
        }
        _ => bail!("pass --zone, or both --x and --y"),
    };
    let style = TextStyle {
        stroke_width: config.layout.stroke_width,
        ..TextStyle::default()
    };
    let constraints = FitConstraints::from(&config.layout).scaled_for(&canvas);
    let fitted = layout::fit(&args.text, &style, &requested, canvas, &constraints);
    println!("{}", serde_json::to_string_pretty(&fitted)?);
    Ok(if fitted.fits { 0 } else { 3 })
}

fn run_score(args: ScoreArgs, config: &EngineConfig) -> Result<i32> {
    let tables = config.tables()?;
    let bytes = fs::read(&args.image).with_context(|| format!("failed reading {}", args.image.display()))?;
    let composition = args.text.as_deref().map(|text| CompositionRequest {
        text_len: text.chars().count(),
        font_size: config.layout.max_font_size,
        platform: config.layout.platform,
        ..CompositionRequest::default()
    });
    let ctx = ScoringContext {
        style: tables.style(args.style.as_deref()),
        niche: tables.niche(args.niche.as_deref()),
        expects_face: args.face,
        composition: composition.as_ref(),
    };
    let scored = QualityScorer::new(config.analysis.clone()).score(&bytes, &ctx);
    println!("{}", serde_json::to_string_pretty(&scored.score)?);
    Ok(0)
}

fn run_route(args: RouteArgs, config: &EngineConfig) -> Result<i32> {
    let tables = config.tables()?;
    let input = RoutingInput {
        style: args.style.as_deref(),
        niche: args.niche.as_deref(),
        has_face: args.face,
        priority: Priority::parse(&args.priority)
            .with_context(|| format!("unknown priority '{}'", args.priority))?,
        tier: QualityTier::parse(&args.tier).with_context(|| format!("unknown quality tier '{}'", args.tier))?,
    };
    let decision = BackendRouter::new(&tables).route(&input)?;
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(0)
}
