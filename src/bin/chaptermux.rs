use std::{path::PathBuf, sync::Arc};

use chaptermux::{
    Background, BorderStyle, ChapterPlan, ConversionJob, ConversionOptions, ConversionReport,
    Converter, FfmpegLogLevel, FfmpegMetadataSource, Glow, JobState, LayoutConfig,
    MetadataResolver, Rgb, Track, TrackInput,
};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tokio_stream::StreamExt;

const CLI_AFTER_HELP: &str = concat!(
    "Examples:\n",
    "  chaptermux convert *.flac --cover cover.jpg --out album.mkv --sort --progress\n",
    "  chaptermux convert 01.flac 02.flac --cover cover.png --out album.mkv --layout layout.toml\n",
    "  chaptermux inspect *.flac --json\n",
    "  chaptermux plan *.flac --ffmetadata\n",
    "  chaptermux completions zsh > _chaptermux",
);

#[derive(Debug, Parser)]
#[command(
    name = "chaptermux",
    version,
    about = "Turn an album of lossless tracks and a cover into one chaptered video",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert tracks and a cover into one chaptered video.
    #[command(
        about = "Build the chaptered video",
        after_help = concat!(
            "Examples:\n",
            "  chaptermux convert 01.flac 02.flac --cover cover.jpg --out album.mkv\n",
            "  chaptermux convert *.flac --cover cover.jpg --out album.mkv --sort --border white",
        )
    )]
    Convert(ConvertArgs),

    /// Print the resolved metadata of each track.
    #[command(
        about = "Show resolved track metadata",
        after_help = "Examples:\n  chaptermux inspect *.flac\n  chaptermux inspect *.flac --json"
    )]
    Inspect {
        /// Input tracks, in chapter order.
        #[arg(required = true)]
        tracks: Vec<PathBuf>,
        /// Sort tracks by file name.
        #[arg(long)]
        sort: bool,
        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the chapter table a conversion would write.
    #[command(
        about = "Show the chapter plan",
        after_help = concat!(
            "Examples:\n",
            "  chaptermux plan *.flac --sort\n",
            "  chaptermux plan *.flac --ffmetadata > chapters.txt",
        )
    )]
    Plan {
        /// Input tracks, in chapter order.
        #[arg(required = true)]
        tracks: Vec<PathBuf>,
        /// Sort tracks by file name.
        #[arg(long)]
        sort: bool,
        #[command(flatten)]
        layout: LayoutArgs,
        /// Print the table in FFMETADATA form.
        #[arg(long, conflicts_with = "json")]
        ffmetadata: bool,
        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
struct ConvertArgs {
    /// Input tracks, in chapter order.
    #[arg(required = true)]
    tracks: Vec<PathBuf>,
    /// Cover image.
    #[arg(long)]
    cover: PathBuf,
    /// Output file.
    #[arg(long, short)]
    out: PathBuf,
    /// Sort tracks by file name.
    #[arg(long)]
    sort: bool,
    #[command(flatten)]
    layout: LayoutArgs,
    /// Concurrent track workers (default: available cores, at most 4).
    #[arg(long)]
    workers: Option<usize>,
    /// Retries of a failed segment encode.
    #[arg(long, default_value_t = 1)]
    retries: u32,
    /// Directory for the job's temporary files.
    #[arg(long)]
    work_dir: Option<PathBuf>,
    /// ffmpeg executable (default: found on PATH).
    #[arg(long)]
    ffmpeg: Option<PathBuf>,
    /// Allow overwriting an existing output file.
    #[arg(long)]
    overwrite: bool,
    /// Show a progress bar.
    #[arg(long)]
    progress: bool,
    /// Print the result as machine-readable JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args, Clone, Default)]
struct LayoutArgs {
    /// Layout file (TOML). Flags below override its values.
    #[arg(long)]
    layout: Option<PathBuf>,
    /// Background: solid:#rrggbb, gradient:#rrggbb,#rrggbb or image:PATH.
    #[arg(long)]
    background: Option<String>,
    /// Cover border (none, white, black).
    #[arg(long)]
    border: Option<String>,
    /// Text colour (#rrggbb).
    #[arg(long)]
    text_color: Option<String>,
    /// Text glow: none, white:INTENSITY or black:INTENSITY.
    #[arg(long)]
    glow: Option<String>,
    /// Artist shown on every frame.
    #[arg(long)]
    artist: Option<String>,
    /// Album shown on every frame.
    #[arg(long)]
    album: Option<String>,
    /// Hide the artist line.
    #[arg(long)]
    hide_artist: bool,
    /// Hide the album line.
    #[arg(long)]
    hide_album: bool,
    /// Font file for the text.
    #[arg(long)]
    font: Option<PathBuf>,
}

fn parse_log_level(value: &str) -> Option<FfmpegLogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "quiet" => Some(FfmpegLogLevel::Quiet),
        "panic" => Some(FfmpegLogLevel::Panic),
        "fatal" => Some(FfmpegLogLevel::Fatal),
        "error" => Some(FfmpegLogLevel::Error),
        "warning" | "warn" => Some(FfmpegLogLevel::Warning),
        "info" => Some(FfmpegLogLevel::Info),
        "verbose" => Some(FfmpegLogLevel::Verbose),
        "debug" => Some(FfmpegLogLevel::Debug),
        "trace" => Some(FfmpegLogLevel::Trace),
        _ => None,
    }
}

fn parse_border(value: &str) -> Option<BorderStyle> {
    match value.to_ascii_lowercase().as_str() {
        "none" | "off" => Some(BorderStyle::None),
        "white" => Some(BorderStyle::White),
        "black" => Some(BorderStyle::Black),
        _ => None,
    }
}

fn parse_glow(value: &str) -> Result<Glow, Box<dyn std::error::Error>> {
    let trimmed = value.trim().to_ascii_lowercase();
    if trimmed == "none" || trimmed == "off" {
        return Ok(Glow::None);
    }

    let (color, intensity) = trimmed.split_once(':').unwrap_or((trimmed.as_str(), "0.5"));
    let intensity = intensity.parse::<f32>()?;
    match color {
        "white" => Ok(Glow::White { intensity }),
        "black" => Ok(Glow::Black { intensity }),
        _ => Err(format!("unsupported --glow: {value}").into()),
    }
}

fn parse_background(value: &str) -> Result<Background, Box<dyn std::error::Error>> {
    let (kind, argument) = value
        .split_once(':')
        .ok_or(format!("unsupported --background: {value}"))?;
    match kind.to_ascii_lowercase().as_str() {
        "solid" => Ok(Background::Solid {
            color: argument.parse()?,
        }),
        "gradient" => {
            let (from, to) = argument
                .split_once(',')
                .ok_or("gradient needs two colours: gradient:#rrggbb,#rrggbb")?;
            Ok(Background::Gradient {
                from: from.parse()?,
                to: to.parse()?,
            })
        }
        "image" => Ok(Background::Image {
            path: PathBuf::from(argument),
        }),
        _ => Err(format!("unsupported --background: {value}").into()),
    }
}

fn build_layout(args: &LayoutArgs) -> Result<LayoutConfig, Box<dyn std::error::Error>> {
    let mut layout = match &args.layout {
        Some(path) => LayoutConfig::load(path)?,
        None => LayoutConfig::default(),
    };

    if let Some(background) = &args.background {
        layout = layout.with_background(parse_background(background)?);
    }
    if let Some(border) = &args.border {
        let border = parse_border(border).ok_or(format!("unsupported --border: {border}"))?;
        layout = layout.with_border(border);
    }
    if let Some(color) = &args.text_color {
        layout = layout.with_text_color(color.parse::<Rgb>()?);
    }
    if let Some(glow) = &args.glow {
        layout = layout.with_glow(parse_glow(glow)?);
    }
    if let Some(artist) = &args.artist {
        layout = layout.with_artist_override(artist);
    }
    if let Some(album) = &args.album {
        layout = layout.with_album_override(album);
    }
    if args.hide_artist {
        layout = layout.with_show_artist(false);
    }
    if args.hide_album {
        layout = layout.with_show_album(false);
    }
    if let Some(font) = &args.font {
        layout = layout.with_font(font);
    }

    layout.validate()?;
    Ok(layout)
}

fn sort_tracks(tracks: &mut [PathBuf]) {
    tracks.sort_by_key(|path| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });
}

fn resolve_tracks(
    paths: &[PathBuf],
    layout: &LayoutConfig,
) -> Result<Vec<Track>, Box<dyn std::error::Error>> {
    let resolver = MetadataResolver::new(Arc::new(FfmpegMetadataSource));
    let tracks = paths
        .iter()
        .enumerate()
        .map(|(index, path)| resolver.resolve(index, &TrackInput::new(path), layout))
        .collect::<Result<Vec<_>, _>>()?;
    chaptermux::resolver::ensure_uniform_format(&tracks)?;
    Ok(tracks)
}

fn warn(message: String) {
    eprintln!("{} {}", "warning:".yellow().bold(), message.yellow());
}

fn plan_json(plan: &ChapterPlan) -> serde_json::Value {
    json!(
        plan.entries()
            .iter()
            .map(|entry| json!({
                "index": entry.index,
                "title": entry.title,
                "start_seconds": entry.start_seconds(),
                "end_seconds": entry.end_seconds(),
            }))
            .collect::<Vec<_>>()
    )
}

fn report_json(report: &ConversionReport) -> serde_json::Value {
    json!({
        "output": report.output.display().to_string(),
        "duration_seconds": report.total_duration.as_secs_f64(),
        "elapsed_seconds": report.elapsed.as_secs_f64(),
        "chapters": plan_json(&report.chapters),
        "warnings": report.validation.warnings,
    })
}

fn progress_bar(total: usize) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let bar = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} {bar:40.cyan/blue} {pos}/{len} tracks {msg} [{elapsed_precise}]",
    )?;
    bar.set_style(style.progress_chars("##-"));
    Ok(bar)
}

async fn convert(
    args: ConvertArgs,
    log_level: Option<FfmpegLogLevel>,
) -> Result<(), Box<dyn std::error::Error>> {
    let layout = build_layout(&args.layout)?;
    let mut tracks = args.tracks;
    if args.sort {
        sort_tracks(&mut tracks);
    }

    let mut options = ConversionOptions::new()
        .with_segment_retries(args.retries)
        .with_overwrite(args.overwrite);
    if let Some(workers) = args.workers {
        options = options.with_workers(workers);
    }
    if let Some(root) = &args.work_dir {
        options = options.with_work_root(root);
    }
    if let Some(level) = log_level {
        options = options.with_log_level(level);
    }
    match args.ffmpeg {
        Some(path) => options = options.with_ffmpeg_path(path),
        None if !chaptermux::is_ffmpeg_available() => {
            return Err("ffmpeg was not found on PATH (use --ffmpeg to point at it)".into());
        }
        None => {}
    }

    if args.out.exists() && args.overwrite {
        warn(format!("overwriting {}", args.out.display()));
    }

    let total = tracks.len();
    let job = ConversionJob::new(tracks, args.cover, args.out).with_layout(layout);
    let mut handle = Converter::with_ffmpeg(options).spawn(job);
    let mut events = handle.take_progress().ok_or("progress stream unavailable")?;

    let cancel = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn("interrupted, cancelling".to_string());
            cancel.cancel();
        }
    });

    let bar = if args.progress {
        Some(progress_bar(total)?)
    } else {
        None
    };
    while let Some(event) = events.next().await {
        if let Some(bar) = &bar {
            bar.set_position(event.tracks_completed as u64);
            bar.set_message(event.state.to_string());
        }
        if let JobState::Failed(kind) = event.state
            && let Some(bar) = &bar
        {
            bar.abandon_with_message(format!("failed ({kind})"));
        }
    }
    interrupt.abort();

    let report = handle.wait().await?;
    if let Some(bar) = bar {
        bar.finish_with_message("done");
    }

    for warning in &report.validation.warnings {
        warn(warning.clone());
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
    } else {
        print!("{}", report.chapters.describe());
        println!(
            "{} {}",
            "success:".green().bold(),
            format!(
                "Wrote {} ({} chapters) in {:.1?}",
                report.output.display(),
                report.chapters.len(),
                report.elapsed
            )
            .green()
        );
    }
    Ok(())
}

fn inspect(tracks: &[PathBuf], json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let tracks = resolve_tracks(tracks, &LayoutConfig::default())?;
    if json {
        let payload: Vec<_> = tracks
            .iter()
            .map(|track| {
                json!({
                    "path": track.source_path.display().to_string(),
                    "track_number": track.track_number,
                    "title": track.title,
                    "artist": track.artist,
                    "album": track.album,
                    "duration_seconds": track.duration.as_secs_f64(),
                    "codec": track.sample_format.codec,
                    "sample_rate": track.sample_format.sample_rate,
                    "channels": track.sample_format.channels,
                    "bits_per_sample": track.sample_format.bits_per_sample,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for track in &tracks {
            println!(
                "{:02}. {} - {} - {} [{:.3}s, {}]",
                track.track_number,
                track.title,
                track.artist,
                track.album,
                track.duration.as_secs_f64(),
                track.sample_format.describe(),
            );
        }
    }
    Ok(())
}

fn plan(
    tracks: &[PathBuf],
    layout: &LayoutArgs,
    ffmetadata: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let layout = build_layout(layout)?;
    let tracks = resolve_tracks(tracks, &layout)?;
    let plan = ChapterPlan::from_tracks(&tracks, &layout);
    if ffmetadata {
        print!("{}", plan.to_ffmetadata());
    } else if json {
        println!("{}", serde_json::to_string_pretty(&plan_json(&plan))?);
    } else {
        print!("{}", plan.describe());
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "chaptermux=debug" } else { "chaptermux=warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    let log_level = match &cli.global.log_level {
        Some(level) => {
            let parsed = parse_log_level(level).ok_or(format!("unsupported --log-level: {level}"))?;
            chaptermux::set_ffmpeg_log_level(parsed);
            Some(parsed)
        }
        None => None,
    };

    match cli.command {
        Commands::Convert(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(convert(args, log_level))?;
        }
        Commands::Inspect {
            mut tracks,
            sort,
            json,
        } => {
            if sort {
                sort_tracks(&mut tracks);
            }
            inspect(&tracks, json)?;
        }
        Commands::Plan {
            mut tracks,
            sort,
            layout,
            ffmetadata,
            json,
        } => {
            if sort {
                sort_tracks(&mut tracks);
            }
            plan(&tracks, &layout, ffmetadata, json)?;
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "chaptermux", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
