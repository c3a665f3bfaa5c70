use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cadenza_engine::{
    available_audio_midi_drivers, sounds_from_list, AudioConfig, AudioEngine, BitDepth, FileFormat,
    ModuleDescriptor, OutputTarget, Session,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Render(args) => execute_render(args),
        Commands::Play(args) => execute_play(args),
        Commands::Info(args) => execute_info(args),
        Commands::Devices(args) => execute_devices(args),
    }
}

#[derive(Parser)]
#[command(author, version, about = "Command line front end for the Cadenza engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one pass of a project's timeline to a sound file.
    Render(RenderArgs),
    /// Perform a project on the audio device for one timeline pass.
    Play(PlayArgs),
    /// Print channel count, rate, and length of sound files as JSON.
    Info(InfoArgs),
    /// List audio and MIDI endpoints as JSON.
    Devices(DevicesArgs),
}

#[derive(Args)]
struct ProjectArgs {
    /// Project file (JSON) holding a session and an optional module.
    #[arg(long)]
    project: PathBuf,
    /// Override the project's sample rate.
    #[arg(long)]
    sample_rate: Option<f32>,
    /// Override the project's block size.
    #[arg(long)]
    buffer_size: Option<usize>,
    /// Master amplitude in decibels.
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    amp: f32,
}

#[derive(Args)]
struct RenderArgs {
    #[command(flatten)]
    project: ProjectArgs,
    /// Output sound file.
    #[arg(long)]
    output: PathBuf,
    /// Container of the output file; guessed from the extension when omitted.
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
    #[arg(long, value_enum, default_value_t = OutputDepth::Int24)]
    bit_depth: OutputDepth,
}

#[derive(Args)]
struct PlayArgs {
    #[command(flatten)]
    project: ProjectArgs,
    /// Output device name; the host default when omitted.
    #[arg(long)]
    device: Option<String>,
    /// Also capture the performance to this WAV file.
    #[arg(long)]
    record: Option<PathBuf>,
}

#[derive(Args)]
struct InfoArgs {
    /// Sound files to inspect.
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[derive(Args)]
struct DevicesArgs {
    /// Audio host to query instead of the default one.
    #[arg(long)]
    host: Option<String>,
}

#[derive(Copy, Clone, ValueEnum)]
enum OutputFormat {
    Wav,
    Aiff,
}

impl From<OutputFormat> for FileFormat {
    fn from(value: OutputFormat) -> Self {
        match value {
            OutputFormat::Wav => FileFormat::Wav,
            OutputFormat::Aiff => FileFormat::Aiff,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
enum OutputDepth {
    Int16,
    Int24,
    Int32,
    Float32,
}

impl From<OutputDepth> for BitDepth {
    fn from(value: OutputDepth) -> Self {
        match value {
            OutputDepth::Int16 => BitDepth::Int16,
            OutputDepth::Int24 => BitDepth::Int24,
            OutputDepth::Int32 => BitDepth::Int32,
            OutputDepth::Float32 => BitDepth::Float32,
        }
    }
}

#[derive(Deserialize)]
struct ProjectFile {
    session: Session,
    #[serde(default = "ModuleDescriptor::default_module")]
    module: ModuleDescriptor,
}

fn load_project(path: &Path) -> Result<ProjectFile> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read project file {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("{} is not a valid project file", path.display()))
}

fn prepare(args: &ProjectArgs, target: OutputTarget) -> Result<(AudioEngine, ProjectFile)> {
    let project = load_project(&args.project)?;
    let mut config: AudioConfig = project.session.audio.clone();
    if let Some(rate) = args.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(size) = args.buffer_size {
        config.buffer_size = size;
    }
    config.target = target;

    let mut engine = AudioEngine::new(config);
    engine.boot().context("failed to boot the engine")?;
    engine.set_amp(args.amp);
    engine
        .load_module(&project.session, &project.module)
        .with_context(|| format!("failed to load module '{}'", project.module.name))?;
    Ok((engine, project))
}

fn guess_format(path: &Path) -> Result<FileFormat> {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("wav" | "wave") => Ok(FileFormat::Wav),
        Some("aif" | "aiff") => Ok(FileFormat::Aiff),
        _ => bail!(
            "cannot tell the format of {}, pass --format",
            path.display()
        ),
    }
}

fn execute_render(args: RenderArgs) -> Result<()> {
    let format = match args.format {
        Some(format) => format.into(),
        None => guess_format(&args.output)?,
    };
    let target = OutputTarget::File {
        path: args.output.clone(),
        format,
        bit_depth: args.bit_depth.into(),
    };
    let (mut engine, project) = prepare(&args.project, target)?;
    engine.start(false).context("failed to start the render")?;
    engine
        .wait_until_stopped()
        .with_context(|| format!("failed to render {}", args.output.display()))?;
    engine.shutdown()?;

    println!(
        "Rendered '{}' ({:.2} s) to {}",
        project.module.name,
        project.session.duration(),
        args.output.display()
    );
    Ok(())
}

fn execute_play(args: PlayArgs) -> Result<()> {
    let (mut engine, project) = prepare(&args.project, OutputTarget::Device)?;
    if args.device.is_some() {
        engine.set_output_device(args.device.clone())?;
    }
    engine.start(true).context("failed to start the audio device")?;
    if let Some(path) = args.record.as_ref() {
        engine
            .rec_start(path)
            .with_context(|| format!("failed to record to {}", path.display()))?;
    }
    tracing::info!(
        module = %project.module.name,
        seconds = project.session.duration(),
        "performing"
    );
    engine.wait_until_stopped()?;
    engine.shutdown()?;
    Ok(())
}

fn execute_info(args: InfoArgs) -> Result<()> {
    let sounds = sounds_from_list(&args.paths);
    if sounds.len() < args.paths.len() {
        eprintln!(
            "{} of {} files could not be read",
            args.paths.len() - sounds.len(),
            args.paths.len()
        );
    }
    println!("{}", serde_json::to_string_pretty(&sounds)?);
    Ok(())
}

fn execute_devices(args: DevicesArgs) -> Result<()> {
    let config = AudioConfig {
        host: args.host,
        ..AudioConfig::default()
    };
    let devices = available_audio_midi_drivers(&config)?;
    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(())
}
