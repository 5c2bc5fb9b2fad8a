use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use smartbin_link::classifier::ResultMapping;
use smartbin_link::config::ClassifierConfig;
use smartbin_link::events::{write_stdout_json, write_stdout_line};
use smartbin_link::protocol::{codes, DeviceCommand, ImageEncoder, ImageInfo, DEFAULT_PART_SIZE};
use smartbin_link::writer::WriterHandle;
use smartbin_link::{LinkBuilder, LinkConfig, LinkEvent};

/// How long blocking reads on the device node may delay process exit.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// SmartBin host - receives images from the bin camera and answers with a class
#[derive(Parser, Debug)]
#[command(name = "smartbin-host", version, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the device and run the link
    Run(RunArgs),
    /// Print the lines a device would send for an image
    Simulate(SimulateArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ClassifierKind {
    Mock,
    Command,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Bound serial device (default: /dev/rfcomm0)
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How results are sent: "label" or "binary"
    #[arg(long)]
    mapping: Option<ResultMapping>,

    /// Classifier backend
    #[arg(long, value_enum)]
    classifier: Option<ClassifierKind>,

    /// Backend program and leading arguments (must come last)
    #[arg(long = "classifier-cmd", num_args = 1.., allow_hyphen_values = true)]
    classifier_cmd: Vec<String>,

    /// Drop image transfers older than this many seconds
    #[arg(long)]
    session_timeout: Option<u64>,

    /// Print events as JSON lines on stdout
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl RunArgs {
    /// Apply command-line overrides on top of the file configuration.
    fn apply(&self, config: &mut LinkConfig) -> anyhow::Result<()> {
        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        if let Some(mapping) = self.mapping {
            config.mapping = mapping;
        }
        if let Some(secs) = self.session_timeout {
            config.session_timeout_secs = Some(secs);
        }

        let kind = match self.classifier {
            Some(kind) => Some(kind),
            None if !self.classifier_cmd.is_empty() => Some(ClassifierKind::Command),
            None => None,
        };

        match kind {
            Some(ClassifierKind::Mock) => config.classifier = ClassifierConfig::Mock,
            Some(ClassifierKind::Command) => {
                if let Some((program, args)) = self.classifier_cmd.split_first() {
                    config.classifier = ClassifierConfig::Command {
                        program: program.clone(),
                        args: args.to_vec(),
                    };
                } else if config.classifier == ClassifierConfig::Mock {
                    bail!("--classifier command needs --classifier-cmd or a [classifier] section");
                }
            }
            None => {}
        }

        Ok(())
    }
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Image file to encode
    #[arg(short, long)]
    image: PathBuf,

    /// Base64 characters per part
    #[arg(long, default_value_t = DEFAULT_PART_SIZE)]
    part_size: usize,

    /// Width reported in the metadata
    #[arg(long, default_value_t = 0)]
    width: u32,

    /// Height reported in the metadata
    #[arg(long, default_value_t = 0)]
    height: u32,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Simulate(args) => simulate(&args),
        Command::Run(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let result = runtime.block_on(run(args));
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
            result
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => LinkConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => LinkConfig::default(),
    };
    args.apply(&mut config)?;
    config.validate()?;

    info!(
        "Opening {} (mapping: {}, classifier: {:?})",
        config.device.display(),
        config.mapping,
        config.classifier
    );

    let mut link = LinkBuilder::from_config(&config)
        .open(&config.device)
        .await
        .with_context(|| format!("opening {}", config.device.display()))?;

    let stdin_task = tokio::spawn(forward_stdin(link.writer()));

    loop {
        tokio::select! {
            event = link.next_event() => match event {
                Some(event) => report(&event, args.json)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    stdin_task.abort();
    link.stop().await?;
    Ok(())
}

fn report(event: &LinkEvent, json: bool) -> anyhow::Result<()> {
    if json {
        write_stdout_json(event)?;
    } else {
        match event {
            LinkEvent::TransferFailed { .. } | LinkEvent::DeviceError { .. } => warn!("{}", event),
            _ => info!("{}", event),
        }
    }
    Ok(())
}

/// Forward operator commands from stdin to the device.
///
/// Accepts `lid open`-style commands or raw `CODE payload` lines.
async fn forward_stdin(writer: WriterHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (code, payload) = match line.parse::<DeviceCommand>() {
            Ok(command) => (command.code().to_string(), command.payload()),
            Err(_) => match raw_frame(line) {
                Some((code, payload)) => (code.to_string(), payload.to_string()),
                None => {
                    warn!("Unknown command: {}", line);
                    continue;
                }
            },
        };

        if writer.send(&code, &payload).await {
            debug!(">> {} {}", code, payload);
        } else {
            warn!("Device is not connected, dropped {}", code);
        }
    }
}

/// Split a raw `CODE payload` line whose code is 5 uppercase letters/digits.
fn raw_frame(line: &str) -> Option<(&str, &str)> {
    let (code, payload) = line.split_once(' ').unwrap_or((line, ""));
    let valid = code.len() == codes::CODE_LEN
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
    valid.then_some((code, payload.trim()))
}

fn simulate(args: &SimulateArgs) -> anyhow::Result<()> {
    let image = std::fs::read(&args.image)
        .with_context(|| format!("reading {}", args.image.display()))?;

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let info = ImageInfo {
        format: image_format(&args.image).to_string(),
        width: args.width,
        height: args.height,
        id: format!("img_{}", millis),
    };

    let frames = ImageEncoder::new(args.part_size).encode(&image, &info)?;
    for frame in frames {
        write_stdout_line(frame.encode().trim_end())?;
    }
    Ok(())
}

fn image_format(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "PNG",
        _ => "JPEG",
    }
}
