mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mdk_core::ToolConfig;
use tracing::{debug, error};

#[derive(Parser, Debug)]
#[command(
    name = "deviceutil",
    author,
    version,
    about = "A utility for interacting with Apple mobile devices connected to the system.",
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true, value_parser = commands::parse_path)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lists the devices actively connected to the system.
    List {
        /// Continuously observe and print device connection events
        #[arg(short, long)]
        observe: bool,
    },
    /// Installs an application bundle to a device.
    Install {
        /// The path to the application bundle (.app or .ipa)
        #[arg(short, long, value_parser = commands::parse_path)]
        bundle_path: PathBuf,

        /// The full identifier (UDID) of the device to install the application to
        #[arg(short, long)]
        device_identifier: String,
    },
    /// Mounts a developer disk image on a device.
    MountImage {
        /// The full identifier (UDID) of the device
        #[arg(short, long)]
        device_identifier: String,

        /// Path to the disk image (defaults to the configured image)
        #[arg(long, value_parser = commands::parse_path)]
        image: Option<PathBuf>,

        /// Path to the image signature (defaults to the configured signature,
        /// then `<image>.signature`)
        #[arg(long, value_parser = commands::parse_path)]
        signature: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {e}");
    }

    let config = match &args.config {
        Some(path) => match ToolConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Error: failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => ToolConfig::default(),
    };
    debug!(?config, "Configuration loaded");

    if let Err(e) = run(args.command, config).await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(target_os = "macos")]
async fn run(command: Command, config: ToolConfig) -> anyhow::Result<()> {
    use mdk_core::DeviceDiscovery;

    let discovery = DeviceDiscovery::init_system(config);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match command {
        Command::List { observe: false } => commands::list(discovery, &mut out),
        Command::List { observe: true } => {
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            commands::observe(discovery, &mut out, shutdown).await
        }
        Command::Install {
            bundle_path,
            device_identifier,
        } => commands::install(discovery, &bundle_path, &device_identifier, &mut out).await,
        Command::MountImage {
            device_identifier,
            image,
            signature,
        } => commands::mount_image(discovery, &device_identifier, image, signature, &mut out).await,
    }
}

#[cfg(not(target_os = "macos"))]
async fn run(command: Command, _config: ToolConfig) -> anyhow::Result<()> {
    debug!(?command, "Ignoring command");
    anyhow::bail!("The MobileDevice framework is unavailable on this platform (macOS only)")
}
