//! CLI argument definitions.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use crate::acquisition::AcquisitionMode;
use crate::config::TetherConfig;

/// Tether - automatic camera acquisition for photo booths.
///
/// Watches a USB-tethered camera through gphoto2, downloads every new capture
/// and announces it to the presentation layer.
#[derive(Parser, Debug)]
#[command(name = "tether", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (text for humans, json for scripts)
    #[arg(
        long,
        short = 'f',
        default_value = "text",
        global = true,
        env = "TETHER_FORMAT"
    )]
    pub format: OutputFormat,

    /// Robot mode: JSON output and JSON logs
    #[arg(long, global = true)]
    pub robot: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Configuration file (default: <config dir>/tether/config.toml)
    #[arg(long, short = 'c', global = true, env = "TETHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// gphoto2 executable
    #[arg(long = "gphoto2", global = true, env = "TETHER_GPHOTO2")]
    pub gphoto2: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output format selection.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text with optional color
    #[default]
    Text,
    /// JSON output for scripts
    Json,
    /// Compact JSON (single line)
    JsonCompact,
}

impl Cli {
    /// Returns true if output should be JSON (robot mode or explicit --format=json).
    pub const fn use_json(&self) -> bool {
        self.robot || matches!(self.format, OutputFormat::Json | OutputFormat::JsonCompact)
    }

    /// Returns true if output should be compact JSON.
    pub const fn use_compact_json(&self) -> bool {
        matches!(self.format, OutputFormat::JsonCompact)
    }

    /// Apply global flag overrides to a loaded configuration.
    pub fn apply_overrides(&self, config: &mut TetherConfig) {
        if let Some(binary) = &self.gphoto2 {
            config.camera.binary.clone_from(binary);
        }
        if let Some(Commands::Run(args)) = &self.command {
            args.apply_overrides(config);
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the acquisition service and HTTP API until interrupted
    Run(RunArgs),

    /// Check whether a camera is connected
    Status,

    /// Find the folder new captures are stored in
    Discover,

    /// List image files in the photo folder
    Files(FilesArgs),

    /// Show effective configuration
    Config(ConfigArgs),

    /// Show version and build information
    Version,

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Directory downloaded photos are written to
    #[arg(long, short = 'd', env = "TETHER_DOWNLOAD_DIR")]
    pub download_dir: Option<PathBuf>,

    /// Capture detection mode
    #[arg(long, short = 'm', env = "TETHER_MODE")]
    pub mode: Option<AcquisitionMode>,

    /// HTTP port
    #[arg(long, short = 'p', env = "TETHER_PORT")]
    pub port: Option<u16>,

    /// HTTP bind address
    #[arg(long, env = "TETHER_BIND")]
    pub bind: Option<String>,

    /// Do not start the HTTP API; print events only
    #[arg(long)]
    pub no_server: bool,
}

impl RunArgs {
    fn apply_overrides(&self, config: &mut TetherConfig) {
        if let Some(dir) = &self.download_dir {
            config.storage.download_dir.clone_from(dir);
        }
        if let Some(mode) = self.mode {
            config.camera.mode = mode;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = &self.bind {
            config.server.bind.clone_from(bind);
        }
    }
}

#[derive(Parser, Debug)]
pub struct FilesArgs {
    /// Include files with any extension
    #[arg(long, short = 'a')]
    pub all: bool,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Show configuration file path
    #[arg(long)]
    pub path: bool,
}

#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
