//! Tether - automatic camera acquisition for photo booths.
//!
//! Provides both human-friendly and machine-friendly (robot mode) interfaces.
#![forbid(unsafe_code)]

use std::io::{self, IsTerminal};
use std::sync::Arc;

use clap::Parser;
use console::style;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use tether::acquisition::CameraService;
use tether::camera::{CameraGateway, GphotoGateway, discover_photo_folder, parse::has_extension};
use tether::cli::{self, Cli, Commands};
use tether::config::{self, LoadedConfig};
use tether::error::{Result, TetherError};
use tether::events::{CameraEvent, EventBus};
use tether::logging::{LogOptions, init_logging};
use tether::server::{self, AppState};

/// Build information embedded at compile time.
mod build_info {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    pub fn git_sha() -> &'static str {
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
    }

    pub fn git_dirty() -> &'static str {
        option_env!("VERGEN_GIT_DIRTY").unwrap_or("false")
    }

    pub fn build_timestamp() -> &'static str {
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown")
    }

    pub fn rustc_semver() -> &'static str {
        option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown")
    }

    pub fn target() -> &'static str {
        option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown")
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.no_color || !io::stdout().is_terminal() {
        console::set_colors_enabled(false);
    }
    if cli.no_color || !io::stderr().is_terminal() {
        console::set_colors_enabled_stderr(false);
    }

    init_logging(&LogOptions {
        json: cli.robot,
        verbose: cli.verbose,
        quiet: cli.quiet,
        http: matches!(&cli.command, Some(Commands::Run(args)) if !args.no_server),
    });

    if let Err(e) = run(&cli) {
        output_error(&cli, &e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        None => print_quick_start(cli),
        Some(Commands::Run(args)) => block_on(cmd_run(cli, args)),
        Some(Commands::Status) => block_on(cmd_status(cli)),
        Some(Commands::Discover) => block_on(cmd_discover(cli)),
        Some(Commands::Files(args)) => block_on(cmd_files(cli, args)),
        Some(Commands::Config(args)) => cmd_config(cli, args),
        Some(Commands::Version) => cmd_version(cli),
        Some(Commands::Completions(args)) => cmd_completions(cli, args),
    }
}

fn block_on<F: Future<Output = Result<()>>>(fut: F) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(fut)
}

/// Configuration file plus command-line overrides.
fn load(cli: &Cli) -> Result<LoadedConfig> {
    let mut loaded = config::load_config(cli.config.as_deref())?;
    cli.apply_overrides(&mut loaded.config);
    loaded.config.validate()?;
    Ok(loaded)
}

// === Quick Start ===

#[allow(clippy::unnecessary_wraps)] // Consistent return type with other commands
fn print_quick_start(cli: &Cli) -> Result<()> {
    if cli.use_json() {
        output_json(
            cli,
            &serde_json::json!({
                "tool": "tether",
                "version": build_info::VERSION,
                "description": "Tethered camera acquisition with automatic reconnection",
                "commands": {
                    "check_camera": "tether status --robot",
                    "find_folder": "tether discover --robot",
                    "list_files": "tether files --robot",
                    "run": "tether run --robot",
                    "config": "tether config --robot",
                },
                "api": {
                    "status": "GET /api/status",
                    "events": "GET /api/events (text/event-stream)",
                    "pause": "POST /api/pause",
                    "resume": "POST /api/resume",
                    "reset_session": "POST /api/session/reset",
                },
            }),
        );
        return Ok(());
    }

    println!(
        "{} {} - tethered camera acquisition\n",
        style("tether").bold().cyan(),
        build_info::VERSION
    );
    println!("{}", style("QUICK START").bold().underlined());
    println!();
    println!("  {}  Check for a camera", style("tether status").green());
    println!("  {}  Find the photo folder", style("tether discover").green());
    println!("  {}  Download new captures", style("tether run").green());
    println!("  {}  Show configuration", style("tether config").green());
    println!();
    println!("Run {} for full help", style("tether --help").yellow());
    Ok(())
}

// === Acquisition ===

async fn cmd_run(cli: &Cli, args: &cli::RunArgs) -> Result<()> {
    let loaded = load(cli)?;
    let settings = loaded.config.acquisition_settings(&loaded.resolver)?;
    let gateway = Arc::new(GphotoGateway::new(loaded.config.gateway_settings()));
    let bus = EventBus::default();
    let service = CameraService::new(gateway, settings, Arc::new(bus.clone()));

    let printer = spawn_event_printer(cli, &bus);
    service.start().await?;

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server_task = if args.no_server {
        None
    } else {
        let state = AppState {
            service: service.clone(),
            events: bus.clone(),
        };
        let addr = loaded.config.server.address();
        Some(tokio::spawn(async move {
            server::serve(state, &addr, async {
                let _ = stop_rx.await;
            })
            .await
        }))
    };

    let outcome = tokio::select! {
        () = shutdown_signal() => None,
        result = server_exit(&mut server_task) => Some(result),
    };

    let server_error = match outcome {
        Some(result) => {
            server_task = None;
            result.err()
        }
        None => {
            info!("Shutdown requested");
            None
        }
    };

    let _ = stop_tx.send(());
    service.stop().await;

    if let Some(task) = server_task {
        match task.await {
            Ok(Err(e)) => warn!(error = %e, "HTTP API stopped with an error"),
            Err(e) => warn!(error = %e, "HTTP API task failed"),
            Ok(Ok(())) => {}
        }
    }
    printer.abort();

    server_error.map_or(Ok(()), Err)
}

/// Resolves when the HTTP server ends on its own; never without one.
async fn server_exit(task: &mut Option<JoinHandle<Result<()>>>) -> Result<()> {
    match task.as_mut() {
        Some(task) => task
            .await
            .map_err(|e| TetherError::Other(format!("HTTP API task failed: {e}")))?,
        None => std::future::pending().await,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Print every event to stdout: JSON lines in robot mode, text otherwise.
fn spawn_event_printer(cli: &Cli, bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    let json = cli.use_json();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(json, &event),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(json: bool, event: &CameraEvent) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
        return;
    }

    let time = chrono::Local::now().format("%H:%M:%S");
    match event {
        CameraEvent::Status { connected, state } => {
            let label = if *connected {
                style(state.as_str()).green()
            } else {
                style(state.as_str()).yellow()
            };
            println!("{time} {} {label}", style("camera").bold());
        }
        CameraEvent::Photo { filename, path } => {
            println!("{time} {} {filename} -> {path}", style("photo").bold().cyan());
        }
        CameraEvent::Error { message, .. } => {
            println!("{time} {} {message}", style("error").bold().red());
        }
    }
}

// === Device Inspection ===

#[derive(Serialize)]
struct StatusReport {
    connected: bool,
    cameras: Vec<tether::camera::DetectedCamera>,
    #[serde(skip_serializing_if = "Option::is_none")]
    folder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    discovery_error: Option<String>,
}

async fn cmd_status(cli: &Cli) -> Result<()> {
    let loaded = load(cli)?;
    let gateway = GphotoGateway::new(loaded.config.gateway_settings());
    let cameras = gateway.detect_cameras().await?;
    let mut report = StatusReport {
        connected: !cameras.is_empty(),
        cameras,
        folder: None,
        discovery_error: None,
    };
    if report.connected {
        match discover_photo_folder(&gateway).await {
            Ok(folder) => report.folder = Some(folder),
            Err(e) => report.discovery_error = Some(e.to_string()),
        }
    }

    if cli.use_json() {
        output_json(cli, &report);
    } else if report.cameras.is_empty() {
        println!("{}", style("No camera detected").yellow());
    } else {
        for camera in &report.cameras {
            println!("{} {} ({})", style("✓").green(), camera.model, camera.port);
        }
        match (&report.folder, &report.discovery_error) {
            (Some(folder), _) => println!("  photo folder: {folder}"),
            (None, Some(error)) => println!("  {}", style(error).yellow()),
            (None, None) => {}
        }
    }
    Ok(())
}

/// Gateway for a camera that is known to be attached.
async fn attached_gateway(loaded: &LoadedConfig) -> Result<GphotoGateway> {
    let gateway = GphotoGateway::new(loaded.config.gateway_settings());
    if gateway.check_presence().await {
        Ok(gateway)
    } else {
        Err(TetherError::CameraNotDetected)
    }
}

async fn cmd_discover(cli: &Cli) -> Result<()> {
    let loaded = load(cli)?;
    let gateway = attached_gateway(&loaded).await?;
    let folder = discover_photo_folder(&gateway).await?;

    if cli.use_json() {
        output_json(cli, &serde_json::json!({ "folder": folder }));
    } else {
        println!("{folder}");
    }
    Ok(())
}

async fn cmd_files(cli: &Cli, args: &cli::FilesArgs) -> Result<()> {
    let loaded = load(cli)?;
    let extensions = loaded.config.normalized_extensions();
    let gateway = attached_gateway(&loaded).await?;
    let folder = discover_photo_folder(&gateway).await?;
    let files: Vec<_> = gateway
        .list_files(&folder)
        .await?
        .into_iter()
        .filter(|f| args.all || has_extension(&f.name, &extensions))
        .collect();

    if cli.use_json() {
        output_json(cli, &serde_json::json!({ "folder": folder, "files": files }));
    } else {
        println!("{}", style(&folder).bold());
        for file in &files {
            println!("  #{:<5} {}", file.index, file.name);
        }
        println!("{} file(s)", files.len());
    }
    Ok(())
}

// === Configuration ===

fn cmd_config(cli: &Cli, args: &cli::ConfigArgs) -> Result<()> {
    if args.path {
        let path = cli
            .config
            .clone()
            .or_else(config::default_config_path)
            .ok_or_else(|| TetherError::Other("No configuration directory on this platform".into()))?;
        if cli.use_json() {
            output_json(
                cli,
                &serde_json::json!({ "path": path, "exists": path.exists() }),
            );
        } else {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let loaded = load(cli)?;
    if cli.use_json() {
        output_json(
            cli,
            &serde_json::json!({ "source": loaded.source, "config": loaded.config }),
        );
    } else {
        let text = toml::to_string_pretty(&loaded.config)
            .map_err(|e| TetherError::Other(format!("Failed to render configuration: {e}")))?;
        match &loaded.source {
            Some(path) => println!("# {}", path.display()),
            None => println!("# built-in defaults"),
        }
        print!("{text}");
    }
    Ok(())
}

// === Utilities ===

#[allow(clippy::unnecessary_wraps)] // Consistent return type with other commands
fn cmd_version(cli: &Cli) -> Result<()> {
    if cli.use_json() {
        output_json(
            cli,
            &serde_json::json!({
                "version": build_info::VERSION,
                "git_sha": build_info::git_sha(),
                "git_dirty": build_info::git_dirty() == "true",
                "build_timestamp": build_info::build_timestamp(),
                "rustc_version": build_info::rustc_semver(),
                "target": build_info::target(),
            }),
        );
    } else {
        println!("tether {}", build_info::VERSION);
        println!(
            "git: {}{}",
            build_info::git_sha(),
            if build_info::git_dirty() == "true" {
                " (dirty)"
            } else {
                ""
            }
        );
        println!("built: {}", build_info::build_timestamp());
        println!("rustc: {}", build_info::rustc_semver());
        println!("target: {}", build_info::target());
    }
    Ok(())
}

#[allow(clippy::unnecessary_wraps)] // Consistent return type with other commands
fn cmd_completions(_cli: &Cli, args: &cli::CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    clap_complete::generate(args.shell, &mut Cli::command(), "tether", &mut io::stdout());
    Ok(())
}

fn output_json<T: Serialize>(cli: &Cli, data: &T) {
    let json = if cli.use_compact_json() {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    match json {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to serialize output: {e}"),
    }
}

fn output_error(cli: &Cli, error: &TetherError) {
    if cli.use_json() {
        let json = serde_json::json!({
            "error": true,
            "message": error.to_string(),
            "suggestion": error.suggestion(),
            "recoverable": error.is_user_recoverable(),
        });
        eprintln!("{json:#}");
    } else {
        eprintln!("{}: {}", style("Error").red().bold(), error);
        if let Some(suggestion) = error.suggestion() {
            eprintln!("{}: {}", style("Hint").yellow(), suggestion);
        }
    }
}
