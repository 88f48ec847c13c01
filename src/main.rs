use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use simplelog::{
    ColorChoice, CombinedLogger, Config, LevelFilter, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use skyupdate::settings::UpdaterSettings;
use skyupdate::updater::http::HttpBackend;
use skyupdate::updater::utils::{format_eta, format_size, format_speed};
use skyupdate::updater::{
    ChannelObserver, FilePolicyStore, PolicyStore, PollScheduler, UpdateEvent, UpdateManager,
    UpdateStatus,
};

#[derive(Parser, Debug)]
#[command(name = "skyupdate", version, about = "Check for, download and install application updates")]
struct Cli {
    /// Settings file (defaults to skyupdate-settings.toml next to the executable)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log debug output to the terminal
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the release feed whether a newer version exists
    Check,
    /// Check, then download the available update
    Download,
    /// Check, download and install the available update
    Install,
    /// Check, then download and install in one step
    Apply,
    /// Stop offering this exact version
    Skip { version: String },
    /// Forget the pending update and any skipped version
    Dismiss,
    /// Print the stored version policy
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Poll the release feed until interrupted
    Watch,
}

fn init_logging(verbose: bool) -> Result<()> {
    let term_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        term_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if let Some(proj_dirs) = ProjectDirs::from("com", "SkyUpdate", "SkyUpdate") {
        let log_dir = proj_dirs.data_dir();
        if std::fs::create_dir_all(log_dir).is_ok() {
            if let Ok(file) = std::fs::File::create(log_dir.join("skyupdate.log")) {
                loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
            }
        }
    }

    CombinedLogger::init(loggers).context("Failed to initialize logger")
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DownloadMode {
    DownloadOnly,
    DownloadThenInstall,
    Combined,
}

fn open_policy(settings: &UpdaterSettings) -> Result<FilePolicyStore> {
    match &settings.policy_path {
        Some(path) => FilePolicyStore::open(path),
        None => FilePolicyStore::open_default(),
    }
}

fn build_manager(
    settings: &UpdaterSettings,
) -> Result<(Arc<UpdateManager>, mpsc::UnboundedReceiver<UpdateEvent>)> {
    let backend = HttpBackend::new(settings.backend_config()?)?;
    let policy = open_policy(settings)?;
    log::debug!("Policy file: {}", policy.path().display());

    let (observer, events) = ChannelObserver::channel();
    let manager = UpdateManager::new(Arc::new(backend), Arc::new(policy))
        .with_observer(Arc::new(observer));
    let manager = Arc::new(manager);
    manager.start();
    Ok((manager, events))
}

/// Print download progress lines until the task is aborted.
fn spawn_progress_printer(manager: &Arc<UpdateManager>) -> JoinHandle<()> {
    let manager = Arc::clone(manager);
    let mut status_rx = manager.subscribe_status();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            if let UpdateStatus::Downloading(progress) = status {
                let metrics = manager.metrics();
                let total = progress
                    .total_bytes
                    .map(format_size)
                    .unwrap_or_else(|| "?".to_string());
                let speed = metrics
                    .speed_bytes_per_second
                    .map(format_speed)
                    .unwrap_or_else(|| "-".to_string());
                let eta = metrics
                    .eta_seconds
                    .map(format_eta)
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>5.1}%  {} / {}  {}  eta {}",
                    progress.percent,
                    format_size(progress.downloaded_bytes),
                    total,
                    speed,
                    eta
                );
            }
        }
    })
}

async fn download_flow(manager: &Arc<UpdateManager>, mode: DownloadMode) -> Result<()> {
    manager.check_for_update().await;
    if manager.status().downloadable().is_none() {
        return finish(manager.status());
    }

    let printer = spawn_progress_printer(manager);
    match mode {
        DownloadMode::DownloadOnly => manager.download_update().await,
        DownloadMode::DownloadThenInstall => {
            manager.download_update().await;
            manager.install_update().await;
        }
        DownloadMode::Combined => manager.download_and_install().await,
    }
    printer.abort();
    finish(manager.status())
}

fn finish(status: UpdateStatus) -> Result<()> {
    println!("{}", status.display_text());
    match status {
        UpdateStatus::Error { message } => Err(anyhow!(message)),
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let settings = match &cli.settings {
        Some(path) => UpdaterSettings::load_from(path)?,
        None => UpdaterSettings::load()?,
    };

    if let Command::Status { json } = cli.command {
        let mut policy = open_policy(&settings)?.load();
        policy.current_version = Some(settings.current_version());
        if json {
            println!("{}", serde_json::to_string_pretty(&policy)?);
        } else {
            println!(
                "Current version: {}",
                policy.current_version.as_deref().unwrap_or("unknown")
            );
            match policy.last_checked_at {
                Some(at) => println!("Last checked:    {}", at.to_rfc3339()),
                None => println!("Last checked:    never"),
            }
            println!(
                "Skipped version: {}",
                policy.skipped_version.as_deref().unwrap_or("none")
            );
        }
        return Ok(());
    }

    let (manager, mut events) = build_manager(&settings)?;
    println!("Running v{}", manager.current_version().await);

    let result = match cli.command {
        Command::Check => {
            manager.check_for_update().await;
            finish(manager.status())
        }
        Command::Download => download_flow(&manager, DownloadMode::DownloadOnly).await,
        Command::Install => download_flow(&manager, DownloadMode::DownloadThenInstall).await,
        Command::Apply => download_flow(&manager, DownloadMode::Combined).await,
        Command::Skip { version } => {
            manager.skip_version(version.clone()).await;
            println!("v{} will not be offered again", version);
            Ok(())
        }
        Command::Dismiss => {
            manager.dismiss_update().await;
            finish(manager.status())
        }
        Command::Watch => {
            let mut scheduler =
                PollScheduler::with_interval(Arc::clone(&manager), settings.check_interval());
            scheduler.activate();
            loop {
                tokio::select! {
                    Some(event) = events.recv() => match event {
                        UpdateEvent::UpdateAvailable(info) => {
                            println!("v{} is available (running v{})", info.version, info.current_version);
                            if let Some(notes) = info.release_notes {
                                println!("{}", notes);
                            }
                        }
                        UpdateEvent::UpdateReady(info) => {
                            println!("v{} is ready to install", info.version)
                        }
                        UpdateEvent::Error(message) => eprintln!("Update check failed: {}", message),
                    },
                    _ = tokio::signal::ctrl_c() => {
                        log::info!("Interrupted, stopping");
                        break;
                    }
                }
            }
            scheduler.deactivate();
            Ok(())
        }
        Command::Status { .. } => Ok(()),
    };

    manager.shutdown();
    result
}
