use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use updraft_core::{
    AppIdentity, CheckResult, PromptResponse, UpdateConfig, UpdatePrompt, Updater,
};
use updraft_feed::ReleaseCandidate;
use updraft_settings::{keys, JsonFileStore, SettingsStore};

#[derive(Parser)]
#[command(name = "updraft")]
#[command(about = "Check an appcast feed for application updates")]
struct Cli {
    /// Path of the JSON settings file
    #[arg(long, default_value = "updraft.json")]
    settings: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct AppArgs {
    /// Appcast feed URL
    #[arg(long)]
    appcast: String,

    /// Application name
    #[arg(long)]
    app_name: String,

    /// Vendor name
    #[arg(long, default_value = "")]
    company: String,

    /// Installed display version, e.g. 1.5.0
    #[arg(long)]
    version: String,

    /// Installed build number, compared instead of the display version
    /// when the feed carries build numbers too
    #[arg(long)]
    build_version: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one check against the feed
    Check {
        #[command(flatten)]
        app: AppArgs,

        /// Download and launch the installer without prompting
        #[arg(long)]
        install: bool,

        /// Report availability only, never prompt
        #[arg(long, conflicts_with = "install")]
        silent: bool,
    },
    /// Check on a schedule until interrupted
    Watch {
        #[command(flatten)]
        app: AppArgs,

        /// Seconds between checks (minimum 3600)
        #[arg(long, default_value_t = 86400)]
        interval: u64,
    },
    /// Show the persisted check state
    Status,
}

/// Interactive consent on stdin, the terminal's version of the update
/// dialog.
struct ConsolePrompt;

#[async_trait]
impl UpdatePrompt for ConsolePrompt {
    async fn prompt(&self, candidate: &ReleaseCandidate) -> PromptResponse {
        let title = candidate
            .title
            .clone()
            .unwrap_or_else(|| format!("Version {}", candidate.version));
        println!("Update available: {} ({})", title, candidate.version);
        if let Some(notes) = &candidate.release_notes_url {
            println!("Release notes: {notes}");
        }
        if candidate.is_critical {
            println!("This is a critical update.");
        }

        let answer = tokio::task::spawn_blocking(|| {
            print!("[i]nstall, [s]kip this version, [r]emind me later? ");
            std::io::stdout().flush().ok();
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).ok();
            line
        })
        .await
        .unwrap_or_default();

        match answer.trim().to_lowercase().as_str() {
            "i" | "install" => PromptResponse::Install,
            "s" | "skip" => PromptResponse::Skip,
            _ => PromptResponse::RemindLater,
        }
    }
}

fn register_output(updater: &Updater) -> Result<(), Box<dyn std::error::Error>> {
    let callbacks = updater.callbacks();
    callbacks.set_error(|| eprintln!("update check failed"))?;
    callbacks.set_did_not_find_update(|| println!("You are up to date."))?;
    callbacks.set_update_cancelled(|| println!("Update not installed."))?;
    callbacks.set_shutdown_request(|| println!("Installer launched; exit the app to update."))?;
    callbacks.set_download_progress(|received, total| match total {
        Some(total) if total > 0 => {
            eprint!("\rdownloading {received}/{total} bytes");
            if received >= total {
                eprintln!();
            }
        }
        _ => eprint!("\rdownloading {received} bytes"),
    })?;
    Ok(())
}

fn build_updater(
    settings_path: &str,
    app: &AppArgs,
    config: UpdateConfig,
) -> Result<Updater, Box<dyn std::error::Error>> {
    let store = Arc::new(JsonFileStore::open(Path::new(settings_path))?);
    let updater = Updater::new(store);
    updater.set_prompt(Arc::new(ConsolePrompt))?;
    register_output(&updater)?;

    let mut identity = AppIdentity::new(&app.company, &app.app_name, &app.version);
    if let Some(build) = &app.build_version {
        identity = identity.with_build_version(build);
    }
    updater.configure(identity, config)?;
    Ok(updater)
}

fn format_timestamp(secs: u64) -> String {
    DateTime::from_timestamp(secs as i64, 0)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

async fn run_check(
    settings_path: &str,
    app: &AppArgs,
    install: bool,
    silent: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let updater = build_updater(settings_path, app, UpdateConfig::new(&app.appcast))?;
    let mut results = updater.subscribe();

    updater.start()?;
    updater.check_for_update(!silent && !install, install)?;
    results.changed().await?;

    let outcome = results.borrow().clone();
    if let Some(CheckResult::UpdateAvailable(candidate)) = outcome {
        if silent {
            println!("Update available: {}", candidate.version);
        }
    }
    updater.cleanup();
    Ok(())
}

async fn run_watch(
    settings_path: &str,
    app: &AppArgs,
    interval: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = UpdateConfig::new(&app.appcast)
        .automatic_checks(true)
        .check_interval_secs(interval);
    let updater = build_updater(settings_path, app, config)?;
    let mut results = updater.subscribe();

    updater.start()?;
    println!(
        "Checking {} every {} seconds; press Ctrl-C to stop.",
        app.appcast,
        updater.update_interval()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = results.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(result) = results.borrow().clone() {
                    tracing::debug!(?result, "check finished");
                }
            }
        }
    }
    updater.cleanup();
    // Let an in-flight cycle notice the cancellation before exiting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}

fn run_status(settings_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = JsonFileStore::open(Path::new(settings_path))?;

    match store.get(keys::LAST_CHECK_TIME)? {
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) => println!("Last check: {}", format_timestamp(secs)),
            Err(_) => println!("Last check: {raw}"),
        },
        None => println!("Last check: never"),
    }
    if let Some(url) = store.get(keys::APPCAST_URL)? {
        println!("Appcast: {url}");
    }
    if let Some(version) = store.get(keys::SKIPPED_VERSION)? {
        println!("Skipped version: {version}");
    }
    if let Some(enabled) = store.get(keys::AUTOMATIC_CHECKS)? {
        println!("Automatic checks: {enabled}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Check {
            app,
            install,
            silent,
        } => run_check(&cli.settings, app, *install, *silent).await,
        Commands::Watch { app, interval } => run_watch(&cli.settings, app, *interval).await,
        Commands::Status => run_status(&cli.settings),
    }
}
