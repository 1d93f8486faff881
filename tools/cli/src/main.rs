//! DriveSync CLI - Command line interface for folder synchronization.
//!
//! This tool mirrors a local folder tree to Google Drive and back, storing
//! every file as a password-protected archive.

use anyhow::{bail, Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Deserialize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use url::Url;

use drivesync_archive::ZipPackager;
use drivesync_common::Secret;
use drivesync_storage::gdrive::{AuthManager, GDriveConfig, GDriveStore, Tokens};
use drivesync_sync::{SyncConfig, SyncEngine, SyncEvent, SyncReport};

/// Environment variable consulted before prompting for the archive password.
const PASSWORD_ENV: &str = "DRIVESYNC_PASSWORD";

#[derive(Parser)]
#[command(name = "drivesync")]
#[command(about = "DriveSync - Mirror folders to Google Drive as encrypted archives")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: <config dir>/drivesync/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunOptions {
    /// Local path never deleted by a sync. Repeatable.
    #[arg(short = 'x', long = "exclude")]
    exclude: Vec<PathBuf>,

    /// Entries fetched per folder listing (1-1000, 0 for unbounded).
    #[arg(long)]
    page_size: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize access to Google Drive.
    Login,

    /// Upload a local folder.
    Up {
        /// Local folder to mirror.
        #[arg(short, long)]
        local: PathBuf,

        /// Remote folder receiving a folder of the same name.
        #[arg(short, long, default_value = "/")]
        remote: String,

        /// Only upload these paths below the local folder.
        #[arg(short = 'p', long = "path")]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Download a remote folder.
    Down {
        /// Remote folder to mirror.
        #[arg(short, long)]
        remote: String,

        /// Local folder receiving a folder of the same name.
        #[arg(short, long)]
        local: PathBuf,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Report whether a download would change anything.
    Check {
        /// Remote folder to compare.
        #[arg(short, long)]
        remote: String,

        /// Local folder holding the mirror.
        #[arg(short, long)]
        local: PathBuf,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Print shell completions.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },
}

/// Contents of the config file.
#[derive(Debug, Deserialize)]
struct Settings {
    drive: GDriveConfig,
    #[serde(default)]
    sync: SyncConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = cli.config;
    match cli.command {
        Commands::Login => cmd_login(config.as_deref()).await,

        Commands::Up {
            local,
            remote,
            paths,
            options,
        } => cmd_up(config.as_deref(), &remote, &local, &paths, &options).await,

        Commands::Down {
            remote,
            local,
            options,
        } => cmd_down(config.as_deref(), &local, &remote, &options).await,

        Commands::Check {
            remote,
            local,
            options,
        } => cmd_check(config.as_deref(), &local, &remote, &options).await,

        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "drivesync", &mut io::stdout());
            Ok(())
        }
    }
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .context("No config directory on this platform")?
        .join("drivesync"))
}

fn tokens_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("tokens.json"))
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_dir()?.join("config.json"),
    };
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Invalid config {}", path.display()))
}

/// Read the archive password from the environment or the terminal.
fn read_password() -> Result<Secret> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(Secret::new(password));
    }
    let password = rpassword::prompt_password("Archive password: ")
        .context("Failed to read password")?;
    Ok(Secret::new(password))
}

/// Pull the authorization code out of a pasted code or redirect URL.
fn extract_code(input: &str, expected_state: &str) -> Result<String> {
    let input = input.trim();
    let Ok(url) = Url::parse(input) else {
        if input.is_empty() {
            bail!("No authorization code given");
        }
        return Ok(input.to_string());
    };

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match &*key {
            "code" => code = Some(value.into_owned()),
            "state" if value != expected_state => bail!("Authorization state mismatch"),
            "error" => bail!("Authorization denied: {}", value),
            _ => {}
        }
    }
    code.context("Redirect URL carries no authorization code")
}

/// Authorize and store tokens.
async fn cmd_login(config: Option<&Path>) -> Result<()> {
    let settings = load_settings(config)?;
    let auth = AuthManager::new(settings.drive.auth)?;
    let (url, state) = auth.authorization_url();

    println!("Open this URL to authorize DriveSync:\n\n  {}\n", url);
    if let Err(e) = open::that(&url) {
        debug!("Could not launch a browser: {}", e);
    }

    print!("Paste the code or the redirect URL: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;

    let code = extract_code(&input, &state)?;
    let tokens = auth.exchange_code(&code).await?;

    let path = tokens_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tokens.save(&path)?;
    info!("Saved tokens to {}", path.display());
    Ok(())
}

/// Open the store and build an engine with the command's options applied.
async fn open_engine(
    config: Option<&Path>,
    options: &RunOptions,
) -> Result<(Arc<GDriveStore>, SyncEngine<GDriveStore>)> {
    let settings = load_settings(config)?;
    let tokens = Tokens::load(&tokens_path()?)?;
    let store = Arc::new(GDriveStore::new(settings.drive, tokens)?);

    let mut sync = settings.sync;
    if let Some(page_size) = options.page_size {
        sync.page_size = Some(page_size);
    }

    let mut engine = SyncEngine::new(store.clone(), Arc::new(ZipPackager::new()), sync)?;
    for path in &options.exclude {
        engine.add_excluded(path);
    }
    if let Err(e) = engine.purge_stale_staging().await {
        warn!("Failed to purge stale staging directories: {}", e);
    }

    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping at the next listing");
            token.cancel();
        }
    });

    Ok((store, engine))
}

/// Persist tokens refreshed during the run.
async fn save_tokens(store: &GDriveStore) {
    let result = match tokens_path() {
        Ok(path) => store.tokens().await.save(&path).map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!("Failed to save refreshed tokens: {}", e);
    }
}

/// Print progress events until the engine drops its sender.
fn spawn_progress(engine: &SyncEngine<GDriveStore>) -> tokio::task::JoinHandle<()> {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        let mut total = 0;
        while let Some(event) = events.recv().await {
            match event {
                SyncEvent::TotalSize(bytes) => total = bytes,
                SyncEvent::Progress(bytes) => {
                    eprint!("\r{} / {} bytes", bytes, total);
                    if bytes >= total {
                        eprintln!();
                    }
                }
            }
        }
    })
}

fn print_report(report: &SyncReport) {
    println!(
        "{} transferred, {} deleted, {} bytes in {:.1?}",
        report.transferred, report.deleted, report.bytes, report.duration
    );
}

/// Upload a local folder.
async fn cmd_up(
    config: Option<&Path>,
    remote: &str,
    local: &Path,
    paths: &[PathBuf],
    options: &RunOptions,
) -> Result<()> {
    let (store, engine) = open_engine(config, options).await?;
    let password = read_password()?;
    let progress = spawn_progress(&engine);

    let result = if paths.is_empty() {
        engine.sync_up(remote, local, &password).await
    } else {
        engine.sync_up_paths(remote, local, paths, &password).await
    };

    drop(engine);
    let _ = progress.await;
    save_tokens(&store).await;
    print_report(&result?);
    Ok(())
}

/// Download a remote folder.
async fn cmd_down(
    config: Option<&Path>,
    local: &Path,
    remote: &str,
    options: &RunOptions,
) -> Result<()> {
    let (store, engine) = open_engine(config, options).await?;
    let password = read_password()?;
    let progress = spawn_progress(&engine);

    let result = engine.sync_down(local, remote, &password).await;

    drop(engine);
    let _ = progress.await;
    save_tokens(&store).await;
    print_report(&result?);
    Ok(())
}

/// Report whether the remote folder differs from the local mirror.
async fn cmd_check(
    config: Option<&Path>,
    local: &Path,
    remote: &str,
    options: &RunOptions,
) -> Result<()> {
    let (store, engine) = open_engine(config, options).await?;
    let changed = engine.check_for_remote_changes(local, remote).await;
    save_tokens(&store).await;

    if changed? {
        println!("Remote changes pending");
    } else {
        println!("Up to date");
    }
    Ok(())
}
