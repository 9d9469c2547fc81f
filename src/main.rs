use clap::{Parser, Subcommand};
use tracing::{Level, warn};
use tracing_subscriber::EnvFilter;
use anyhow::{bail, Context, Result};
use std::{fs, io::{self, BufRead, Write}, path::PathBuf, process::ExitCode, time::Duration};

use tbconf::{backup, config::Config, service, validate, UpdateError, Updater};

#[derive(Parser, Debug)]
#[command(name = "tbconf", about = "Safe configuration updater for tblocker")]
struct Cli {
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Settings file (TOML); built-in defaults when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Override the tblocker configuration path
    #[arg(long)]
    config_path: Option<PathBuf>,

    /// Override the backup directory
    #[arg(long)]
    backup_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Back up, merge new webhook credentials, validate and install
    Update {
        /// Telegram bot token (prompted when omitted)
        #[arg(long)]
        token: Option<String>,
        /// Telegram chat id (prompted when omitted)
        #[arg(long)]
        chat_id: Option<String>,
        /// Restart the service after a successful install
        #[arg(long, default_value_t = false)]
        restart: bool,
    },
    /// List backups of the configuration, oldest first (stamps in local time)
    Backups,
    /// Restore a backup over the live configuration
    Restore {
        /// Backup file name; latest when omitted
        name: Option<String>,
    },
    /// Validate the live configuration and print its chat id
    Check,
    /// Restart the tblocker service
    Restart,
}

fn main() -> Result<ExitCode> {
    // The local offset is only readable before worker threads exist.
    backup::capture_local_offset();
    let cli = Cli::parse();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive(level.into()))
        .with_target(false)
        .compact()
        .init();

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(p) = cli.config_path { cfg.config_path = p; }
    if let Some(d) = cli.backup_dir { cfg.backup_dir = d; }
    let cfg = cfg.normalized();

    match cli.command {
        Commands::Update { token, chat_id, restart } => {
            let token = match token { Some(t) => t, None => prompt("Bot token: ")? };
            let chat_id = match chat_id { Some(c) => c, None => prompt("Chat id: ")? };

            let updater = Updater::new(cfg.clone());
            match updater.update(&token, &chat_id) {
                Ok(report) => {
                    match &report.backup {
                        Some(b) => println!("Backup: {}", b.path.display()),
                        None => println!("Backup: none (no previous configuration)"),
                    }
                    for w in &report.warnings {
                        println!("Warning: {w}");
                    }
                    println!("Installed {}", cfg.config_path.display());
                    if restart {
                        restart_service(&cfg).await;
                    }
                }
                Err(e) => return Ok(report_failure(&e)),
            }
        }
        Commands::Backups => {
            let list = backup::list_backups(&cfg.config_path, &cfg.backup_dir, &cfg.hash_alg)?;
            if list.is_empty() {
                println!("No backups in {}", cfg.backup_dir.display());
            }
            for b in &list {
                println!("{}  {:>8} bytes  {}", b.name(), b.size, backup::short(&b.digest));
            }
        }
        Commands::Restore { name } => {
            let list = backup::list_backups(&cfg.config_path, &cfg.backup_dir, &cfg.hash_alg)?;
            let chosen = match &name {
                Some(n) => list.into_iter().find(|b| &b.name() == n),
                None => list.into_iter().last(),
            };
            let Some(chosen) = chosen else {
                bail!("no backup {} in {}", name.as_deref().unwrap_or("found"), cfg.backup_dir.display());
            };
            let mut warnings = Vec::new();
            match backup::restore_backup(&chosen, &cfg.config_path, &cfg.backup_dir, &cfg.hash_alg, &mut warnings) {
                Ok(safety) => {
                    if let Some(s) = safety {
                        println!("Previous configuration saved as {}", s.path.display());
                    }
                    for w in &warnings {
                        println!("Warning: {w}");
                    }
                    println!("Restored {} from {}", cfg.config_path.display(), chosen.name());
                }
                Err(e) => return Ok(report_failure(&e)),
            }
        }
        Commands::Check => {
            let text = fs::read_to_string(&cfg.config_path)
                .with_context(|| format!("failed to read {}", cfg.config_path.display()))?;
            match validate::inspect(&text) {
                Ok(chat_id) => println!("OK: {} targets chat {}", cfg.config_path.display(), chat_id),
                Err(e) => {
                    eprintln!("Invalid: {e}");
                    return Ok(ExitCode::from(2));
                }
            }
        }
        Commands::Restart => {
            if !restart_service(&cfg).await {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn report_failure(e: &UpdateError) -> ExitCode {
    eprintln!("Failed at {}: {e}", e.stage());
    eprintln!("{}", e.live_file_status());
    for w in e.warnings() {
        eprintln!("Warning: {w}");
    }
    ExitCode::from(e.exit_code() as u8)
}

async fn restart_service(cfg: &Config) -> bool {
    let timeout = Duration::from_secs(cfg.restart_timeout_secs);
    match service::restart(&cfg.service_manager, &cfg.service, timeout).await {
        Ok(()) => {
            println!("Restarted {}", cfg.service);
            true
        }
        Err(e) => {
            warn!("restart failed: {e}");
            eprintln!("Restart failed: {e}");
            false
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).context("read from stdin")?;
    Ok(line.trim().to_string())
}
