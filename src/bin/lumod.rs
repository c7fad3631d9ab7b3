//! Lumo Daemon - camera streaming, telemetry and arm control bridge
//!
//! This binary runs the dashboard backend: it captures camera frames,
//! serves snapshots and MJPEG streams, broadcasts telemetry over WebSocket
//! and gates arm commands on arm connectivity.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! lumod start
//!
//! # Start with an explicit config file, in the background
//! lumod start -d --config /etc/lumo/config.toml
//!
//! # Stop the daemon
//! lumod stop
//!
//! # Check daemon status
//! lumod status
//! ```

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lumod::config::LumoConfig;
use lumod::Dashboard;

/// How long `stop` waits for the daemon to exit
const STOP_WAIT: Duration = Duration::from_secs(5);

const STOP_POLL: Duration = Duration::from_millis(100);

/// Lumo daemon - robot dashboard backend
#[derive(Parser, Debug)]
#[command(name = "lumod", version, about)]
struct Args {
    /// Directory for the PID and log files
    #[arg(long, global = true, env = "LUMO_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Configuration file (defaults to $LUMO_CONFIG, then the user config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

// ============================================================================
// State Directory
// ============================================================================

/// Explicit directory first, then the user's state dir, then the runtime dir.
fn resolve_state_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        dirs::state_dir()
            .or_else(dirs::runtime_dir)
            .unwrap_or_else(std::env::temp_dir)
            .join("lumo")
    })
}

/// PID file of a daemon instance.
#[derive(Debug, Clone)]
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn in_dir(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("lumod.pid"),
        }
    }

    fn read(&self) -> Option<u32> {
        fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }

    fn write(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&self.path, pid.to_string())
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    fn remove(&self) {
        let _ = fs::remove_file(&self.path);
    }

    /// PID of a live daemon. A file naming a dead process is removed.
    fn running_pid(&self) -> Option<u32> {
        let pid = self.read()?;
        if is_process_running(pid) {
            Some(pid)
        } else {
            self.remove();
            None
        }
    }
}

fn log_file_path(state_dir: &Path) -> PathBuf {
    state_dir.join("lumod.log")
}

fn is_process_running(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

fn send_sigterm(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let Ok(raw) = i32::try_from(pid) else {
            bail!("PID {pid} out of range");
        };
        let result = unsafe { libc::kill(raw, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
}

// ============================================================================
// Commands
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();
    let state_dir = resolve_state_dir(args.state_dir);
    let pid_file = PidFile::in_dir(&state_dir);

    match args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
    }) {
        Command::Start { daemon, config } => start(&state_dir, &pid_file, daemon, config),
        Command::Stop => stop(&pid_file),
        Command::Status => status(&state_dir, &pid_file),
    }
}

fn start(
    state_dir: &Path,
    pid_file: &PidFile,
    daemon: bool,
    config: Option<PathBuf>,
) -> Result<()> {
    if let Some(pid) = pid_file.running_pid() {
        eprintln!("Daemon is already running (PID {pid})");
        eprintln!("Use 'lumod stop' to stop it first.");
        process::exit(1);
    }

    // Fail before forking so config errors reach the terminal
    let config = LumoConfig::load(config.as_deref()).context("Failed to load configuration")?;

    if daemon {
        daemonize(&log_file_path(state_dir))?;
    }

    pid_file.write(process::id())?;
    let result = run_daemon(config);
    pid_file.remove();
    result
}

fn stop(pid_file: &PidFile) -> Result<()> {
    let Some(pid) = pid_file.running_pid() else {
        println!("Daemon is not running.");
        return Ok(());
    };

    println!("Stopping daemon (PID {pid})...");
    send_sigterm(pid)?;

    let deadline = std::time::Instant::now() + STOP_WAIT;
    while std::time::Instant::now() < deadline {
        if !is_process_running(pid) {
            println!("Daemon stopped.");
            return Ok(());
        }
        std::thread::sleep(STOP_POLL);
    }

    eprintln!("Daemon did not stop within {} seconds.", STOP_WAIT.as_secs());
    process::exit(1);
}

fn status(state_dir: &Path, pid_file: &PidFile) -> Result<()> {
    let Some(pid) = pid_file.running_pid() else {
        println!("Daemon is not running.");
        process::exit(1);
    };

    println!("Daemon is running (PID {pid})");
    if let Ok(config) = LumoConfig::load(None) {
        println!("Listening on: {}", config.server.bind);
    }
    let log = log_file_path(state_dir);
    if log.exists() {
        println!("Log: {}", log.display());
    }
    Ok(())
}

fn daemonize(log_path: &Path) -> Result<()> {
    use daemonize::Daemonize;

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")
}

#[tokio::main]
async fn run_daemon(config: LumoConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("lumod=info".parse()?)
                .add_directive("lumo_core=info".parse()?)
                .add_directive("lumo_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        bind = %config.server.bind,
        "Lumo daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let dashboard = Dashboard::from_config(config, cancel_token);
    let running = dashboard.start().await?;

    if let Err(e) = running.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Lumo daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
