//! Command-line entry point for Scanorama.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod daemon;
mod logging;
mod runtime;

use commands::{apikeys, discover, hosts, networks, profiles, scan, schedule};

#[derive(Parser)]
#[command(name = "scanorama")]
#[command(about = "Continuous network reconnaissance service", version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run or manage the long-lived server (API + scheduler + worker pool).
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },
    /// Alias for `server` oriented at init systems.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Run only the HTTP API in the foreground.
    Api {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a one-shot port/service scan.
    Scan(scan::ScanArgs),
    /// Run a one-shot discovery sweep.
    Discover(discover::DiscoverArgs),
    /// List and manage observed hosts.
    Hosts(hosts::HostsArgs),
    /// Manage configured networks and exclusions.
    Networks {
        #[command(subcommand)]
        action: networks::NetworksAction,
    },
    /// Inspect and test scan profiles.
    Profiles {
        #[command(subcommand)]
        action: profiles::ProfilesAction,
    },
    /// Manage cron-scheduled jobs.
    Schedule {
        #[command(subcommand)]
        action: schedule::ScheduleAction,
    },
    /// Manage API keys.
    Apikeys {
        #[command(subcommand)]
        action: apikeys::ApikeysAction,
    },
}

#[derive(Subcommand)]
enum ServerAction {
    /// Start the server; detaches unless --foreground is given.
    Start {
        #[arg(long)]
        foreground: bool,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        pid_file: Option<String>,
        #[arg(long)]
        log_file: Option<String>,
    },
    Stop {
        #[arg(long)]
        pid_file: Option<String>,
    },
    Restart {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        pid_file: Option<String>,
        #[arg(long)]
        log_file: Option<String>,
    },
    Status {
        #[arg(long)]
        pid_file: Option<String>,
    },
    /// Show the server log.
    Logs {
        #[arg(long)]
        follow: bool,
        #[arg(long, default_value_t = 50)]
        lines: usize,
        #[arg(long)]
        log_file: Option<String>,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start detached; --background is the default and only mode here.
    Start {
        #[arg(long, default_value_t = true)]
        background: bool,
        #[arg(long)]
        pid_file: Option<String>,
        #[arg(long)]
        log_file: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    Stop {
        #[arg(long)]
        pid_file: Option<String>,
    },
    Status {
        #[arg(long)]
        pid_file: Option<String>,
    },
    Restart {
        #[arg(long)]
        pid_file: Option<String>,
        #[arg(long)]
        log_file: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = scanorama_core::config::AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Server { action } => match action {
            ServerAction::Start {
                foreground,
                host,
                port,
                pid_file,
                log_file,
            } => {
                if foreground {
                    logging::init(&config.logging, log_file.as_deref())?;
                    runtime::run_server(config, host, port, pid_file)
                } else {
                    daemon::start_background(
                        &config,
                        cli.config.as_deref(),
                        host,
                        port,
                        pid_file,
                        log_file,
                    )
                }
            }
            ServerAction::Stop { pid_file } => daemon::stop(&config, pid_file),
            ServerAction::Restart {
                host,
                port,
                pid_file,
                log_file,
            } => daemon::restart(&config, cli.config.as_deref(), host, port, pid_file, log_file),
            ServerAction::Status { pid_file } => daemon::status(&config, pid_file),
            ServerAction::Logs {
                follow,
                lines,
                log_file,
            } => daemon::logs(log_file, follow, lines),
        },
        Command::Daemon { action } => match action {
            DaemonAction::Start {
                background: _,
                pid_file,
                log_file,
                port,
            } => daemon::start_background(&config, cli.config.as_deref(), None, port, pid_file, log_file),
            DaemonAction::Stop { pid_file } => daemon::stop(&config, pid_file),
            DaemonAction::Status { pid_file } => daemon::status(&config, pid_file),
            DaemonAction::Restart {
                pid_file,
                log_file,
                port,
            } => daemon::restart(&config, cli.config.as_deref(), None, port, pid_file, log_file),
        },
        Command::Api { host, port } => {
            logging::init(&config.logging, None)?;
            runtime::run_server(config, host, port, None)
        }
        Command::Scan(args) => block_on(scan::run(config, args)),
        Command::Discover(args) => block_on(discover::run(config, args)),
        Command::Hosts(args) => block_on(hosts::run(config, args)),
        Command::Networks { action } => block_on(networks::run(config, action)),
        Command::Profiles { action } => block_on(profiles::run(config, action)),
        Command::Schedule { action } => block_on(schedule::run(config, action)),
        Command::Apikeys { action } => block_on(apikeys::run(config, action)),
    }
}

/// One-shot commands get a plain multi-threaded runtime and quiet logging
/// to stderr so stdout stays machine-readable.
fn block_on<F: std::future::Future<Output = anyhow::Result<()>>>(future: F) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(future)
}
