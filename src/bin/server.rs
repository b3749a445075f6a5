//! Anonymous FTP server binary.
//!
//! Run with: cargo run --bin anon-ftpd -- --root /srv/ftp

use anon_ftpd::{Config, LogFormat, Server};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(short, long, default_value = "21")]
    port: u16,

    /// Root directory for FTP operations
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Log format (json or text)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Log file path
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = if let Some(config_path) = args.config {
        match Config::from_file(&config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load config: {e}");
                std::process::exit(1);
            }
        }
    } else {
        let mut config = Config::default();
        config.bind_address = args.bind;
        config.port = args.port;

        if let Some(root) = args.root {
            config.root_dir = root;
        }
        if let Some(log_format) = args.log_format {
            config.logging.format = log_format;
        }
        if let Some(log_file) = args.log_file {
            config.logging.file = Some(log_file);
        }
        if args.verbose {
            config.logging.level = "debug".to_string();
        }

        config
    };

    let _log_guard = if let Some(ref log_file) = config.logging.file {
        if let Some(parent) = log_file.parent() {
            if !parent.exists() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    eprintln!("Warning: failed to create log directory: {e}");
                    eprintln!("Falling back to stderr logging");
                    config.logging.file = None;
                }
            }
        }

        if config.logging.file.is_some() {
            let file_appender = tracing_appender::rolling::daily(
                log_file.parent().expect("log file must have parent directory"),
                log_file
                    .file_name()
                    .expect("log file must have filename")
                    .to_string_lossy()
                    .as_ref(),
            );
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            match config.logging.format {
                LogFormat::Json => {
                    tracing_subscriber::fmt()
                        .json()
                        .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                        .with_writer(non_blocking)
                        .init();
                }
                LogFormat::Text => {
                    tracing_subscriber::fmt()
                        .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                        .with_writer(non_blocking)
                        .init();
                }
            }

            Some(guard)
        } else {
            None
        }
    } else {
        None
    };

    if _log_guard.is_none() {
        match config.logging.format {
            LogFormat::Json => {
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                    .init();
            }
            LogFormat::Text => {
                tracing_subscriber::fmt()
                    .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                    .init();
            }
        }
    }

    info!(
        event = "server_starting",
        version = env!("CARGO_PKG_VERSION"),
        "starting anonymous FTP server"
    );

    if !config.root_dir.exists() {
        info!(event = "creating_root_directory", directory = ?config.root_dir, "creating root directory");
        if let Err(e) = std::fs::create_dir_all(&config.root_dir) {
            error!(event = "root_directory_creation_failed", error = %e, "failed to create root directory");
            std::process::exit(1);
        }
    }

    if let Err(e) = config.validate() {
        error!(event = "configuration_validation_failed", error = %e, "configuration validation failed");
        std::process::exit(1);
    }

    info!(
        event = "server_configuration",
        bind_address = %config.bind_address,
        port = config.port,
        root_dir = ?config.root_dir,
        max_command_line_bytes = config.max_command_line_bytes,
        control_idle_timeout_secs = config.control_idle_timeout_secs,
        "server configuration"
    );

    let server = match Server::bind(config).await {
        Ok(s) => s,
        Err(e) => {
            error!(event = "server_bind_failed", error = %e, "failed to bind control listener");
            std::process::exit(1);
        }
    };

    info!(event = "server_running", "accepting connections");

    if let Err(e) = server.run().await {
        error!(event = "server_error", error = %e, "server encountered a fatal error");
        std::process::exit(1);
    }
}
