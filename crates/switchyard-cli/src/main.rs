//! `switchyard`: republish downstream MCP servers over HTTP or stdio.

mod config_loader;
mod logging;

use clap::Parser;
use config_loader::{init_config, load_config, log_dir, InitOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use switchyard_core::{ActiveGroup, Config, ServeMode};
use switchyard_gateway::GatewayServer;
use switchyard_mcp::{ConnectionDeps, DefaultConnector, ProxyRegistry, StartupMode};
use switchyard_security::{DictionaryRedactor, FileAuditSink};
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "switchyard",
    version,
    about = "Switchyard: MCP proxy and session multiplexer"
)]
struct Cli {
    /// Config file path or http(s) URL (`.toml` files are read as TOML)
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Accept invalid TLS certificates when fetching a remote config
    #[arg(long)]
    insecure: bool,

    /// Serve this downstream over stdin/stdout
    #[arg(long)]
    stdio_target: Option<String>,

    /// Only list capabilities of servers in this group
    #[arg(long)]
    group: Option<String>,

    /// In stdio mode, also append logs to switchyard.log next to the config
    #[arg(long)]
    verbose: bool,

    /// Write the default config to the init destination and exit
    #[arg(long)]
    init: bool,

    /// Destination directory for --init (default: ~/switchyard)
    #[arg(long)]
    init_dest: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.init {
        match init_config(cli.init_dest.as_deref())? {
            InitOutcome::Created(path) => println!("Default config copied to {}", path.display()),
            InitOutcome::AlreadyExists(path) => println!("Config already exists at {}", path.display()),
        }
        return Ok(());
    }

    let config = load_config(&cli.config, cli.insecure).await?;
    let stdio = cli.stdio_target.is_some() || config.proxy.serve_mode() == ServeMode::Stdio;

    if stdio {
        logging::init_stdio(cli.verbose, &log_dir(&cli.config))?;
    } else {
        logging::init_http();
    }
    info!(config = %cli.config, "Configuration loaded successfully");

    let group = ActiveGroup::resolve(&config, cli.group.as_deref());
    let deps = connection_deps(&config);

    if stdio {
        let target = config.stdio_target(cli.stdio_target.as_deref())?;
        run_stdio(&config, &group, deps, target).await
    } else {
        run_http(&config, &group, deps).await
    }
}

fn connection_deps(config: &Config) -> ConnectionDeps {
    let redactor = Arc::new(DictionaryRedactor::from_files(
        config.redaction.dictionary_paths.clone(),
    ));
    let audit = Arc::new(FileAuditSink::new(config.redaction.audit_dir.clone()));
    ConnectionDeps::new(Arc::new(DefaultConnector)).with_redaction(redactor, audit)
}

async fn run_http(config: &Config, group: &ActiveGroup, deps: ConnectionDeps) -> anyhow::Result<()> {
    let registry = Arc::new(ProxyRegistry::start(config, group, deps, StartupMode::Http).await?);
    let app = GatewayServer::build(registry.clone(), config.proxy.serve_mode());

    let addr = config.proxy.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        addr = %addr,
        name = %config.proxy.name,
        mode = ?config.proxy.serve_mode(),
        servers = ?registry.names(),
        "Server listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    registry.shutdown().await;
    served?;
    Ok(())
}

async fn run_stdio(
    config: &Config,
    group: &ActiveGroup,
    deps: ConnectionDeps,
    target: String,
) -> anyhow::Result<()> {
    info!(target = %target, "Starting MCP proxy in stdio mode");
    let registry = ProxyRegistry::start(config, group, deps, StartupMode::Stdio { target }).await?;

    let outcome = tokio::select! {
        served = registry.serve_stdio(tokio::io::stdin(), tokio::io::stdout()) => served,
        () = shutdown_signal() => Ok(()),
    };
    registry.shutdown().await;
    if let Err(e) = &outcome {
        error!(error = %e, "stdio session failed");
    }
    Ok(outcome?)
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
