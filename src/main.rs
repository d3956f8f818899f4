use std::path::{Path, PathBuf};

use clap::Parser;
use saml_sp::{
    auth::{SamlProvider, ServiceProviderRegistry},
    config::{self, AppConfig},
    observability, routes,
};

/// Config file used when `--config` is not given.
const DEFAULT_CONFIG_PATH: &str = "saml-sp.toml";

/// CLI arguments for the SAML service provider
#[derive(Parser, Debug)]
#[command(version, about = "SAML 2.0 service provider", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./saml-sp.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the service provider server (default)
    Serve,
    /// Print the SP metadata document to hand to the identity provider
    Metadata {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = PathBuf::from(args.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));

    match args.command {
        Some(Command::Metadata { output }) => run_metadata_export(&config_path, output),
        Some(Command::Serve) | None => run_server(&config_path).await,
    }
}

fn load_config(config_path: &Path) -> AppConfig {
    match AppConfig::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    }
}

/// Write the SP metadata to a file or stdout.
fn run_metadata_export(config_path: &Path, output: Option<String>) {
    let config = load_config(config_path);

    let metadata = match config
        .saml
        .build_service_provider()
        .and_then(|sp| sp.metadata_xml().map_err(config::ConfigError::from))
    {
        Ok(xml) => xml,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &metadata) {
                eprintln!("Error writing metadata to {}: {}", path, e);
                std::process::exit(1);
            }
            eprintln!("SP metadata written to {}", path);
        }
        None => println!("{}", metadata),
    }
}

async fn run_server(config_path: &Path) {
    let config = load_config(config_path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    tracing::info!(
        config_file = %config_path.display(),
        "Starting SAML service provider"
    );

    let sp_config = match config.saml.build_service_provider() {
        Ok(sp) => sp,
        Err(e) => {
            tracing::error!(error = %e, "Invalid SAML configuration");
            std::process::exit(1);
        }
    };

    let (provider, metadata) = match SamlProvider::new(
        sp_config,
        config.saml.attributes.clone(),
        ServiceProviderRegistry::global().clone(),
    )
    .await
    {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize SAML provider");
            std::process::exit(1);
        }
    };

    let validator = provider
        .validator()
        .clone()
        .with_clock_skew(config.saml.clock_skew());
    let provider = provider.with_validator(validator);

    let secure_cookies = config.saml.acs_url.starts_with("https://");
    if !secure_cookies {
        tracing::warn!(
            acs_url = %config.saml.acs_url,
            "ACS is not served over HTTPS; session cookies will not survive the IdP's cross-site POST"
        );
    }

    let state = routes::AppState::new(
        provider,
        metadata,
        config.saml.session_cookie_name.clone(),
        secure_cookies,
    );
    let app = routes::build_app(&config.server, state);

    let bind_addr = config.server.socket_addr();
    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %bind_addr, error = %e, "Failed to bind to address");
            std::process::exit(1);
        }
    };

    tracing::info!(address = %bind_addr, "Server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
