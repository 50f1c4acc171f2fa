use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use openai_gateway::{
    GatewayService, HttpClient, HttpClientAdapter, HttpHandler,
    config::{ConfigOrigin, ConfigValidator, GatewayConfig, load_config},
    tracing_setup,
    utils::graceful_shutdown::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file (falls back to OPENAI_CONFIG_PATH, then the default paths)
    #[clap(short, long)]
    config: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate the resolved configuration
    Validate {
        /// Configuration file to validate
        #[clap(short, long)]
        config: Option<String>,
    },
    /// Write a sample configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config/openai_instances.json")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(config.or(args.config)),
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(config.or(args.config)).await,
        None => serve(args.config).await,
    }
}

async fn serve(config_path: Option<String>) -> Result<()> {
    let (config, origin) = load_config(config_path.as_deref())
        .context("Failed to load configuration")?;

    tracing_setup::init_tracing(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    tracing::info!("Configuration loaded from {:?}", origin);
    ConfigValidator::validate(&config).map_err(|e| eyre!("Invalid configuration: {}", e))?;

    let http_client: Arc<dyn HttpClient> = Arc::new(
        HttpClientAdapter::new(&config.client).context("Failed to create HTTP client adapter")?,
    );
    let gateway_service = Arc::new(GatewayService::new(&config, http_client));
    log_instances(&config);

    let app = HttpHandler::from_config(gateway_service.clone(), &config).router();

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        signal_handler_shutdown.run_signal_handler().await;
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to address {}", config.listen_addr))?;

    tracing::info!(
        "OpenAI gateway listening on {} (strategy: {}, bearer auth: {})",
        config.listen_addr,
        config.strategy,
        config.inbound_api_key().is_some()
    );

    let server_shutdown = graceful_shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                server_shutdown.wait_for_shutdown_signal().await;
            })
            .await
    });

    // Stop accepting first, then drain and release the client pool
    let finished = tokio::select! {
        joined = &mut server => Some(joined),
        reason = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!("Shutdown signal received: {:?}", reason);
            None
        }
    };

    gateway_service.close().await;

    let joined = match finished {
        Some(joined) => joined,
        None => server.await,
    };
    joined
        .context("Server task failed")?
        .context("Server error")?;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

fn log_instances(config: &GatewayConfig) {
    if config.instances.is_empty() {
        tracing::warn!("No OpenAI instances configured; forwarded calls will fail");
        return;
    }
    for instance in &config.instances {
        tracing::info!("Configured instance: {} -> {}", instance.name, instance.url);
    }
}

/// Resolve and validate the configuration, then print a summary.
fn validate_config_command(config_path: Option<String>) -> Result<()> {
    let (config, origin) = load_config(config_path.as_deref())
        .context("Configuration parsing failed")?;
    println!("Configuration parsing: OK");

    match origin {
        ConfigOrigin::Environment => println!("   Source: OPENAI_INSTANCES environment variable"),
        ConfigOrigin::File(path) => println!("   Source: {}", path.display()),
        ConfigOrigin::Defaults => println!("   Source: built-in defaults (no instances)"),
    }

    ConfigValidator::validate(&config).map_err(|e| eyre!("Configuration validation failed:\n{}", e))?;

    println!("Configuration validation: OK");
    println!();
    println!("Configuration Summary:");
    println!("   Listen Address: {}", config.listen_addr);
    println!("   Strategy: {}", config.strategy);
    println!("   Bearer Auth: {}", config.inbound_api_key().is_some());
    println!("   Instances: {}", config.instances.len());
    for instance in &config.instances {
        println!("     - {} -> {}", instance.name, instance.url);
    }
    Ok(())
}

const SAMPLE_CONFIG: &str = r#"{
  "listen_addr": "0.0.0.0:8000",
  "strategy": "random",
  "instances": [
    {
      "name": "eastus",
      "url": "https://eastus.example.openai.azure.com",
      "api_key": "replace-me"
    },
    {
      "name": "westus",
      "url": "https://westus.example.openai.azure.com",
      "api_key": "replace-me"
    }
  ],
  "client": {
    "request_timeout_secs": 600,
    "connect_timeout_secs": 10,
    "drain_timeout_secs": 30
  },
  "logging": {
    "level": "info",
    "json": true
  }
}
"#;

/// Write a sample configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        return Err(eyre!("Configuration file '{config_path}' already exists"));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    tokio::fs::write(path, SAMPLE_CONFIG)
        .await
        .context("Failed to write config file")?;
    println!("Created sample configuration at: {config_path}");
    println!("   Run 'openai-gateway serve --config {config_path}' to start the server");
    Ok(())
}
