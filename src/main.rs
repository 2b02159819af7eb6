use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use dendrite::{
    GatewayServer, GatewayService, HttpDispatcher,
    config::{GatewayConfig, GatewayConfigValidator, loader::load_config},
    metrics, tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await, // Default to serve with config from args
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config: GatewayConfig = load_config(config_path)
        .await
        .wrap_err_with(|| format!("Failed to load configuration from {config_path}"))?;
    GatewayConfigValidator::validate(&config)
        .map_err(|e| eyre!("Invalid configuration in {config_path}: {e}"))?;

    tracing_setup::init_tracing_with_config(&config.logging.level, config.logging.json, true)?;
    metrics::init_metrics()?;

    let config = Arc::new(config);
    let dispatcher = Arc::new(
        HttpDispatcher::new(&config.dispatch).wrap_err("Failed to create HTTP dispatcher")?,
    );
    let gateway = Arc::new(
        GatewayService::new(config.clone(), dispatcher)
            .wrap_err("Failed to create gateway service")?,
    );

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler = {
        let graceful_shutdown = graceful_shutdown.clone();
        tokio::spawn(async move { graceful_shutdown.run_signal_handler().await })
    };

    let server = GatewayServer::new(gateway, graceful_shutdown.shutdown_token())?;
    let running = server
        .start()
        .await?
        .ok_or_else(|| eyre!("Gateway server was already started"))?;

    println!(
        "Dendrite gateway listening on {} (cache: {}, queue: {})",
        running.local_addr, config.cache, config.queue
    );

    let server_result = running.task.await.context("Server task panicked")?;
    signal_handler.abort();
    server_result?;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    // First check if file exists and is readable
    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}:{}", config.host, config.port);
            println!("   • Routing: {:?}", config.routing.targets());
            println!("   • Cache: {}", config.cache);
            println!("   • Queue: {}", config.queue);
            println!(
                "   • Request Timeout: {}",
                config.request_timeout.as_deref().unwrap_or("none")
            );
            println!("   • Basic Auth Users: {}", config.basic_auth.len());
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure the host is an IP address (e.g., '0.0.0.0')");
            println!("   • Give every routing target a dispatch endpoint starting with http:// or https://");
            println!("   • Write request_timeout as a duration (e.g., '30s', '1m 30s')");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Dendrite Gateway Configuration

host = "0.0.0.0"
port = 8080

# Memoize successful results per request key
cache = false
# Handle one request at a time, in arrival order
queue = false
# Give up waiting for a result after this long (504)
# request_timeout = "30s"

# Route the key (a URL) by its host name
[routing]
mode = "host"

[routing.hosts]
"example.com" = "scrape"

# Alternatively route exact keys:
# [routing]
# mode = "literal"
# [routing.requests]
# STATE = "state"

[response]
content_type = "text/plain"

# [response.headers]
# "Cache-Control" = "no-store"

# [basic_auth]
# alice = "change-me"

[fields]
expected = "result"
put = "request"
# put_body = "body"
# put_params = "params"
params_prefix = ""

[dispatch]
timeout_secs = 30

[dispatch.endpoints]
scrape = "http://127.0.0.1:9081/"

[logging]
level = "info"
json = false
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'dendrite serve --config {config_path}' to start the server");
    Ok(())
}
