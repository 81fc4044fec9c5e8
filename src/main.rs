mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

use vr_av::ToolRegistry;
use vr_core::config::Config;
use vr_media::MediaRegistry;

/// Load the config file (or defaults) and apply environment overrides.
fn load_config(path: Option<&Path>) -> Config {
    let mut config = Config::load_or_default(path);
    config.apply_env();
    config
}

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = load_config(config_path);

    // CLI flags win over the config file.
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting vidrelay server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    vr_server::start(config).await.context("server failed")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise use defaults based on the verbose flag.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new(concat!(
                "vidrelay=trace,vr_core=trace,vr_media=trace,",
                "vr_av=trace,vr_server=trace,tower_http=debug",
            ))
        } else {
            EnvFilter::new(concat!(
                "vidrelay=debug,vr_core=debug,vr_media=debug,",
                "vr_av=debug,vr_server=debug,tower_http=info",
            ))
        }
    });

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::List => list_media(cli.config.as_deref()),
        Commands::CheckTools => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tools(cli.config.as_deref()))
        }
        Commands::Validate { file } => {
            let path = file.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("vidrelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn list_media(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    let registry = MediaRegistry::from_config(&config.media);

    println!("Media directory: {}", registry.dir().display());
    let entries = registry.list();
    if entries.is_empty() {
        println!("No media files found.");
        return Ok(());
    }

    for entry in entries {
        let status = if entry.exists { "✓" } else { "✗" };
        println!(
            "{} {} - {} (rtsp://{}:{}/{})",
            status,
            entry.name,
            entry.path.display(),
            config.transcoder.advertised_host,
            config.relay.port,
            entry.name
        );
    }

    Ok(())
}

async fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = load_config(config_path);
    let tools = ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in tools.check_all().await {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    let relay = &config.relay.binary;
    if relay.exists() {
        println!("✓ relay - {}", relay.display());
    } else {
        all_ok = false;
        println!("✗ relay - {} (not found)", relay.display());
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all features.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let config = Config::load(p)
                .with_context(|| format!("failed to load {}", p.display()))?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Stream mode: {:?}", config.server.stream_mode);
    println!("  Media dir: {}", config.media.dir.display());
    println!("  Relay: {} on port {}", config.relay.binary.display(), config.relay.port);
    match &config.transcoder.enabled_streams {
        Some(ids) => println!("  Enabled streams: {}", ids.join(", ")),
        None => println!("  Enabled streams: all"),
    }
    println!("  MJPEG feeds: {}", config.feeds.len());

    let warnings = config.validate();
    for warning in &warnings {
        println!("  ⚠ {warning}");
    }

    Ok(())
}
