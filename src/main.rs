//! Directory Proxy - authenticating reverse proxy for backend services

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use directory_proxy::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::CheckConfig) => check_config(&config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    // Apply CLI overrides
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

/// Print the effective routing table
fn check_config(config: &Config) -> ExitCode {
    println!("Configuration OK\n");
    println!(
        "Listening on {}:{} under {}",
        config.server.host, config.server.port, config.server.api_prefix
    );
    println!("Token endpoint: {}", config.oauth.primary.token_url);

    println!("\nRoutes ({}):", config.routes.len());
    for rule in &config.routes {
        let target = config
            .applications
            .get(&rule.application_name)
            .map_or("<unregistered>", String::as_str);
        match &rule.rewrite {
            Some(rewrite) => println!(
                "  {} -> {} ({}; '{}' => '{}')",
                rule.match_prefix, target, rule.application_name, rewrite.from, rewrite.to
            ),
            None => println!("  {} -> {} ({})", rule.match_prefix, target, rule.application_name),
        }
    }

    println!("\nAllowed hosts: {}", config.allowlist.hosts.join(", "));
    if let Some(path) = &config.session.relative_path {
        println!("Session path: {path}");
    }
    if config.validation.body_schema.is_some() {
        println!("Body validation: enabled");
    }

    ExitCode::SUCCESS
}

/// Run the proxy server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        routes = config.routes.len(),
        applications = config.applications.len(),
        "Starting directory proxy"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
