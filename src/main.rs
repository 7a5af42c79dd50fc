//! thumbkey - an on-demand image derivation cache.
//!
//! This binary starts the HTTP server and configures all components.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thumbkey::{
    config::{CheckConfig, Cli, Command, ServeConfig, SourceArgs, SourceDescriptor},
    server::{create_router, RouterConfig},
    service::{build_resolvers, Resolver, SourceMap},
    storage::RetryPolicy,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Check(config) => run_check(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let descriptors = match config.sources.load_sources() {
        Ok(descriptors) => descriptors,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("thumbkey v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    for descriptor in &descriptors {
        log_descriptor(descriptor);
    }
    info!("  Retries: {}", config.sources.retries);
    info!("  Max upload: {}MB", config.max_upload_bytes / (1024 * 1024));

    let resolvers = match build_resolvers(&descriptors, &retry_policy(&config.sources)).await {
        Ok(resolvers) => resolvers,
        Err(e) => {
            error!("Failed to initialize sources: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let sources = SourceMap::new(resolvers);
    let router = create_router(sources.clone(), build_router_config(&config));

    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    if sources.len() == 1 {
        info!("    curl http://{}/<image>_s150x150.jpg", addr);
    } else {
        for name in sources.names() {
            info!("    curl http://{}/{}/<image>_s150x150.jpg", addr, name);
        }
    }
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn log_descriptor(descriptor: &SourceDescriptor) {
    info!(
        "  Source '{}': {} -> cache {} ({:?}, cache originals: {})",
        descriptor.name,
        descriptor.source.kind(),
        descriptor.cache.kind(),
        descriptor.processor,
        descriptor.caches_originals()
    );
}

fn retry_policy(args: &SourceArgs) -> RetryPolicy {
    RetryPolicy::new(args.retries)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "thumbkey=debug,tower_http=debug"
    } else {
        "thumbkey=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_max_upload_bytes(config.max_upload_bytes)
        .with_expose_errors(config.debug)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    println!("thumbkey Configuration Check");
    println!("════════════════════════════");
    println!();

    if let Err(e) = config.sources.validate() {
        println!("✗ Arguments: {}", e);
        return ExitCode::FAILURE;
    }

    let descriptors = match config.sources.load_sources() {
        Ok(descriptors) => {
            println!("✓ Loaded {} source descriptor(s)", descriptors.len());
            descriptors
        }
        Err(e) => {
            println!("✗ Source descriptors: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let resolvers = match build_resolvers(&descriptors, &retry_policy(&config.sources)).await {
        Ok(resolvers) => resolvers,
        Err(e) => {
            println!("✗ {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut failed = false;
    for resolver in &resolvers {
        println!();
        println!(
            "Source '{}' ({} -> cache {})",
            resolver.name(),
            resolver.source().backend(),
            resolver.cache().backend()
        );
        if !check_resolver(resolver, config.test_key.as_deref()).await {
            failed = true;
        }
    }

    println!();
    println!("════════════════════════════");
    if failed {
        println!("✗ Some checks failed");
        return ExitCode::FAILURE;
    }
    println!("✓ All checks passed!");

    ExitCode::SUCCESS
}

/// Probe both stores of a resolver. Returns false on any failure.
async fn check_resolver(resolver: &Resolver, test_key: Option<&str>) -> bool {
    let mut ok = true;

    // probe key is expected to be absent
    let probe = "/__thumbkey_probe__.jpg";
    match resolver.cache().exists(probe).await {
        Ok(_) => println!("  ✓ cache reachable"),
        Err(e) => {
            println!("  ✗ cache: {}", e);
            ok = false;
        }
    }

    if let Some(key) = test_key {
        match resolver.source().exists(key).await {
            Ok(true) => println!("  ✓ source key '{}' found", key),
            Ok(false) => {
                println!("  ✗ source key '{}' not found", key);
                ok = false;
            }
            Err(e) => {
                println!("  ✗ source: {}", e);
                ok = false;
            }
        }
    }

    ok
}
