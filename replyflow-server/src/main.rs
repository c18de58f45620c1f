use std::sync::Arc;

use clap::Parser;
use replyflow_core::{ReplyflowConfig, ResponseResolver};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "replyflow.toml")]
    config: String,

    /// Validate config and knowledge table, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match ReplyflowConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    let resolver = match ResponseResolver::from_config(&config) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("Failed to build resolver: {}", e);
            std::process::exit(1);
        }
    };

    if args.check {
        println!("✅ Config loaded from {}", args.config);
        println!("✅ Knowledge entries: {}", resolver.knowledge_entries());
        if resolver.has_generator() {
            println!("✅ Generation backend: {} ({})", config.generation.model, config.generation.base_url);
        } else {
            println!("⚠️  Generation disabled: no API key configured");
        }
        return Ok(());
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    replyflow_server::http::start_http_server(resolver, &config, tx.subscribe()).await?;

    Ok(())
}
