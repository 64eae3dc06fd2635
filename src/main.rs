use anyhow::{Context, Result};
use clap::Parser;
use ingress_guard::config::GuardConfig;
use ingress_guard::heartbeat::Heartbeat;
use ingress_guard::server::GuardServer;
use log::info;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Rate-limiting HTTP ingress guard for a single backend host")]
struct Args {
    /// Config file path
    #[clap(short, long, env = "GUARD_CONFIG")]
    config: String,

    /// Address to listen on
    #[clap(long, env = "GUARD_LISTEN")]
    listen: Option<SocketAddr>,

    /// Backend origin to forward admitted requests to
    #[clap(long, env = "GUARD_BACKEND")]
    backend: Option<String>,

    /// Requests allowed per source per minute before blacklisting
    #[clap(long, env = "GUARD_FREQUENCY")]
    frequency: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    // Parse command-line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = GuardConfig::from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;

    // Override config with command-line arguments
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(frequency) = args.frequency {
        config.frequency = frequency;
    }
    config.validate()?;

    info!(
        "starting ingress guard on {} for backend {} (ceiling {} requests/minute)",
        config.listen_addr, config.backend, config.frequency
    );

    let shutdown = CancellationToken::new();

    // Heartbeat runs independently of request handling
    let heartbeat = Heartbeat::from_config(&config).map(|hb| hb.spawn(shutdown.child_token()));

    // Create and start the guard server
    let server = GuardServer::new(config);
    let admission = server.admission();
    let serve_token = shutdown.child_token();
    let mut server_task = tokio::spawn(async move { server.run(serve_token).await });

    tokio::select! {
        result = &mut server_task => {
            result.context("server task panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            shutdown.cancel();
            server_task.await.context("server task panicked")??;
        }
    }

    shutdown.cancel();
    if let Some(task) = heartbeat {
        let _ = task.await;
    }

    info!(
        "server stopped: {} sources tracked, {} blacklisted",
        admission.tracked_sources(),
        admission.blacklisted_sources()
    );

    Ok(())
}
