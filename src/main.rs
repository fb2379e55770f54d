use clap::Parser;
use sipbridge::http::{create_router, HttpState};
use sipbridge::metrics::GatewayMetrics;
use sipbridge::{BrowserHub, GatewayConfig, SignalingEngine};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// WebRTC to SIP signaling gateway. Configuration comes from the
/// environment; the flags below override the common knobs.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to an env file loaded before reading the environment
    #[arg(long)]
    env_file: Option<String>,

    /// HTTP/WebSocket port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Local SIP port (overrides LOCAL_SIP_PORT)
    #[arg(long)]
    sip_port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    match &args.env_file {
        Some(path) => {
            dotenv::from_path(path).ok();
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    let mut config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(port) = args.sip_port {
        config.local_sip_port = port;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Arc::new(config)).await {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Arc<GatewayConfig>) -> sipbridge::Result<()> {
    let metrics = Arc::new(GatewayMetrics::default());
    let cancel_token = CancellationToken::new();

    let (engine, hub) = if config.enable_sip_gateway {
        let (engine, events) =
            SignalingEngine::new(config.clone(), metrics.clone(), cancel_token.child_token())
                .await?;
        engine.ping_relay().await?;
        info!(
            "media relay reachable at {}, SIP on udp/{} advertising {}",
            config.relay_addr(),
            config.local_sip_port,
            config.advertised_addr()
        );
        engine.start();
        let hub = BrowserHub::new(Some(engine.clone()), config.clone());
        hub.run_events(events);
        (Some(engine), hub)
    } else {
        info!("SIP gateway disabled, running signaling hub only");
        (None, BrowserHub::new(None, config.clone()))
    };

    let state = HttpState {
        hub,
        engine: engine.clone(),
        config: config.clone(),
        metrics,
    };
    let listener = tokio::net::TcpListener::bind(config.http_bind_addr()).await?;
    info!("HTTP/WebSocket listening on {}", config.http_bind_addr());
    let app = create_router(state);
    let http = tokio::spawn(async move { axum::serve(listener, app).await });

    shutdown_signal().await;
    info!("shutdown signal received");
    if let Some(engine) = engine {
        engine.shutdown().await;
    }
    cancel_token.cancel();
    http.abort();
    info!("bye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
