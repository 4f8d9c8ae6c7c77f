use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

mod cli;
mod config;

use vbridge_core::{
    AuthMode, ClientConfig, JwtTokenSource, ServiceAccountDeps, ServiceAccountKey, UpstreamClient,
    WreqClient, build_auth,
};
use vbridge_router::{AppState, bridge_router};

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("vbridge failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = cli::Cli::parse();
    let resolved = config::resolve(&cli);
    let mut bridge = resolved.bridge;

    let sa_deps = match bridge.mode {
        AuthMode::ServiceAccount => {
            let key_path = std::env::var("GOOGLE_APPLICATION_CREDENTIALS")
                .map_err(|_| "service-account mode requires GOOGLE_APPLICATION_CREDENTIALS")?;
            let key = ServiceAccountKey::from_file(Path::new(&key_path))?;
            if bridge.project_id.is_none() {
                bridge.project_id = key.project_id.clone();
            }
            if bridge.project_id.is_none() {
                return Err("project id not found; set VERTEX_PROJECT_ID".into());
            }
            Some(ServiceAccountDeps {
                token_source: Arc::new(JwtTokenSource::new(key)?),
                token_store: Arc::new(config::JsonTokenStore::new(resolved.config_path.clone())),
                initial: resolved.credentials,
            })
        }
        AuthMode::ApiKey => None,
    };

    info!(
        mode = bridge.mode.as_str(),
        location = %bridge.location,
        project = %bridge.project_id.as_deref().unwrap_or(""),
        "starting"
    );
    if !matches!(bridge.bind.as_str(), "localhost" | "127.0.0.1" | "::1")
        && bridge.proxy_key.is_empty()
    {
        warn!("server is exposed without a proxy key, set PROXY_KEY");
    }

    let auth = build_auth(&bridge, sa_deps)?;
    auth.start().await;

    let client: Arc<dyn UpstreamClient> = Arc::new(WreqClient::new(ClientConfig::default())?);
    let config = Arc::new(bridge);
    let app = bridge_router(AppState {
        config: config.clone(),
        auth: auth.clone(),
        client,
    });

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    auth.stop();
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vbridge=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
