use std::{net::SocketAddr, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use vidgrab_backend::{
    admission::AdmissionController,
    config::ServerConfig,
    error::ApiError,
    fetch::YtDlpFetcher,
    http::{AppState, cors_layer, router},
    settings::SettingsStore,
    stats::DownloadStats,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "vidgrab_backend=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = ServerConfig::from_env()
        .map_err(|error| ApiError::internal(format!("Invalid configuration: {error}")))?;

    if !config.trust_proxy_headers {
        warn!("TRUST_PROXY_HEADERS=false: rate limits use the socket IP of each request.");
    }
    if config.admin.is_none() {
        warn!("ADMIN_PASSWORD is not set. The admin panel API is disabled.");
    }

    let settings = SettingsStore::new(config.initial_settings.clone())
        .map_err(|error| ApiError::internal(format!("Invalid initial settings: {error}")))?;
    let initial = settings.get();
    info!(
        "Admission limits: {} download(s) per {}s, max file size {} MB",
        initial.rate_limit, initial.window_seconds, initial.max_file_size_mb
    );

    let admission = Arc::new(AdmissionController::new(Arc::new(settings)));
    spawn_rate_limit_sweeper(Arc::clone(&admission), config.sweep_interval);

    let state = AppState {
        admission,
        stats: Arc::new(DownloadStats::default()),
        fetcher: Arc::new(YtDlpFetcher::new(&config.yt_dlp_program)),
        admin: config.admin.clone().map(Arc::new),
        trust_proxy_headers: config.trust_proxy_headers,
    };

    let app = router(state).layer(cors_layer(&config.allowed_origins));

    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|error| {
        ApiError::internal(format!("Could not bind {}: {error}", config.bind_addr))
    })?;

    info!("Backend ready on http://{}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

fn spawn_rate_limit_sweeper(admission: Arc<AdmissionController>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            admission.rate_limiter().sweep(Utc::now());
        }
    });
}
