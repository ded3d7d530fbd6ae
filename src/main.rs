use anyhow::Result;
use campus_relay::api::rest::{AppState, RestApi};
use campus_relay::config;
use campus_relay::db::repositories::EventsRepository;
use campus_relay::db::DatabaseService;
use campus_relay::messaging::{AlertNotifier, WhatsAppNotifier};
use campus_relay::services::{
    ChatProvider, ChatRelay, EventGateway, FrameBuffer, GeminiClient, StreamPublisher,
};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

async fn run_app() -> Result<()> {
    // Config path: first argument, then CAMPUS_RELAY_CONFIG
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CAMPUS_RELAY_CONFIG").ok())
        .map(PathBuf::from);

    let mut config = config::load_config(config_path.as_deref())?;
    config::apply_env_overrides(&mut config);

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.api.log_level.as_str()),
    )
    .init();
    info!("Starting campus relay");
    match &config_path {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("Using default configuration"),
    }

    let db = Arc::new(DatabaseService::new(&config.database).await?);

    let notifier = WhatsAppNotifier::new(&config.alerts)?;
    if !notifier.is_configured() {
        warn!("WhatsApp API URL or token missing, alerts will only be logged");
    }
    let notifier: Arc<dyn AlertNotifier> = Arc::new(notifier);

    if config.chat.api_key.is_none() {
        warn!("GEMINI_API_KEY not set, /chat will report provider errors");
    }
    let chat_provider: Arc<dyn ChatProvider> = Arc::new(GeminiClient::new(&config.chat)?);

    let frames = FrameBuffer::new(config.streaming.jpeg_quality);
    let gateway = EventGateway::new(
        EventsRepository::new(db.pool.clone()),
        frames.clone(),
        notifier,
        &config.events,
    );

    let publisher = StreamPublisher::new(frames.clone(), &config.streaming);

    let state = AppState {
        db,
        gateway,
        frames,
        publisher: publisher.clone(),
        chat: ChatRelay::new(chat_provider),
    };

    let http_server = RestApi::new(&config.api, state);
    http_server
        .run(async move {
            // Wait for termination signals
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down...");
            // open /video responses never finish on their own
            publisher.close();
        })
        .await?;

    info!("API server stopped");
    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_app()) {
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
