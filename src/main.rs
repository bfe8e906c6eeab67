use anyhow::Result;
use log::{error, info};
use pathcast::api::{AppState, RestApi};
use pathcast::config;
use pathcast::db::repositories::{
    CamerasRepository, PathEventsRepository, SettingsRepository, UsersRepository,
};
use pathcast::db::DatabaseService;
use pathcast::ingestion::IngestionPipeline;
use pathcast::messaging::{self, DeliveryHandler, MessageBrokerTrait};
use pathcast::realtime::{
    BroadcastDispatcher, ConnectionRegistry, InMemoryRegistry, SubscriptionAuthorizer,
    SubscriptionService,
};
use pathcast::security::AuthService;
use pathcast::services::DeviceDirectory;
use pathcast::video::probe::FfprobeProbe;
use pathcast::video::transcode::FfmpegTranscoder;
use pathcast::video::{recording_server, TranscodePipeline, VideoContext};
use std::path::PathBuf;
use std::sync::Arc;

async fn run_app() -> Result<()> {
    let config_path = std::env::var_os("CONFIG_PATH").map(PathBuf::from);
    let config = config::load_config(config_path.as_deref())?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.api.log_level.as_str()),
    )
    .init();
    info!("Starting pathcast {}", env!("CARGO_PKG_VERSION"));

    let database = DatabaseService::new(&config.database).await?;
    let cameras = Arc::new(CamerasRepository::new(database.pool.clone()));
    let directory: Arc<dyn DeviceDirectory> = cameras;
    let users = Arc::new(UsersRepository::new(database.pool.clone()));
    let settings = Arc::new(SettingsRepository::new(database.pool.clone()));
    let path_events = Arc::new(PathEventsRepository::new(database.pool.clone()));

    let registry: Arc<dyn ConnectionRegistry> = Arc::new(InMemoryRegistry::new());
    let dispatcher = Arc::new(BroadcastDispatcher::new(registry.clone()));
    let authorizer = SubscriptionAuthorizer::new(directory.clone(), users.clone());

    let ingestion = Arc::new(IngestionPipeline::new(
        config.message_broker.path_topic.clone(),
        directory.clone(),
        path_events,
        dispatcher.clone(),
    ));

    let message_broker = messaging::broker::create_message_broker(config.message_broker.clone()).await?;
    let handler: Arc<dyn DeliveryHandler> = ingestion.clone();
    let subscription = message_broker
        .subscribe_pattern(&config.message_broker.binding_pattern(), handler)
        .await?;
    info!(
        "Ingesting path events on {} (subscription {})",
        config.message_broker.binding_pattern(),
        subscription
    );

    let video_config = config.video.clone();
    std::fs::create_dir_all(video_config.temp_dir())?;
    let video = VideoContext {
        recording_server: recording_server::build(&video_config.recording_server)?,
        pipeline: TranscodePipeline::new(
            video_config.temp_dir(),
            video_config.chunk_size,
            Arc::new(FfmpegTranscoder::new(
                video_config.transcoder.binary.clone(),
                video_config.transcoder.args.clone(),
            )),
        ),
        probe: Arc::new(FfprobeProbe::new(video_config.transcoder.probe_binary.clone())),
        settings,
        authorizer: authorizer.clone(),
        config: video_config,
    };

    let state = AppState {
        auth: Arc::new(AuthService::new(&config.security, users)),
        registry: registry.clone(),
        subscriptions: SubscriptionService::new(registry, authorizer),
        video: Arc::new(video),
        dispatch_stats: dispatcher.stats(),
        ingestion_stats: ingestion.stats(),
        streaming: config.streaming.clone(),
    };

    let api = RestApi::new(&config.api, state);

    tokio::select! {
        result = api.run() => {
            if let Err(e) = result {
                error!("API server failed: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    message_broker.shutdown().await;
    info!("Message broker consumers stopped");

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
