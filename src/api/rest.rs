use crate::api::websocket::events_ws;
use crate::api::websocket_stream::video_ws;
use crate::config::{ApiConfig, StreamingConfig};
use crate::ingestion::{IngestionStats, IngestionTotals};
use crate::realtime::{ConnectionRegistry, DispatchStats, DispatchTotals, SubscriptionService};
use crate::security::AuthService;
use crate::video::VideoContext;
use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use log::info;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub subscriptions: SubscriptionService,
    pub video: Arc<VideoContext>,
    pub dispatch_stats: Arc<DispatchStats>,
    pub ingestion_stats: Arc<IngestionStats>,
    pub streaming: StreamingConfig,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub connections: usize,
    pub dispatch: DispatchTotals,
    pub ingestion: IngestionTotals,
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok",
        connections: state.registry.len().await,
        dispatch: state.dispatch_stats.totals(),
        ingestion: state.ingestion_stats.totals(),
    })
}

/// Routes served by the API, without CORS
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/events", get(events_ws))
        .route("/ws/video", get(video_ws))
        .route("/api/health", get(health))
        .with_state(state)
}

pub struct RestApi {
    config: ApiConfig,
    state: AppState,
}

impl RestApi {
    pub fn new(config: &ApiConfig, state: AppState) -> Self {
        Self {
            config: config.clone(),
            state,
        }
    }

    pub async fn run(&self) -> Result<()> {
        // Browser clients connect from other origins
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(false)
            .max_age(Duration::from_secs(3600));

        let app = router(self.state.clone()).layer(cors);

        let addr = self.config.address.clone() + ":" + &self.config.port.to_string();
        let addr: SocketAddr = addr.parse()?;

        info!("API server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;

        axum::Server::from_tcp(listener.into_std()?)?
            .serve(app.into_make_service())
            .await?;

        Ok(())
    }
}
