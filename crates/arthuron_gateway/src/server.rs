use crate::session::SessionNegotiator;
use crate::types::{Ack, ApiError, ChunkRequest, HealthResponse, RelayHealth, SessionQuery};
use arthuron_core::{ConfigError, ServerConfig};
use arthuron_voice::{AudioBuffer, OutputFormat, RelayHandle};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::convert::Infallible;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use uuid::Uuid;

/// API routes, in the order `/routes` reports them.
pub const ROUTES: &[&str] = &[
    "/health",
    "/routes",
    "/session",
    "/tts/chunk",
    "/tts/flush",
    "/tts/stream",
];

/// The text-to-speech feature: either a running relay or the configuration
/// error that prevented starting it.
#[derive(Clone)]
pub enum TtsService {
    Ready(RelayHandle),
    Unavailable(ConfigError),
}

impl TtsService {
    fn relay(&self) -> Result<&RelayHandle, ApiError> {
        match self {
            TtsService::Ready(relay) => Ok(relay),
            TtsService::Unavailable(e) => Err(ApiError::Config(e.clone())),
        }
    }
}

/// Shared state for the gateway server.
#[derive(Clone)]
struct AppState {
    tts: TtsService,
    session: Arc<SessionNegotiator>,
    /// Content type of `/tts/stream`, fixed for the process.
    content_type: &'static str,
    started_at: String,
}

/// The gateway HTTP server.
///
/// Bridges browser clients to the relay:
/// - `POST /tts/chunk`: queue a text fragment
/// - `POST /tts/flush`: end the current utterance
/// - `GET /tts/stream`: long-lived chunked audio
/// - `GET /session`: conversational session descriptor
/// - `GET /health`, `GET /routes`
///
/// Any other GET is answered from the static directory.
pub struct GatewayServer {
    state: AppState,
    static_dir: PathBuf,
    host: String,
    port: u16,
}

impl GatewayServer {
    pub fn new(
        tts: TtsService,
        session: SessionNegotiator,
        format: OutputFormat,
        config: &ServerConfig,
    ) -> Self {
        Self {
            state: AppState {
                tts,
                session: Arc::new(session),
                content_type: format.mime_type(),
                started_at: chrono::Utc::now().to_rfc3339(),
            },
            static_dir: config.static_dir.clone(),
            host: config.host.clone(),
            port: config.port,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/routes", get(routes))
            .route("/session", get(session))
            .route("/tts/chunk", post(tts_chunk))
            .route("/tts/flush", post(tts_flush))
            .route("/tts/stream", get(tts_stream))
            .fallback_service(ServeDir::new(&self.static_dir))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| anyhow::anyhow!("Gateway failed to bind {}: {}", addr, e))?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Gateway listening on http://{}", listener.local_addr()?);
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        tracing::info!("Gateway stopped");
        Ok(())
    }
}

// ============================================================================
// Route handlers
// ============================================================================

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let relay = match &state.tts {
        TtsService::Ready(relay) => RelayHealth::running(
            relay.state(),
            relay.buffer().len(),
            relay.buffer().dropped(),
            relay.stats(),
        ),
        TtsService::Unavailable(e) => RelayHealth::unconfigured(e),
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        started_at: state.started_at.clone(),
        relay,
    })
}

async fn routes() -> Json<Vec<&'static str>> {
    let mut routes = ROUTES.to_vec();
    routes.sort_unstable();
    Json(routes)
}

/// GET /session: negotiate a conversational session.
async fn session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let params = state.session.params(
        query.voice.as_deref(),
        query.speed.as_deref(),
        query.temp.as_deref(),
    );
    let descriptor = state.session.negotiate(&params).await?;
    Ok(Json(descriptor))
}

/// POST /tts/chunk: queue one text fragment. Never waits on the upstream.
async fn tts_chunk(
    State(state): State<AppState>,
    body: Result<Json<ChunkRequest>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let relay = state.tts.relay()?;
    let Json(req) = body?;
    let seq = relay.submit(req.text)?;
    tracing::debug!(seq, "Accepted text fragment");
    Ok(Json(Ack::ok()))
}

/// POST /tts/flush: close the current utterance. Body is ignored.
async fn tts_flush(State(state): State<AppState>) -> Result<Json<Ack>, ApiError> {
    let relay = state.tts.relay()?;
    let seq = relay.flush()?;
    tracing::debug!(seq, "Accepted flush");
    Ok(Json(Ack::ok()))
}

/// Logs when an audio consumer goes away, whichever side ended the stream.
struct ConsumerGuard {
    id: Uuid,
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        tracing::info!(consumer = %self.id, "Audio stream consumer detached");
    }
}

/// GET /tts/stream: write each audio frame to the client as it arrives.
async fn tts_stream(State(state): State<AppState>) -> Result<Response, ApiError> {
    let relay = state.tts.relay()?;
    let guard = ConsumerGuard { id: Uuid::new_v4() };
    tracing::info!(consumer = %guard.id, "Audio stream consumer attached");

    let buffer: Arc<AudioBuffer> = relay.buffer().clone();
    let frames = futures_util::stream::unfold((buffer, guard), |(buffer, guard)| async move {
        let frame = buffer.pull().await?;
        Some((Ok::<_, Infallible>(frame.into_bytes()), (buffer, guard)))
    });

    Ok((
        [
            (header::CONTENT_TYPE, state.content_type),
            (header::CACHE_CONTROL, "no-cache, no-store"),
        ],
        Body::from_stream(frames),
    )
        .into_response())
}
