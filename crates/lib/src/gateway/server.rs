//! Relay HTTP server: platform webhooks in, aggregator replies back out (single port).

use crate::channels::{
    InboundMessage, MessageContent, MessengerChannel, WhatsAppChannel,
};
use crate::config::{self, Config};
use crate::forward::{ForwardError, ForwardOutcome, Forwarder};
use crate::gateway::protocol::{ReplyEnvelope, VerifyQuery, WebhookPayload, EVENT_RECEIVED};
use crate::media::{ImageFetcher, ImageStore};
use crate::normalize;
use crate::reply::ReplyDispatcher;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared, read-only state for every request: config and the outbound clients built from it.
#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<Config>,
    pub fetcher: ImageFetcher,
    pub forwarder: Forwarder,
    pub dispatcher: ReplyDispatcher,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Outbound HTTP client shared by every component; carries the configured request timeout.
pub fn http_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()
        .context("building http client")
}

impl RelayState {
    pub fn from_config(config: Config) -> Result<Self> {
        let client = http_client(&config)?;
        let graph = config.graph_api_base();
        let messenger = MessengerChannel::new(
            graph,
            config::secret(&config.messenger.page_access_token),
            client.clone(),
        );
        let whatsapp = WhatsAppChannel::new(
            graph,
            config::secret(&config.whatsapp.access_token),
            client.clone(),
        );
        let aggregator_token = config::secret(&config.aggregator.token).unwrap_or_default();
        let fetcher = ImageFetcher::new(
            client.clone(),
            ImageStore::new(config.images_dir.clone()),
            whatsapp.clone(),
        );
        let forwarder = Forwarder::new(
            client,
            config::secret(&config.aggregator.url).unwrap_or_default(),
            aggregator_token.clone(),
            config.aggregator.app_name.clone(),
        );
        let dispatcher =
            ReplyDispatcher::new(aggregator_token, Arc::new(messenger), Arc::new(whatsapp));
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config: Arc::new(config),
            fetcher,
            forwarder,
            dispatcher,
            shutdown: Arc::new(shutdown),
        })
    }

    /// Release requests held open by the verify endpoint so graceful shutdown can drain.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    async fn shutting_down(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|stopping| *stopping).await;
    }
}

/// Routes: `/` health, `/webhook` verify + events, `/receptor` aggregator replies.
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .route("/receptor", post(receive_reply))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Run the relay; binds to config.server.bind:config.server.port and blocks until shutdown (SIGINT/SIGTERM).
/// Refuses to start without a verify token or an aggregator URL.
pub async fn run_server(config: Config) -> Result<()> {
    config.validate()?;
    let bind_addr = format!("{}:{}", config.server.bind.trim(), config.server.port);
    let state = RelayState::from_config(config)?;
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("relay listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        state.begin_shutdown();
    })
    .await
    .context("relay server exited")?;
    log::info!("relay stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// Logs `ip | time | method | path` for every request. The ip is x-forwarded-for when present.
/// The query is left out; the verify query carries the subscription token.
async fn log_request(req: Request, next: Next) -> Response {
    let ip = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|c| c.0.ip().to_string())
        })
        .unwrap_or_else(|| "-".to_string());
    log::info!("{}", request_line(&ip, req.method(), req.uri()));
    next.run(req).await
}

fn request_line(ip: &str, method: &axum::http::Method, uri: &axum::http::Uri) -> String {
    format!(
        "{} | {} | {} | {}",
        ip,
        chrono::Utc::now().to_rfc3339(),
        method,
        uri.path()
    )
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<RelayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.server.port,
    }))
}

/// GET /webhook: subscription verification. Echoes `hub.challenge` when mode is "subscribe" and the
/// token matches; 403 otherwise. When mode or token is missing the request is held open without a
/// response until the client disconnects or the server starts shutting down (then 503).
async fn verify_webhook(State(state): State<RelayState>, Query(query): Query<VerifyQuery>) -> Response {
    log::info!(
        "webhook verify: mode={:?} token_present={} challenge={:?}",
        query.mode,
        query.verify_token.is_some(),
        query.challenge
    );
    let mode = query.mode.filter(|m| !m.is_empty());
    let token = query.verify_token.filter(|t| !t.is_empty());
    let (Some(mode), Some(token)) = (mode, token) else {
        log::debug!("webhook verify: mode or token missing, leaving request open");
        state.shutting_down().await;
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let expected = config::secret(&state.config.webhook.verify_token);
    if mode == "subscribe" && expected.as_deref() == Some(token.as_str()) {
        log::info!("webhook verified");
        (StatusCode::OK, query.challenge.unwrap_or_default()).into_response()
    } else {
        StatusCode::FORBIDDEN.into_response()
    }
}

/// POST /webhook: normalize each batch entry and forward it in its own task. Always 200 once the
/// body parses; 400 when it is not a webhook payload.
async fn receive_webhook(State(state): State<RelayState>, body: Bytes) -> Response {
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("webhook: unparseable body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    log::info!(
        "webhook message: object={} entries={}",
        payload.object(),
        payload.entry_count()
    );
    log::debug!("webhook body: {}", String::from_utf8_lossy(&body));

    for result in normalize::normalize(&payload) {
        match result {
            Ok(msg) => {
                let state = state.clone();
                tokio::spawn(async move {
                    process_inbound_message(state, msg).await;
                });
            }
            Err(reason) => log::debug!("webhook entry skipped: {}", reason),
        }
    }
    (StatusCode::OK, EVENT_RECEIVED).into_response()
}

/// Forward one normalized message. Images are fetched and stored first; any failure ends here with a log line.
async fn process_inbound_message(state: RelayState, msg: InboundMessage) {
    let result: Result<ForwardOutcome, ForwardError> = match &msg.content {
        MessageContent::Text(text) => {
            state
                .forwarder
                .forward_text(&msg.sender_id, text, &msg.user_tags, &msg.message_tags)
                .await
        }
        MessageContent::Image(image) => match state.fetcher.fetch(&msg.sender_id, image).await {
            Ok(stored) => {
                state
                    .forwarder
                    .forward_image(&msg.sender_id, &stored, &msg.user_tags, &msg.message_tags)
                    .await
            }
            Err(e) => {
                log::warn!(
                    "{} image from {} not stored, not forwarding: {}",
                    image.service().as_str(),
                    msg.sender_id,
                    e
                );
                return;
            }
        },
    };
    match result {
        Ok(ForwardOutcome::Sent(body)) => log::info!("forward response: {}", body),
        Ok(ForwardOutcome::Skipped) => {}
        Err(e) => log::warn!("forward error for {}: {}", msg.sender_id, e),
    }
}

/// POST /receptor: aggregator replies. 404 on token mismatch (nothing sent); otherwise 200 and the
/// texts are sent in the background, in order.
async fn receive_reply(State(state): State<RelayState>, body: Bytes) -> Response {
    let envelope: ReplyEnvelope = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            log::warn!("receptor: unparseable body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    if !state.dispatcher.authorize(&envelope) {
        log::warn!("receptor: token mismatch");
        return StatusCode::NOT_FOUND.into_response();
    }
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        let report = dispatcher.dispatch(&envelope).await;
        log::info!(
            "receptor: {} sent, {} failed, {} empty skipped for {}",
            report.sent,
            report.failed,
            report.skipped,
            envelope.user_id
        );
    });
    (StatusCode::OK, EVENT_RECEIVED).into_response()
}
