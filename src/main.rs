use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use jobstore::JobRepository;
use render_orchestrator::{
    CallbackHandler, CallbackOutcome, CallbackQuery, ControllerConfig, FollowOnSpawner, JobResolver,
    OutputMaterializer, StageController, WebhookHeaders, WebhookVerifier,
};
use render_providers::{
    AssetStore, GenerationProvider, HttpAssetStore, HttpGenerationProvider, HttpReportingSink, ReportingSink,
    RetryPolicy,
};
use serde_json::json;
use std::error::Error;
use std::sync::Arc;

/// Endpoint webhook del orquestador de jobs de generación.
///
/// `POST /webhooks/generation` recibe los callbacks de los proveedores
/// (cabeceras `webhook-id`/`webhook-timestamp`/`webhook-signature`, query
/// opcional `job_id`/`stage`); `GET` en la misma ruta responde un payload
/// estático de vida sin autenticación.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    init_tracing();
    let config = AppConfig::from_env()?;

    let repo: Arc<dyn JobRepository> = Arc::new(render_persistence::new_from_env()?);
    let provider: Arc<dyn GenerationProvider> = Arc::new(HttpGenerationProvider::from_env()?);
    let assets: Arc<dyn AssetStore> = Arc::new(HttpAssetStore::from_env()?);
    let sink: Arc<dyn ReportingSink> = Arc::new(HttpReportingSink::from_env()?);

    let verifier = if config.skip_verify {
        WebhookVerifier::bypassed()
    } else {
        WebhookVerifier::new(&config.webhook_secret)?
    };
    let retry = RetryPolicy::default();
    let controller = StageController::new(
        repo.clone(),
        provider.clone(),
        OutputMaterializer::new(assets, config.output_folder.clone(), retry.clone()),
        ControllerConfig { webhook_url: config.public_webhook_url.clone(),
                           compose_window: chrono::Duration::minutes(config.compose_window_minutes),
                           retry: retry.clone() },
    );
    let spawner = FollowOnSpawner::new(repo.clone(), provider, config.public_webhook_url.clone(), retry);
    let handler = CallbackHandler::new(verifier, JobResolver::new(repo.clone()), controller, spawner, sink, repo);

    let app = Router::new()
        .route("/webhooks/generation", get(liveness).post(receive_callback))
        .with_state(Arc::new(handler));

    tracing::info!("orquestador escuchando en {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    // puentear los macros `log` de los crates de librería hacia tracing
    tracing_log::LogTracer::init().ok();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Configuración del binario, leída del entorno al arrancar.
struct AppConfig {
    bind_addr: String,
    public_webhook_url: String,
    output_folder: String,
    webhook_secret: String,
    skip_verify: bool,
    compose_window_minutes: i64,
}

impl AppConfig {
    fn from_env() -> Result<Self, Box<dyn Error>> {
        let skip_verify = std::env::var("WEBHOOK_SKIP_VERIFY")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let webhook_secret = match std::env::var("WEBHOOK_SECRET") {
            Ok(secret) => secret,
            Err(_) if skip_verify => String::new(),
            Err(_) => return Err("WEBHOOK_SECRET no definida (o usar WEBHOOK_SKIP_VERIFY=1)".into()),
        };
        let compose_window_minutes = std::env::var("COMPOSE_WINDOW_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        Ok(AppConfig {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            public_webhook_url: std::env::var("PUBLIC_WEBHOOK_URL")
                .unwrap_or_else(|_| "http://localhost:8080/webhooks/generation".into()),
            output_folder: std::env::var("OUTPUT_FOLDER").unwrap_or_else(|_| "renders".into()),
            webhook_secret,
            skip_verify,
            compose_window_minutes,
        })
    }
}

/// Payload estático de vida; no requiere autenticación.
async fn liveness() -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn receive_callback(State(handler): State<Arc<CallbackHandler>>,
                          Query(query): Query<CallbackQuery>,
                          headers: HeaderMap,
                          body: Bytes)
                          -> Response {
    // el cuerpo se lee una sola vez; firma y parseo usan los mismos bytes
    let webhook_headers = WebhookHeaders { id: header(&headers, "webhook-id"),
                                           timestamp: header(&headers, "webhook-timestamp"),
                                           signature: header(&headers, "webhook-signature") };
    match handler.handle(webhook_headers, &query, &body).await {
        CallbackOutcome::Ack(ack) => (StatusCode::OK, Json(ack)).into_response(),
        CallbackOutcome::Unauthorized => {
            (StatusCode::UNAUTHORIZED, Json(json!({"received": false, "error": "unauthorized"}))).into_response()
        }
        CallbackOutcome::NotFound => {
            (StatusCode::NOT_FOUND, Json(json!({"received": true, "error": "job not found"}))).into_response()
        }
        CallbackOutcome::BadRequest(msg) => {
            (StatusCode::BAD_REQUEST, Json(json!({"received": false, "error": msg}))).into_response()
        }
        CallbackOutcome::Internal(msg) => {
            tracing::error!("error interno procesando callback: {}", msg);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"received": false, "error": "internal error"})))
                .into_response()
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
