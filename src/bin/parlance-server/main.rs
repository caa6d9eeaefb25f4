use std::io::Cursor;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use clap::Parser;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info};

mod metrics;

use parlance::{
    Error, LanguagesConfig, RecognitionEngine, RecognizeOpts, TempStore, Transcoder, Transcriber,
    Transcript, VoskModelLoader,
};

#[derive(Parser, Debug)]
#[command(name = "parlance-server")]
#[command(about = "HTTP server for offline batch speech recognition")]
struct Params {
    /// Supported language(s) as `code=path` or `code=remote:prefix`
    /// (e.g. `en=./models/en`, `pt-br=remote:models/pt-br/`).
    #[arg(short = 'l', long = "language", num_args = 1..)]
    languages: Vec<String>,

    /// JSON languages file as an alternative to repeated --language flags.
    #[arg(long = "languages-file")]
    languages_file: Option<PathBuf>,

    /// Transcoder executable.
    #[arg(long = "transcoder", default_value = "ffmpeg")]
    transcoder: PathBuf,

    /// Per-request transcode timeout in seconds (0 disables the timeout).
    #[arg(long = "transcode-timeout-secs", default_value_t = 120)]
    transcode_timeout_secs: u64,

    /// Maximum concurrent transcoder processes (defaults to the CPU count).
    #[arg(long = "max-transcodes")]
    max_transcodes: Option<usize>,

    /// Host interface to bind to.
    #[arg(long = "host", default_value = "127.0.0.1")]
    host: String,

    /// TCP port to listen on.
    #[arg(long = "port", default_value_t = 8080)]
    port: u16,

    /// Maximum request body size (bytes).
    #[arg(long = "max-bytes", default_value_t = 100 * 1024 * 1024)]
    max_bytes: usize,

    /// S3 bucket holding remote model prefixes (requires the `remote-models`
    /// build; credentials and region come from the environment).
    #[arg(long = "model-bucket")]
    model_bucket: Option<String>,
}

#[derive(Clone)]
struct AppState {
    transcriber: Arc<Transcriber>,
}

#[derive(Debug, Serialize)]
struct LanguagesResponse {
    languages: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<&Error> for AppError {
    fn from(err: &Error) -> Self {
        let status = match err.root() {
            Error::UnsupportedLanguage { .. } | Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::Transcode { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[tokio::main]
async fn main() {
    parlance::init_logging();

    if let Err(err) = run().await {
        error!(error = ?err, "parlance-server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let params = Params::parse();

    metrics::init();

    let addr: SocketAddr = format!("{}:{}", params.host, params.port)
        .parse()
        .context("invalid host/port bind address")?;

    let config = load_config(&params)?;
    let max_bytes = params.max_bytes;

    // Model loading can block on disk and on remote transfers, and the
    // object-storage adapter must run on a thread that may block.
    let transcriber = tokio::task::spawn_blocking(move || build_transcriber(&params, &config))
        .await
        .context("transcriber initialization task panicked")??;

    let state = AppState {
        transcriber: Arc::new(transcriber),
    };
    info!(languages = ?state.transcriber.languages(), "models loaded");

    let app = Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics::prometheus_metrics))
        .route("/v1/languages", get(languages))
        .route("/v1/recognize", post(recognize))
        .route_layer(from_fn(metrics::track_http_metrics))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .level(Level::INFO)
                        .include_headers(false),
                )
                .on_response(DefaultOnResponse::new().level(Level::INFO))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        );

    let listener = TcpListener::bind(addr).await.context("bind failed")?;
    info!(%addr, "listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn load_config(params: &Params) -> Result<LanguagesConfig> {
    let mut config = match &params.languages_file {
        Some(path) => LanguagesConfig::from_json_file(path)?,
        None => LanguagesConfig::new(),
    };
    let from_flags = LanguagesConfig::from_pairs(&params.languages)?;
    for (code, source) in from_flags.languages {
        config.add(code, source);
    }
    anyhow::ensure!(
        !config.is_empty(),
        "no languages configured; pass --language or --languages-file"
    );
    Ok(config)
}

fn build_transcriber(params: &Params, config: &LanguagesConfig) -> Result<Transcriber> {
    let timeout = match params.transcode_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let mut transcoder = Transcoder::new()
        .with_program(&params.transcoder)
        .with_timeout(timeout);
    if let Some(limit) = params.max_transcodes {
        transcoder = transcoder.with_max_concurrency(limit);
    }

    let loader = VoskModelLoader::new();
    let store = artifact_store(params, config)?;

    Transcriber::with_parts(
        config,
        &loader,
        store.as_deref(),
        transcoder,
        RecognitionEngine::new(),
        TempStore::new(),
    )
    .context("failed to initialize transcriber")
}

#[cfg(feature = "remote-models")]
fn artifact_store(
    params: &Params,
    config: &LanguagesConfig,
) -> Result<Option<Box<dyn parlance::ArtifactStore>>> {
    use object_store::aws::AmazonS3Builder;
    use parlance::ObjectStoreArtifacts;

    if !config.has_remote_sources() {
        return Ok(None);
    }
    let bucket = params
        .model_bucket
        .as_deref()
        .context("remote model sources configured; pass --model-bucket")?;
    let s3 = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .build()
        .context("failed to build S3 client")?;
    Ok(Some(Box::new(ObjectStoreArtifacts::new(
        Arc::new(s3),
        tokio::runtime::Handle::current(),
    ))))
}

#[cfg(not(feature = "remote-models"))]
fn artifact_store(
    _params: &Params,
    config: &LanguagesConfig,
) -> Result<Option<Box<dyn parlance::ArtifactStore>>> {
    anyhow::ensure!(
        !config.has_remote_sources(),
        "remote model sources configured but this build lacks the `remote-models` feature"
    );
    Ok(None)
}

async fn root() -> &'static str {
    "parlance-server: POST /v1/recognize (multipart fields: file, language)"
}

async fn healthz() -> &'static str {
    "ok"
}

async fn languages(State(state): State<AppState>) -> Json<LanguagesResponse> {
    Json(LanguagesResponse {
        languages: state.transcriber.languages(),
    })
}

async fn recognize(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> std::result::Result<Json<Transcript>, AppError> {
    let mut audio: Option<Vec<u8>> = None;
    let mut extension_hint: Option<String> = None;
    let mut language: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                extension_hint = field
                    .file_name()
                    .and_then(|name| name.rsplit_once('.'))
                    .map(|(_, ext)| ext.to_owned());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                audio = Some(bytes.to_vec());
            }
            Some("language") => {
                language = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| AppError::bad_request(err.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let audio = audio
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| AppError::bad_request("multipart field 'file' is required"))?;
    let language = language
        .filter(|code| !code.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("multipart field 'language' is required"))?;

    let opts = RecognizeOpts {
        language: language.clone(),
        extension_hint,
    };

    let transcriber = state.transcriber.clone();
    let session = metrics::session_started();
    let started = Instant::now();
    let result = tokio::task::spawn_blocking(move || {
        transcriber.recognize(Cursor::new(audio), &opts)
    })
    .await
    .map_err(|err| AppError::internal(format!("recognition task panicked: {err}")))?;
    let elapsed = started.elapsed();
    drop(session);

    match result {
        Ok(transcript) => {
            metrics::observe_recognition(&transcript.language, "ok", elapsed);
            Ok(Json(transcript))
        }
        Err(err) => {
            metrics::observe_recognition(&language.to_ascii_lowercase(), "error", elapsed);
            error!(error = %err, "recognition failed");
            Err(AppError::from(&err))
        }
    }
}
