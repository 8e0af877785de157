//! Pressroom Server
//!
//! Axum server exposing the session engine over HTTP with SSE event
//! streams, plus a `run` command that drives one session in-process.

mod api;

use anyhow::bail;
use axum::{response::Json, routing::get, Router};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use pressroom_core::config::DEFAULT_CONFIG_PATH;
use pressroom_core::{
    Engine, EngineConfig, EventStream, GenerationParameters, PublishReceipt, PublishTarget,
    SessionEvent,
};
use std::io::Write;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;

use api::sessions;

/// Application state
pub struct AppState {
    pub engine: Engine,
}

pub type SharedState = Arc<AppState>;

#[derive(Parser, Clone)]
#[command(author, version, about = "Pressroom - research, write and publish with parallel agents")]
struct Args {
    /// Config file (JSON)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Research, write and export one piece without a server
    Run {
        /// Topic to write about
        topic: String,
        /// Feedback to apply after the first draft, one iteration each
        #[arg(short, long)]
        feedback: Vec<String>,
        /// Target length in words
        #[arg(short, long, default_value = "1500")]
        words: u32,
        /// Comma separated keywords
        #[arg(short, long, value_delimiter = ',')]
        keywords: Vec<String>,
    },
}

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Pressroom API",
        version = "1.0.0",
        description = "Session orchestration for research-driven content generation"
    ),
    paths(
        sessions::create_session,
        sessions::list_sessions,
        sessions::get_session,
        sessions::delete_session,
        sessions::start_research,
        sessions::get_research,
        sessions::get_synthesis,
        sessions::start_generation,
        sessions::iterate,
        sessions::list_versions,
        sessions::get_version,
        sessions::get_content,
        sessions::publish,
        get_config
    ),
    components(schemas(
        sessions::CreateSessionRequest,
        sessions::IterateRequest,
        api::ErrorResponse
    )),
    tags(
        (name = "sessions", description = "Session lifecycle"),
        (name = "operations", description = "State-gated operations"),
        (name = "research", description = "Research results"),
        (name = "content", description = "Content versions"),
        (name = "config", description = "Engine configuration")
    )
)]
struct ApiDoc;

async fn serve_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Effective engine configuration
#[utoipa::path(
    get,
    path = "/api/v1/config",
    tag = "config",
    responses((status = 200, description = "Current configuration"))
)]
async fn get_config(axum::extract::State(state): axum::extract::State<SharedState>) -> Json<EngineConfig> {
    Json(state.engine.config().clone())
}

fn app(state: SharedState) -> Router {
    Router::new()
        .nest("/api/v1/sessions", sessions::session_routes())
        .route("/api/v1/config", get(get_config))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state)
}

async fn run_server(config: EngineConfig, port: u16) -> anyhow::Result<()> {
    let engine = Engine::from_config(config)?;
    let state: SharedState = Arc::new(AppState { engine });

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("Pressroom server running at http://{}", addr);
    tracing::info!("Sessions: /api/v1/sessions, OpenAPI: /api/v1/openapi.json");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Print an operation's events until it ends
async fn drain(mut events: EventStream) -> anyhow::Result<()> {
    while let Some(event) = events.next().await {
        match &event {
            SessionEvent::Content { chunk } => {
                print!("{}", chunk);
                std::io::stdout().flush()?;
            }
            SessionEvent::Complete { result_summary } => println!("\n✅ {}", result_summary),
            SessionEvent::Error { message } => bail!("{}", message),
            SessionEvent::Outline { .. } => println!("📝 Outline ready"),
            other => println!("[{}] {}", other.name(), serde_json::to_string(other)?),
        }
    }
    Ok(())
}

async fn run_cli(config: EngineConfig, topic: String, feedback: Vec<String>, words: u32, keywords: Vec<String>) -> anyhow::Result<()> {
    let engine = Engine::from_config(config)?;
    let parameters = GenerationParameters::default()
        .with_word_count(words)
        .with_keywords(keywords);

    let session = engine.create(&topic, parameters).await?;
    println!("🚀 Session {} for \"{}\"", session.id, session.topic);

    drain(engine.start_research(&session.id).await?).await?;
    drain(engine.start_generation(&session.id).await?).await?;
    for note in &feedback {
        println!("\n🔁 Applying feedback: {}", note);
        drain(engine.iterate(&session.id, note).await?).await?;
    }

    match engine.publish(&session.id, PublishTarget::Export).await? {
        PublishReceipt::Export { path, title, .. } => println!("\n📦 Exported \"{}\" to {}", title, path.display()),
        PublishReceipt::WordPress { url, .. } => println!("\n📦 Published to {}", url),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pressroom_core=debug")),
        )
        .init();

    let args = Args::parse();
    let config = EngineConfig::load(&args.config).await;

    match args.command.unwrap_or(CliCommand::Serve { port: 8080 }) {
        CliCommand::Serve { port } => run_server(config, port).await,
        CliCommand::Run {
            topic,
            feedback,
            words,
            keywords,
        } => run_cli(config, topic, feedback, words, keywords).await,
    }
}
