//! Disposable backend for trying the proxy locally.
//!
//! Every route answers JSON `{ endpoint, port }`. `/timeout` never answers.
//! With `--always <code>` every request answers with that status.

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use clap::Parser;
use serde_json::json;

#[derive(Parser)]
#[command(name = "test-backend")]
#[command(about = "Fixture backend answering fixed routes", long_about = None)]
struct Cli {
    /// The port to host the web services on.
    #[arg(short, long, env = "PORT", default_value_t = 8100)]
    port: u16,

    /// Respond to every request with this HTTP status code.
    #[arg(short, long, env = "ALWAYS")]
    always: Option<u16>,
}

#[derive(Clone)]
struct Fixture {
    port: u16,
    always: Option<StatusCode>,
}

async fn handler(State(fixture): State<Fixture>, uri: Uri) -> Response {
    let reply = |status: StatusCode, endpoint: &str| {
        (status, Json(json!({ "endpoint": endpoint, "port": fixture.port }))).into_response()
    };

    if let Some(status) = fixture.always {
        return reply(status, "ALWAYS");
    }

    match uri.path() {
        "/" => reply(StatusCode::OK, "/"),
        "/200" => reply(StatusCode::OK, "/200"),
        "/401" => reply(StatusCode::UNAUTHORIZED, "/401"),
        "/500" => reply(StatusCode::INTERNAL_SERVER_ERROR, "/500"),
        "/health" => reply(StatusCode::OK, "/health"),
        "/path/subpath" => reply(StatusCode::OK, "/path/subpath"),
        "/timeout" => std::future::pending().await,
        other => reply(StatusCode::NOT_FOUND, other),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let always = cli
        .always
        .map(StatusCode::from_u16)
        .transpose()?;
    let fixture = Fixture {
        port: cli.port,
        always,
    };

    let app = Router::new()
        .route("/", any(handler))
        .route("/{*path}", any(handler))
        .with_state(fixture);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cli.port)).await?;
    tracing::info!(port = cli.port, always = ?cli.always, "test backend listening");
    axum::serve(listener, app).await?;
    Ok(())
}
