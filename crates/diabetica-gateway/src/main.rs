use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use diabetica_common::telemetry::{init_tracing, shutdown_tracing};
use diabetica_gateway::args::Args;
use diabetica_gateway::build_app;
use diabetica_gateway::predict::{PredictionClient, VertexEndpoint};
use diabetica_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Variables already present in the environment win over .env entries.
    let dotenv = dotenvy::dotenv();

    let args = Args::parse();

    let otel = init_tracing(
        "diabetica-gateway",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
    );

    match &dotenv {
        Ok(path) => tracing::info!(path=%path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error=%e, "failed to read .env"),
    }

    let result = run(args).await;
    if let Err(e) = &result {
        tracing::error!(error=%format!("{e:#}"), "gateway stopped");
    }
    shutdown_tracing(otel);
    result
}

async fn run(args: Args) -> anyhow::Result<()> {
    let settings = args.into_settings().context("invalid configuration")?;

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(3))
        .timeout(settings.request_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let provider = settings
        .credentials
        .clone()
        .into_provider(http.clone(), settings.token_uri.clone())
        .context("failed to load credentials")?;

    tracing::info!(
        source = provider.kind(),
        project=%settings.endpoint.project,
        location=%settings.endpoint.location,
        endpoint_id=%settings.endpoint.endpoint_id,
        "authenticating"
    );
    let credential = provider.acquire().await.context("authentication failed")?;

    let endpoint = VertexEndpoint::bind(
        http,
        settings.api_base.clone(),
        settings.endpoint.clone(),
        Arc::new(credential),
    )
    .await
    .context("failed to bind prediction endpoint")?;

    let st = AppState::new(PredictionClient::new(Arc::new(endpoint)));
    let app = build_app(st);

    let listener = tokio::net::TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen_addr))?;
    tracing::info!(addr=%settings.listen_addr, "serving question form");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error=%e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
