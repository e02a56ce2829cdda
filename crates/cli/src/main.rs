//! Boardwatch CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: load `.env` if present, then flags and
//!    environment variables (see [`config::Config`]).
//! 2. **Wire observability**: configure `tracing-subscriber` and, optionally,
//!    the OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: load the App credentials, build the
//!    GitHub session and webhook verifier, and register the comment
//!    correlation handler on an [`EventRouter`].
//! 4. **Serve**: run the webhook listener until Ctrl+C.
//!
//! Any start-up failure (most importantly a [`pipeline::CredentialError`])
//! aborts with a non-zero exit status.

mod config;
mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use listener::WebhookListener;
use pipeline::{
    CommentCorrelationHandler, CredentialProvider, EventName, EventRouter, NoActionDecision,
    TracingErrorSink, ISSUE_COMMENT_CREATED,
};
use tracing::{error, info};

use crate::config::Config;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is normal in deployed environments.
    dotenvy::dotenv().ok();
    let config = Config::parse();
    let telemetry = telemetry::init(config.log_format, config.otlp_endpoint.as_deref())?;

    let result = run(&config).await;
    if let Err(err) = &result {
        error!(error = %format!("{err:#}"), "Boardwatch stopped");
    }
    telemetry.shutdown();
    result
}

async fn run(config: &Config) -> anyhow::Result<()> {
    let credentials = config.load().context("loading application credentials")?;
    let session = github::build_session(&credentials, &config.client_options())
        .context("building GitHub session")?;
    let verifier = github::build_verifier(credentials.webhook_secret());

    let comment_event =
        EventName::new(ISSUE_COMMENT_CREATED).context("invalid comment event name")?;
    let router = EventRouter::new(
        Arc::new(verifier),
        Arc::new(session),
        Arc::new(TracingErrorSink),
    )
    .on(
        comment_event,
        Arc::new(CommentCorrelationHandler::new(Arc::new(NoActionDecision))),
    );
    info!(
        app_id = %credentials.app_id(),
        installation_id = ?credentials.installation_id(),
        api_url = %config.api_url,
        "Credentials loaded"
    );

    let router = Arc::new(router);
    let listener = WebhookListener::new(config.listen_addr(), &config.webhook_path, router)
        .context("configuring webhook listener")?;
    listener.serve(shutdown_signal()).await?;
    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    info!("Press Ctrl+C to quit.");
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Could not listen for Ctrl+C; shutting down");
    }
}
