use anyhow::{Context, Result};
use std::sync::Arc;
use submission_service::api::{start_api_server, AppState};
use submission_service::submission_store::{connect_pool, run_migrations};
use submission_service::{
    CareService, Config, PgCareRepository, PgSubmissionRepository, ProcessAnalyzer,
    S3ObjectStore, SubmissionPipeline,
};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Avelon Submission Service"
    );

    init_metrics(config.service.metrics_port)?;

    let pool = connect_pool(&config.database)
        .await
        .context("Failed to initialize database pool")?;

    if config.database.run_migrations {
        run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;
    }

    let object_store = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 object store")?,
    );

    let submissions = Arc::new(PgSubmissionRepository::new(pool.clone()));
    let care_records = Arc::new(PgCareRepository::new(pool.clone()));

    let pipeline = Arc::new(SubmissionPipeline::new(
        object_store,
        submissions.clone(),
        Arc::new(ProcessAnalyzer::image(&config.analyzer)),
        Arc::new(ProcessAnalyzer::vitals(&config.analyzer)),
    ));

    let care = Arc::new(CareService::new(
        submissions,
        care_records,
        config.consult.clone(),
    ));

    info!(
        timeout_secs = config.analyzer.timeout().as_secs(),
        image_program = %config.analyzer.image_program,
        vitals_program = %config.analyzer.vitals_program,
        "Analyzers configured"
    );

    let api_state = AppState {
        pipeline,
        care,
        pool,
        spool_dir: config.analyzer.spool_dir(),
    };

    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Submission service started successfully");

    shutdown_signal().await;

    info!("Shutting down submission service");

    api_handle.abort();

    info!("Submission service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
