mod certificates;
mod config;
mod db;
mod errors;
mod models;
mod queue;
mod records;
mod render;
mod routes;
mod state;
mod storage;
#[cfg(test)]
mod testing;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::certificates::{CertificateService, CertificateSettings};
use crate::config::Config;
use crate::db::create_pool;
use crate::queue::{ConsumerSettings, QueueConsumer, RedisQueue};
use crate::records::{PgRecordBackend, RecordStore};
use crate::render::template::load_template;
use crate::render::CommandRenderer;
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::S3ObjectStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting certificate worker v{}", env!("CARGO_PKG_VERSION"));

    // Record store on PostgreSQL
    let pool = create_pool(&config.database_url).await?;
    let events = RecordStore::new(
        Arc::new(PgRecordBackend::new(pool)),
        config.current_user.clone(),
    );

    // Certificate queue on Redis
    let redis = redis::Client::open(config.redis_url.clone())?;
    let queue = Arc::new(RedisQueue::connect(&redis, config.certificate_queue.clone()).await?);

    // Artifacts on S3 / MinIO
    let objects = Arc::new(S3ObjectStore::from_config(&config).await);
    info!("S3 client initialized (bucket: {})", objects.bucket());

    let renderer = Arc::new(CommandRenderer::new(
        config.wkhtmltopdf_bin.clone(),
        config.mutool_bin.clone(),
    ));
    let service = Arc::new(CertificateService::new(
        events.clone(),
        renderer,
        objects.clone(),
        CertificateSettings {
            page: config.page,
            zoom: config.render_zoom,
            html_template: load_template(config.certificate_template_path.as_deref())?,
        },
    ));

    let consumer = QueueConsumer::new(
        queue.clone(),
        service,
        ConsumerSettings {
            batch_size: config.queue_batch_size,
            wait: config.queue_wait(),
            message_timeout: config.message_timeout(),
            retry_backoff: config.queue_retry_backoff(),
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {e}");
        }
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let consumer_task = {
        let shutdown = shutdown_signal(shutdown_rx.clone());
        tokio::spawn(async move { consumer.run(shutdown).await })
    };

    let state = AppState {
        events,
        queue,
        objects,
    };
    let app = build_router(state).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = async {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_rx))
            .await
            .map_err(anyhow::Error::from)
    };
    // A consumer that dies takes the process down with it instead of waiting
    // for the server to stop first.
    let consumer = async {
        match consumer_task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Queue consumer stopped: {e}");
                Err(anyhow::Error::from(e))
            }
            Err(e) => {
                error!("Queue consumer task panicked: {e}");
                Err(anyhow::Error::from(e))
            }
        }
    };
    tokio::try_join!(server, consumer)?;

    info!("Certificate worker stopped");
    Ok(())
}

fn shutdown_signal(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
