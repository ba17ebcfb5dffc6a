//! Pitwall Binary
//!
//! This is the main entry point for the pitwall backend. It initializes
//! tracing and metrics, selects the storage/queue/key backends for the
//! configured environment, and starts the HTTP server plus the queue
//! worker with configuration from command-line arguments or environment
//! variables.

use std::{
    process::ExitCode,
    sync::{Arc, atomic::Ordering},
};

use clap::Parser as _;
use eyre::Context as _;
use pitwall_iracing::{IracingClient, IracingClientConfig, IracingService};
use pitwall_service::{
    PitwallBackends,
    config::{Environment, PitwallConfig},
    services::{
        queue::{EventQueueService, memory::MemoryQueue},
        store::{RecordStoreService, memory::MemoryRecordStore},
        token::{KeyProviderService, local::LocalKeyProvider},
    },
    shutdown,
};

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("can install");
    pitwall_service::observability::init_tracing();
    pitwall_service::metrics::describe_metrics();

    let config = PitwallConfig::parse();
    tracing::info!("starting pitwall with config: {config:#?}");

    let (cancellation_token, is_graceful_shutdown) =
        shutdown::spawn_shutdown_task(shutdown::default_shutdown_signal());

    let upstream: IracingService = Arc::new(
        IracingClient::new(IracingClientConfig {
            data_base_url: config.iracing_data_url.clone(),
            oauth_base_url: config.iracing_oauth_url.clone(),
            client_id: config.iracing_client_id.clone(),
            timeout: config.iracing_timeout,
        })
        .context("while constructing upstream client")?,
    );

    let (store, queue, key_provider) = match config.environment {
        Environment::Dev => dev_backends(&config)?,
        Environment::Prod => prod_backends(&config).await?,
    };

    let bind_addr = config.bind_addr;
    let max_wait_time_shutdown = config.max_wait_time_shutdown;
    let service = pitwall_service::init(
        &config,
        PitwallBackends {
            store,
            queue,
            key_provider,
            upstream,
        },
        cancellation_token.clone(),
    )
    .context("while initiating pitwall service")?;

    tracing::info!("binding to {}", bind_addr);
    let tcp_listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("while binding tcp-listener")?;

    let axum_cancel_token = cancellation_token.clone();
    let router = service.router;
    let server = tokio::spawn(async move {
        tracing::info!(
            "starting axum server on {}",
            tcp_listener
                .local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or(String::from("invalid addr"))
        );
        let axum_shutdown_signal = axum_cancel_token.clone();
        let axum_result = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move { axum_shutdown_signal.cancelled().await })
            .await;
        tracing::info!("axum server shutdown");
        if let Err(err) = axum_result {
            tracing::error!("got error from axum: {err:?}");
        }
        // we cancel the token in case axum encountered an error to shutdown the service
        axum_cancel_token.cancel();
    });

    tracing::info!("everything started successfully - now waiting for shutdown...");
    cancellation_token.cancelled().await;

    tracing::info!("waiting for shutdown of services (max wait time {max_wait_time_shutdown:?})..");
    match tokio::time::timeout(max_wait_time_shutdown, async move {
        tokio::join!(server, service.worker)
    })
    .await
    {
        Ok(_) => tracing::info!("successfully finished shutdown in time"),
        Err(_) => {
            is_graceful_shutdown.store(false, Ordering::Relaxed);
            tracing::warn!("could not finish shutdown in time")
        }
    }

    tracing::info!("good night!");
    if is_graceful_shutdown.load(Ordering::Relaxed) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// In-memory store/queue and local keys for running without any
/// infrastructure.
fn dev_backends(
    config: &PitwallConfig,
) -> eyre::Result<(RecordStoreService, EventQueueService, KeyProviderService)> {
    let store: RecordStoreService = Arc::new(MemoryRecordStore::new(config.environment));
    let queue: EventQueueService = Arc::new(MemoryQueue::new(config.environment));
    let key_provider: KeyProviderService = match (&config.signing_key_pem, &config.local_master_key)
    {
        (Some(pem_path), Some(master_key)) => {
            let pem = std::fs::read_to_string(pem_path).context("while reading signing key PEM")?;
            Arc::new(LocalKeyProvider::from_pem(&pem, master_key)?)
        }
        _ => {
            tracing::warn!("no signing key configured, generating throwaway dev keys");
            Arc::new(LocalKeyProvider::generate(config.environment))
        }
    };
    Ok((store, queue, key_provider))
}

/// Postgres, SQS, and KMS (or PEM keys) for production.
#[cfg(all(feature = "postgres", feature = "aws"))]
async fn prod_backends(
    config: &PitwallConfig,
) -> eyre::Result<(RecordStoreService, EventQueueService, KeyProviderService)> {
    use pitwall_service::services::{
        queue::sqs::SqsQueue, store::postgres::PostgresRecordStore, token::aws::KmsKeyProvider,
    };

    let connection_string = config
        .db_connection_string
        .as_ref()
        .ok_or_else(|| eyre::eyre!("PITWALL_DB_CONNECTION_STRING is required in prod"))?;
    let store: RecordStoreService = Arc::new(
        PostgresRecordStore::init(connection_string, config.db_max_connections)
            .await
            .context("while starting postgres record store")?,
    );

    let aws_config = aws_config::load_from_env().await;
    let queue_arn = config
        .queue_arn
        .as_ref()
        .ok_or_else(|| eyre::eyre!("PITWALL_QUEUE_ARN is required in prod"))?;
    let queue: EventQueueService = Arc::new(
        SqsQueue::from_arn(&aws_config, queue_arn)
            .await
            .context("while starting sqs queue")?,
    );

    let key_provider: KeyProviderService =
        match (&config.kms_signing_key_id, &config.kms_data_key_id) {
            (Some(signing_key_id), Some(data_key_id)) => Arc::new(KmsKeyProvider::init(
                &aws_config,
                signing_key_id,
                data_key_id,
            )),
            _ => match (&config.signing_key_pem, &config.local_master_key) {
                (Some(pem_path), Some(master_key)) => {
                    let pem = std::fs::read_to_string(pem_path)
                        .context("while reading signing key PEM")?;
                    Arc::new(LocalKeyProvider::from_pem(&pem, master_key)?)
                }
                _ => eyre::bail!(
                    "prod needs either PITWALL_KMS_SIGNING_KEY_ID + PITWALL_KMS_DATA_KEY_ID \
                     or PITWALL_SIGNING_KEY_PEM + PITWALL_LOCAL_MASTER_KEY"
                ),
            },
        };

    Ok((store, queue, key_provider))
}

#[cfg(not(all(feature = "postgres", feature = "aws")))]
async fn prod_backends(
    _config: &PitwallConfig,
) -> eyre::Result<(RecordStoreService, EventQueueService, KeyProviderService)> {
    eyre::bail!("this binary was built without the postgres/aws features required for prod")
}
