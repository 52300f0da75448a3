use clap::Parser;
use futures::{Stream, StreamExt};
use longpoll_clap_blocks::receiver::ReceiverConfig;
use longpoll_client::Client;
use longpoll_receiver::Receiver;
use longpoll_types::Update;
use observability_deps::tracing::{error, info};
use secrecy::ExposeSecret;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::common::ApiConfig;
use crate::shutdown::wait_for_signal;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Client(#[from] longpoll_client::Error),

    #[error(transparent)]
    Receiver(#[from] longpoll_receiver::Error),

    #[error("failed to encode update: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Parser)]
pub(crate) struct Config {
    /// Bot API connection config
    #[clap(flatten)]
    api_config: ApiConfig,

    /// Update receiver config
    #[clap(flatten)]
    receiver_config: ReceiverConfig,

    /// Logging config
    #[clap(flatten)]
    pub(crate) logging_config: trogging::cli::LoggingConfig,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let ApiConfig { api_url, token } = config.api_config;
    let client = Client::new(api_url, token.expose_secret().as_str())?;
    let receiver = Receiver::new(client, config.receiver_config.options())?;

    let shutdown = CancellationToken::new();
    let signal_handler = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = wait_for_signal().await {
                error!(error = %e, "failed to wait for shutdown signal");
            }
            shutdown.cancel();
        }
    });

    let updates = receiver.into_stream(&shutdown);
    let written = write_updates(updates, &mut tokio::io::stdout()).await;
    signal_handler.abort();

    let n_updates = written?;
    info!(n_updates, "stopped receiving updates");
    Ok(())
}

/// Write each update as a single line of JSON, returning how many were written.
async fn write_updates<S, W>(mut updates: S, out: &mut W) -> Result<usize>
where
    S: Stream<Item = longpoll_receiver::Result<Update>> + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut n_updates = 0;
    while let Some(update) = updates.next().await {
        let mut line = serde_json::to_vec(&update?)?;
        line.push(b'\n');
        out.write_all(&line).await?;
        out.flush().await?;
        n_updates += 1;
    }
    Ok(n_updates)
}
