use std::sync::Arc;

use longpoll_types::UpdateId;

/// The error type sources and handlers report failures with.
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A failure offered to [`UpdateHandler::handle_error`](crate::UpdateHandler::handle_error).
///
/// The underlying error is shared so the receiver can keep it for propagation while the handler
/// owns its copy of the [`ErrorContext`](crate::ErrorContext).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReceiveError {
    #[error("failed to fetch updates from offset {offset}: {source}")]
    Fetch {
        offset: i64,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("failed to handle update {update_id}: {source}")]
    Dispatch {
        update_id: UpdateId,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl ReceiveError {
    pub(crate) fn fetch(offset: i64, source: DynError) -> Self {
        Self::Fetch {
            offset,
            source: Arc::from(source),
        }
    }

    pub(crate) fn dispatch(update_id: UpdateId, source: DynError) -> Self {
        Self::Dispatch {
            update_id,
            source: Arc::from(source),
        }
    }
}

/// Primary error type for the [`Receiver`](crate::Receiver)
///
/// A receiver that stopped because it was cancelled completes with `Ok(())`; every other way of
/// stopping is one of these.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The handler answered a failure with [`Directive::Abort`](crate::Directive::Abort).
    #[error("receiver aborted: {0}")]
    Aborted(#[source] ReceiveError),

    #[error("error handler failed: {source}")]
    ErrorHandler {
        #[source]
        source: DynError,
    },

    #[error("invalid receiver options: {0}")]
    InvalidOptions(String),

    #[error("receiver task panicked: {0}")]
    Panicked(String),

    /// The spawned loop was dropped before completing, for example by a runtime shutting down.
    #[error("receiver task was cancelled before completing")]
    TaskCancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
