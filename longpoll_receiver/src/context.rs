use iox_time::Time;
use longpoll_types::Update;

use crate::{DynError, ReceiveError};

/// Where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// Fetching a batch from the source failed.
    Fetch,
    /// The handler failed to process an update.
    Dispatch,
}

/// Describes one failure, handed to
/// [`UpdateHandler::handle_error`](crate::UpdateHandler::handle_error).
///
/// The failing update is present exactly when the origin is [`ErrorOrigin::Dispatch`].
#[derive(Debug, Clone)]
pub struct ErrorContext {
    error: ReceiveError,
    update: Option<Update>,
    occurred_at: Time,
}

impl ErrorContext {
    /// A failed fetch of the batch starting at `offset`.
    pub fn fetch_failed(offset: i64, source: DynError, occurred_at: Time) -> Self {
        Self {
            error: ReceiveError::fetch(offset, source),
            update: None,
            occurred_at,
        }
    }

    /// A failure of the handler while processing `update`.
    pub fn dispatch_failed(update: Update, source: DynError, occurred_at: Time) -> Self {
        Self {
            error: ReceiveError::dispatch(update.id(), source),
            update: Some(update),
            occurred_at,
        }
    }

    pub fn origin(&self) -> ErrorOrigin {
        match self.error {
            ReceiveError::Fetch { .. } => ErrorOrigin::Fetch,
            ReceiveError::Dispatch { .. } => ErrorOrigin::Dispatch,
        }
    }

    pub fn error(&self) -> &ReceiveError {
        &self.error
    }

    pub fn update(&self) -> Option<&Update> {
        self.update.as_ref()
    }

    pub fn occurred_at(&self) -> Time {
        self.occurred_at
    }
}
