//! The contract of the collaborator updates are fetched from.

use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use longpoll_types::{Update, UpdateKind};

use crate::DynError;

/// The parameters of a single long-poll request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Identifier of the first update to return.
    ///
    /// A non-negative offset acknowledges every update with a smaller identifier, which the
    /// source will not return again. A negative offset `-n` asks for the newest `n` pending
    /// updates.
    pub offset: i64,

    /// How long the source may wait for an update before returning an empty batch.
    pub timeout: Duration,

    /// The kinds of update to return. Empty means every kind.
    pub allowed_updates: Vec<UpdateKind>,

    /// The maximum number of updates to return, in `1..=100`.
    pub limit: u8,
}

/// A source of [`Update`]s, typically a remote API that supports long polling.
#[async_trait]
pub trait UpdateSource: Debug + Send + Sync {
    /// Fetch the next batch of updates.
    ///
    /// Blocks for up to `request.timeout` waiting for at least one update, then returns whatever
    /// is available, ordered by ascending identifier. An empty batch means the timeout elapsed
    /// without new updates.
    async fn fetch_batch(&self, request: &FetchRequest) -> Result<Vec<Update>, DynError>;
}

#[async_trait]
impl<T> UpdateSource for Arc<T>
where
    T: UpdateSource + ?Sized,
{
    async fn fetch_batch(&self, request: &FetchRequest) -> Result<Vec<Update>, DynError> {
        self.as_ref().fetch_batch(request).await
    }
}
