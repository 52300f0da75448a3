use std::{collections::BTreeSet, time::Duration};

use longpoll_types::UpdateKind;

use crate::{Directive, Error, Result};

/// How long a fetch waits for new updates unless configured otherwise.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the receiver pauses after a failed fetch unless configured otherwise.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// The largest batch a source may be asked for.
pub const MAX_BATCH_LIMIT: u8 = 100;

/// The configuration of a [`Receiver`](crate::Receiver).
///
/// Options are validated when the receiver is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverOptions {
    poll_timeout: Duration,
    allowed_updates: BTreeSet<UpdateKind>,
    batch_limit: u8,
    drop_pending_updates: bool,
    retry_delay: Duration,
    offset: i64,
    default_directive: Directive,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            allowed_updates: BTreeSet::new(),
            batch_limit: MAX_BATCH_LIMIT,
            drop_pending_updates: false,
            retry_delay: DEFAULT_RETRY_DELAY,
            offset: 0,
            default_directive: Directive::Continue,
        }
    }
}

impl ReceiverOptions {
    /// Set how long each fetch may wait for new updates.
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Only receive updates of the given kinds. An empty set receives every kind.
    pub fn with_allowed_updates(mut self, kinds: impl IntoIterator<Item = UpdateKind>) -> Self {
        self.allowed_updates = kinds.into_iter().collect();
        self
    }

    /// Set the maximum number of updates fetched at once, in `1..=100`.
    pub fn with_batch_limit(mut self, batch_limit: u8) -> Self {
        self.batch_limit = batch_limit;
        self
    }

    /// Discard every update that is pending when the receiver starts.
    pub fn with_drop_pending_updates(mut self, drop_pending_updates: bool) -> Self {
        self.drop_pending_updates = drop_pending_updates;
        self
    }

    /// Set the pause between a failed fetch and the next attempt.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Set the offset of the first fetch.
    ///
    /// Ignored when pending updates are dropped.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Set the directive used by handlers that do not decide for themselves, such as the one
    /// built by
    /// [`Receiver::start_receiving_update_fn`](crate::Receiver::start_receiving_update_fn).
    pub fn with_default_directive(mut self, directive: Directive) -> Self {
        self.default_directive = directive;
        self
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn allowed_updates(&self) -> &BTreeSet<UpdateKind> {
        &self.allowed_updates
    }

    pub fn batch_limit(&self) -> u8 {
        self.batch_limit
    }

    pub fn drop_pending_updates(&self) -> bool {
        self.drop_pending_updates
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn default_directive(&self) -> Directive {
        self.default_directive
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(1..=MAX_BATCH_LIMIT).contains(&self.batch_limit) {
            return Err(Error::InvalidOptions(format!(
                "batch limit must be between 1 and {MAX_BATCH_LIMIT}, got {}",
                self.batch_limit
            )));
        }
        if self.allowed_updates.contains(&UpdateKind::Unknown) {
            return Err(Error::InvalidOptions(
                "unknown updates cannot be requested by kind".to_string(),
            ));
        }
        Ok(())
    }
}
