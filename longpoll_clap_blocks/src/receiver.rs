//! CLI config for the update receiver.

use std::time::Duration;

use longpoll_receiver::{Directive, MAX_BATCH_LIMIT, ReceiverOptions};
use longpoll_types::UpdateKind;

/// How the receiver answers a failed fetch or a failed update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OnError {
    /// Log the failure and keep receiving.
    #[default]
    Continue,

    /// Stop receiving.
    Abort,
}

impl From<OnError> for Directive {
    fn from(value: OnError) -> Self {
        match value {
            OnError::Continue => Self::Continue,
            OnError::Abort => Self::Abort,
        }
    }
}

/// CLI config for the long-polling update receiver.
#[derive(Debug, Clone, clap::Parser)]
pub struct ReceiverConfig {
    /// How long each request waits for new updates before returning empty.
    #[clap(
        long = "poll-timeout",
        env = "LONGPOLL_POLL_TIMEOUT",
        default_value = "30s",
        value_parser = humantime::parse_duration,
    )]
    pub poll_timeout: Duration,

    /// Only receive updates of these kinds, comma separated (for example
    /// `message,callback_query`).
    ///
    /// Receives every kind if not set.
    #[clap(
        long = "allowed-updates",
        env = "LONGPOLL_ALLOWED_UPDATES",
        value_delimiter = ',',
        action
    )]
    pub allowed_updates: Vec<UpdateKind>,

    /// The maximum number of updates fetched by a single request.
    #[clap(
        long = "batch-limit",
        env = "LONGPOLL_BATCH_LIMIT",
        default_value_t = MAX_BATCH_LIMIT,
        value_parser = clap::value_parser!(u8).range(1..=i64::from(MAX_BATCH_LIMIT)),
        action
    )]
    pub batch_limit: u8,

    /// Skip every update that is pending when the receiver starts.
    #[clap(
        long = "drop-pending-updates",
        env = "LONGPOLL_DROP_PENDING_UPDATES",
        action
    )]
    pub drop_pending_updates: bool,

    /// How long to wait before retrying a failed request.
    #[clap(
        long = "retry-delay",
        env = "LONGPOLL_RETRY_DELAY",
        default_value = "1s",
        value_parser = humantime::parse_duration,
    )]
    pub retry_delay: Duration,

    /// Identifier of the first update to receive.
    #[clap(
        long = "offset",
        env = "LONGPOLL_OFFSET",
        default_value_t = 0,
        allow_negative_numbers = true,
        action
    )]
    pub offset: i64,

    /// What to do when a request or the processing of an update fails.
    #[clap(
        long = "on-error",
        env = "LONGPOLL_ON_ERROR",
        default_value_t = OnError::default(),
        value_enum,
        action
    )]
    pub on_error: OnError,
}

impl ReceiverConfig {
    /// The receiver options this config describes.
    pub fn options(&self) -> ReceiverOptions {
        ReceiverOptions::default()
            .with_poll_timeout(self.poll_timeout)
            .with_allowed_updates(self.allowed_updates.iter().copied())
            .with_batch_limit(self.batch_limit)
            .with_drop_pending_updates(self.drop_pending_updates)
            .with_retry_delay(self.retry_delay)
            .with_offset(self.offset)
            .with_default_directive(self.on_error.into())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn test_defaults_match_receiver_defaults() {
        let config = ReceiverConfig::try_parse_from(["longpoll"]).unwrap();
        assert_eq!(config.options(), ReceiverOptions::default());
    }

    #[test]
    fn test_all_options() {
        let config = ReceiverConfig::try_parse_from([
            "longpoll",
            "--poll-timeout",
            "1m",
            "--allowed-updates",
            "message,callback_query",
            "--batch-limit",
            "10",
            "--drop-pending-updates",
            "--retry-delay",
            "250ms",
            "--offset",
            "-5",
            "--on-error",
            "abort",
        ])
        .unwrap();

        let options = config.options();
        assert_eq!(options.poll_timeout(), Duration::from_secs(60));
        assert_eq!(
            options.allowed_updates().iter().copied().collect::<Vec<_>>(),
            vec![UpdateKind::Message, UpdateKind::CallbackQuery]
        );
        assert_eq!(options.batch_limit(), 10);
        assert!(options.drop_pending_updates());
        assert_eq!(options.retry_delay(), Duration::from_millis(250));
        assert_eq!(options.offset(), -5);
        assert_eq!(options.default_directive(), Directive::Abort);
    }

    #[test]
    fn test_batch_limit_range() {
        for limit in ["0", "101"] {
            let err = ReceiverConfig::try_parse_from(["longpoll", "--batch-limit", limit])
                .unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_unknown_update_kind() {
        for kind in ["messages", "unknown"] {
            let err = ReceiverConfig::try_parse_from(["longpoll", "--allowed-updates", kind])
                .unwrap_err();
            assert!(err.to_string().contains("not a recognised update kind"), "{err}");
        }
    }

    #[test]
    fn test_bad_duration() {
        assert!(ReceiverConfig::try_parse_from(["longpoll", "--poll-timeout", "soon"]).is_err());
    }
}
