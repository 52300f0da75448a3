//! A long-polling update receiver.
//!
//! A [`Receiver`] repeatedly fetches batches of [`Update`](longpoll_types::Update)s from an
//! [`UpdateSource`] and hands them one at a time to an [`UpdateHandler`], advancing its cursor
//! past each update so the next fetch acknowledges it. Failures of either side are offered to
//! [`UpdateHandler::handle_error`], whose [`Directive`] decides whether the receiver carries on.
//! Every run is bound to a [`CancellationToken`](tokio_util::sync::CancellationToken) and stops
//! gracefully, with `Ok(())`, once it is cancelled.

mod context;
mod error;
mod handler;
mod options;
mod receiver;
mod source;
mod stream;

#[cfg(test)]
mod mock;

pub use context::{ErrorContext, ErrorOrigin};
pub use error::{DynError, Error, ReceiveError, Result};
pub use handler::{Directive, FnHandler, UpdateHandler, sync_fn_handler};
pub use options::{DEFAULT_POLL_TIMEOUT, DEFAULT_RETRY_DELAY, MAX_BATCH_LIMIT, ReceiverOptions};
pub use receiver::{Receiver, ReceiverHandle};
pub use source::{FetchRequest, UpdateSource};
pub use stream::UpdateStream;
