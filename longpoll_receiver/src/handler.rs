//! The capability application code plugs into a [`Receiver`](crate::Receiver).

use std::{
    fmt::Debug,
    future::{Future, Ready, ready},
    sync::Arc,
};

use async_trait::async_trait;
use longpoll_types::Update;
use tokio_util::sync::CancellationToken;

use crate::{DynError, ErrorContext};

/// What the receiver should do after a failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Directive {
    /// Keep receiving. A failed fetch is retried after the retry delay, a failed update is
    /// skipped.
    #[default]
    Continue,
    /// Stop the receiver, completing it with the failure.
    Abort,
}

/// Processes updates and decides how failures are dealt with.
///
/// A receiver calls into its handler strictly sequentially: no two calls overlap, and each call
/// completes before the receiver fetches or dispatches anything else. Both calls are handed the
/// receiver's cancellation token; the receiver never interrupts a running call, so long running
/// handlers should watch the token themselves.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    /// Process a single update.
    ///
    /// An error is not propagated to the caller of the receiver, it is passed to
    /// [`handle_error`](Self::handle_error).
    async fn handle_update(
        &self,
        update: Update,
        shutdown: &CancellationToken,
    ) -> Result<(), DynError>;

    /// Decide how to proceed after a failed fetch or a failed
    /// [`handle_update`](Self::handle_update).
    ///
    /// Returning an error stops the receiver immediately with that error.
    async fn handle_error(
        &self,
        context: ErrorContext,
        shutdown: &CancellationToken,
    ) -> Result<Directive, DynError>;
}

#[async_trait]
impl<T> UpdateHandler for &T
where
    T: UpdateHandler + ?Sized,
{
    async fn handle_update(
        &self,
        update: Update,
        shutdown: &CancellationToken,
    ) -> Result<(), DynError> {
        (**self).handle_update(update, shutdown).await
    }

    async fn handle_error(
        &self,
        context: ErrorContext,
        shutdown: &CancellationToken,
    ) -> Result<Directive, DynError> {
        (**self).handle_error(context, shutdown).await
    }
}

#[async_trait]
impl<T> UpdateHandler for Arc<T>
where
    T: UpdateHandler + ?Sized,
{
    async fn handle_update(
        &self,
        update: Update,
        shutdown: &CancellationToken,
    ) -> Result<(), DynError> {
        self.as_ref().handle_update(update, shutdown).await
    }

    async fn handle_error(
        &self,
        context: ErrorContext,
        shutdown: &CancellationToken,
    ) -> Result<Directive, DynError> {
        self.as_ref().handle_error(context, shutdown).await
    }
}

#[async_trait]
impl<T> UpdateHandler for Box<T>
where
    T: UpdateHandler + ?Sized,
{
    async fn handle_update(
        &self,
        update: Update,
        shutdown: &CancellationToken,
    ) -> Result<(), DynError> {
        self.as_ref().handle_update(update, shutdown).await
    }

    async fn handle_error(
        &self,
        context: ErrorContext,
        shutdown: &CancellationToken,
    ) -> Result<Directive, DynError> {
        self.as_ref().handle_error(context, shutdown).await
    }
}

/// An [`UpdateHandler`] made of two functions, one per operation.
///
/// Calls are forwarded as they are; the adapter adds no behaviour of its own.
///
/// ```
/// # use longpoll_receiver::{Directive, DynError, ErrorContext, FnHandler};
/// # use longpoll_types::Update;
/// # use tokio_util::sync::CancellationToken;
/// let handler = FnHandler::new(
///     |update: Update, _shutdown: CancellationToken| async move {
///         println!("{}", update.id());
///         Ok::<_, DynError>(())
///     },
///     |_context: ErrorContext, _shutdown: CancellationToken| async move {
///         Ok::<_, DynError>(Directive::Continue)
///     },
/// );
/// ```
pub struct FnHandler<U, E> {
    update_fn: U,
    error_fn: E,
}

impl<U, E> FnHandler<U, E> {
    pub fn new(update_fn: U, error_fn: E) -> Self {
        Self {
            update_fn,
            error_fn,
        }
    }
}

impl<U, E> Debug for FnHandler<U, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl<U, UFut, E, EFut> UpdateHandler for FnHandler<U, E>
where
    U: Fn(Update, CancellationToken) -> UFut + Send + Sync,
    UFut: Future<Output = Result<(), DynError>> + Send + 'static,
    E: Fn(ErrorContext, CancellationToken) -> EFut + Send + Sync,
    EFut: Future<Output = Result<Directive, DynError>> + Send + 'static,
{
    async fn handle_update(
        &self,
        update: Update,
        shutdown: &CancellationToken,
    ) -> Result<(), DynError> {
        (self.update_fn)(update, shutdown.clone()).await
    }

    async fn handle_error(
        &self,
        context: ErrorContext,
        shutdown: &CancellationToken,
    ) -> Result<Directive, DynError> {
        (self.error_fn)(context, shutdown.clone()).await
    }
}

/// Build a [`FnHandler`] from two synchronous functions.
pub fn sync_fn_handler<U, E>(
    update_fn: U,
    error_fn: E,
) -> FnHandler<
    impl Fn(Update, CancellationToken) -> Ready<Result<(), DynError>> + Send + Sync,
    impl Fn(ErrorContext, CancellationToken) -> Ready<Result<Directive, DynError>> + Send + Sync,
>
where
    U: Fn(Update, CancellationToken) -> Result<(), DynError> + Send + Sync,
    E: Fn(ErrorContext, CancellationToken) -> Result<Directive, DynError> + Send + Sync,
{
    FnHandler::new(
        move |update, shutdown| ready(update_fn(update, shutdown)),
        move |context, shutdown| ready(error_fn(context, shutdown)),
    )
}
