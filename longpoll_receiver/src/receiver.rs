//! The long-polling receive loop.

use std::{convert::Infallible, future::Future, sync::Arc, time::Duration};

use futures::{FutureExt, pin_mut};
use iox_time::{SystemProvider, Time, TimeProvider};
use longpoll_types::Update;
use observability_deps::tracing::*;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    Directive, DynError, Error, ErrorContext, FetchRequest, FnHandler, ReceiverOptions, Result,
    UpdateHandler, UpdateSource, sync_fn_handler,
};

/// Pulls updates from an [`UpdateSource`] and dispatches them, one at a time and in order, to an
/// [`UpdateHandler`].
///
/// After every update the handler processed, successfully or not, the receiver advances its
/// cursor past it, so the next fetch acknowledges the update and the source does not deliver it
/// again. Failures are offered to [`UpdateHandler::handle_error`], whose [`Directive`] decides
/// whether the receiver keeps going.
///
/// A run ends when its [`CancellationToken`] is cancelled, completing with `Ok(())`, or when the
/// handler aborts it.
#[derive(Debug)]
pub struct Receiver<S> {
    source: S,
    options: ReceiverOptions,
    time_provider: Arc<dyn TimeProvider>,
}

impl<S> Receiver<S>
where
    S: UpdateSource + 'static,
{
    /// Build a receiver pulling from `source`.
    ///
    /// Fails with [`Error::InvalidOptions`] if `options` are out of range.
    pub fn new(source: S, options: ReceiverOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            source,
            options,
            time_provider: Arc::new(SystemProvider::new()),
        })
    }

    /// Use `time_provider` to timestamp failures.
    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    pub fn options(&self) -> &ReceiverOptions {
        &self.options
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run the receive loop on the current task until `shutdown` is cancelled or `handler` aborts
    /// it.
    ///
    /// The receiver is consumed, so at most one loop ever runs against its cursor:
    ///
    /// ```compile_fail
    /// # use longpoll_receiver::{Directive, Receiver, UpdateSource, sync_fn_handler};
    /// # use tokio_util::sync::CancellationToken;
    /// # async fn run_twice<S: UpdateSource + 'static>(receiver: Receiver<S>) {
    /// let shutdown = CancellationToken::new();
    /// let first = receiver.receive(
    ///     sync_fn_handler(|_, _| Ok(()), |_, _| Ok(Directive::Continue)),
    ///     shutdown.clone(),
    /// );
    /// let second = receiver.receive(
    ///     sync_fn_handler(|_, _| Ok(()), |_, _| Ok(Directive::Continue)),
    ///     shutdown,
    /// );
    /// let _ = futures::join!(first, second);
    /// # }
    /// ```
    pub async fn receive<H>(self, handler: H, shutdown: CancellationToken) -> Result<()>
    where
        H: UpdateHandler,
    {
        ReceiveLoop {
            source: &self.source,
            handler: &handler,
            options: &self.options,
            time_provider: self.time_provider.as_ref(),
            shutdown: &shutdown,
            cursor: self.options.offset(),
        }
        .run()
        .await
    }

    /// Spawn the receive loop onto the tokio runtime.
    ///
    /// The loop stops when `shutdown` or the returned handle is cancelled. Dropping the handle
    /// detaches the loop.
    pub fn start_receiving<H>(self, handler: H, shutdown: &CancellationToken) -> ReceiverHandle
    where
        H: UpdateHandler + 'static,
    {
        let shutdown = shutdown.child_token();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { self.receive(handler, shutdown).await }
        });

        ReceiverHandle { shutdown, task }
    }

    /// Spawn the receive loop with a default constructed `H`.
    pub fn start_receiving_default<H>(self, shutdown: &CancellationToken) -> ReceiverHandle
    where
        H: UpdateHandler + Default + 'static,
    {
        self.start_receiving(H::default(), shutdown)
    }

    /// Spawn the receive loop with a pair of async functions as the handler.
    ///
    /// See [`FnHandler`].
    pub fn start_receiving_fns<U, UFut, E, EFut>(
        self,
        update_fn: U,
        error_fn: E,
        shutdown: &CancellationToken,
    ) -> ReceiverHandle
    where
        U: Fn(Update, CancellationToken) -> UFut + Send + Sync + 'static,
        UFut: Future<Output = Result<(), DynError>> + Send + 'static,
        E: Fn(ErrorContext, CancellationToken) -> EFut + Send + Sync + 'static,
        EFut: Future<Output = Result<Directive, DynError>> + Send + 'static,
    {
        self.start_receiving(FnHandler::new(update_fn, error_fn), shutdown)
    }

    /// Spawn the receive loop with a pair of synchronous functions as the handler.
    ///
    /// See [`sync_fn_handler`].
    pub fn start_receiving_sync_fns<U, E>(
        self,
        update_fn: U,
        error_fn: E,
        shutdown: &CancellationToken,
    ) -> ReceiverHandle
    where
        U: Fn(Update, CancellationToken) -> Result<(), DynError> + Send + Sync + 'static,
        E: Fn(ErrorContext, CancellationToken) -> Result<Directive, DynError>
            + Send
            + Sync
            + 'static,
    {
        self.start_receiving(sync_fn_handler(update_fn, error_fn), shutdown)
    }

    /// Spawn the receive loop with only an update function.
    ///
    /// Failures are answered with the configured
    /// [`default_directive`](ReceiverOptions::default_directive) and logged by the loop, as a
    /// warning when it continues and as an error when it aborts.
    pub fn start_receiving_update_fn<U, UFut>(
        self,
        update_fn: U,
        shutdown: &CancellationToken,
    ) -> ReceiverHandle
    where
        U: Fn(Update, CancellationToken) -> UFut + Send + Sync + 'static,
        UFut: Future<Output = Result<(), DynError>> + Send + 'static,
    {
        let directive = self.options.default_directive();
        let error_fn = move |_context: ErrorContext, _shutdown: CancellationToken| {
            std::future::ready(Ok::<_, DynError>(directive))
        };

        self.start_receiving_fns(update_fn, error_fn, shutdown)
    }
}

/// Controls a receive loop spawned by one of the `start_receiving*` methods of [`Receiver`].
#[derive(Debug)]
pub struct ReceiverHandle {
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl ReceiverHandle {
    /// Ask the receiver to stop.
    ///
    /// Only this run is cancelled, the token it was started with is left alone.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// The token that stops this run.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to complete.
    ///
    /// Resolves to `Ok(())` if the run was cancelled.
    pub async fn join(self) -> Result<()> {
        self.task.await.map_err(|e| {
            if e.is_panic() {
                Error::Panicked(e.to_string())
            } else {
                Error::TaskCancelled
            }
        })?
    }
}

/// Why a [`ReceiveLoop`] stopped.
enum Terminated {
    Cancelled,
    Failed(Error),
}

type Step<T = ()> = std::result::Result<T, Terminated>;

/// The state of one run. The cursor is the next offset to request.
struct ReceiveLoop<'a, S, H> {
    source: &'a S,
    handler: &'a H,
    options: &'a ReceiverOptions,
    time_provider: &'a dyn TimeProvider,
    shutdown: &'a CancellationToken,
    cursor: i64,
}

impl<S, H> ReceiveLoop<'_, S, H>
where
    S: UpdateSource,
    H: UpdateHandler,
{
    async fn run(mut self) -> Result<()> {
        info!(
            offset = self.cursor,
            batch_limit = self.options.batch_limit(),
            poll_timeout = ?self.options.poll_timeout(),
            drop_pending_updates = self.options.drop_pending_updates(),
            "update receiver started"
        );

        let terminated = match self.drive().await {
            Ok(never) => match never {},
            Err(terminated) => terminated,
        };

        match terminated {
            Terminated::Cancelled => {
                info!(offset = self.cursor, "update receiver stopped");
                Ok(())
            }
            Terminated::Failed(e) => {
                error!(error = %e, offset = self.cursor, "update receiver terminated");
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Step<Infallible> {
        if self.options.drop_pending_updates() {
            self.drop_pending().await?;
        }
        loop {
            self.poll_once().await?;
        }
    }

    /// Move the cursor past every update pending at start.
    async fn drop_pending(&mut self) -> Step {
        let request = FetchRequest {
            offset: -1,
            timeout: Duration::ZERO,
            allowed_updates: vec![],
            limit: 1,
        };

        loop {
            self.check_cancelled()?;
            match cancellable(self.shutdown, self.source.fetch_batch(&request)).await? {
                Ok(batch) => {
                    self.cursor = batch.last().map(|u| u.id().next_offset()).unwrap_or(0);
                    debug!(offset = self.cursor, "dropped pending updates");
                    return Ok(());
                }
                Err(e) => {
                    self.on_error(ErrorContext::fetch_failed(request.offset, e, self.now()))
                        .await?;
                    self.backoff().await?;
                }
            }
        }
    }

    async fn poll_once(&mut self) -> Step {
        self.check_cancelled()?;

        let request = self.request();
        let batch = match cancellable(self.shutdown, self.source.fetch_batch(&request)).await? {
            Ok(batch) => batch,
            Err(e) => {
                self.on_error(ErrorContext::fetch_failed(request.offset, e, self.now()))
                    .await?;
                return self.backoff().await;
            }
        };

        debug!(offset = request.offset, n_updates = batch.len(), "fetched updates");
        for update in batch {
            self.dispatch(update).await?;
        }
        Ok(())
    }

    async fn dispatch(&mut self, update: Update) -> Step {
        self.check_cancelled()?;

        let update_id = update.id();
        if update_id.get() < self.cursor {
            trace!(%update_id, offset = self.cursor, "skipping acknowledged update");
            return Ok(());
        }

        trace!(%update_id, kind = %update.kind(), "dispatching update");
        match self.handler.handle_update(update.clone(), self.shutdown).await {
            Ok(()) => {
                self.cursor = update_id.next_offset();
                self.check_cancelled()
            }
            Err(e) => {
                // Failures after cancellation are not offered to the handler.
                self.check_cancelled()?;
                self.on_error(ErrorContext::dispatch_failed(update, e, self.now()))
                    .await?;
                self.cursor = update_id.next_offset();
                Ok(())
            }
        }
    }

    async fn on_error(&self, context: ErrorContext) -> Step {
        let error = context.error().clone();
        let directive = self.handler.handle_error(context, self.shutdown).await;
        self.check_cancelled()?;

        match directive {
            Ok(Directive::Continue) => {
                warn!(%error, offset = self.cursor, "continuing after receiver error");
                Ok(())
            }
            Ok(Directive::Abort) => Err(Terminated::Failed(Error::Aborted(error))),
            Err(source) => Err(Terminated::Failed(Error::ErrorHandler { source })),
        }
    }

    async fn backoff(&self) -> Step {
        self.check_cancelled()?;
        let delay = self.options.retry_delay();
        debug!(?delay, offset = self.cursor, "retrying fetch after delay");
        cancellable(self.shutdown, tokio::time::sleep(delay)).await
    }

    fn request(&self) -> FetchRequest {
        FetchRequest {
            offset: self.cursor,
            timeout: self.options.poll_timeout(),
            allowed_updates: self.options.allowed_updates().iter().copied().collect(),
            limit: self.options.batch_limit(),
        }
    }

    fn check_cancelled(&self) -> Step {
        if self.shutdown.is_cancelled() {
            return Err(Terminated::Cancelled);
        }
        Ok(())
    }

    fn now(&self) -> Time {
        self.time_provider.now()
    }
}

/// Drive `fut` unless `shutdown` is cancelled first.
async fn cancellable<F>(shutdown: &CancellationToken, fut: F) -> Step<F::Output>
where
    F: Future + Send,
{
    let fut = fut.fuse();
    let cancelled = shutdown.cancelled().fuse();
    pin_mut!(fut, cancelled);

    futures::select_biased! {
        _ = cancelled => Err(Terminated::Cancelled),
        output = fut => Ok(output),
    }
}
