//! Scripted collaborators for exercising a [`Receiver`](crate::Receiver).

use std::{
    collections::{HashSet, VecDeque},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use longpoll_types::Update;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{
    Directive, DynError, ErrorContext, ErrorOrigin, FetchRequest, UpdateHandler, UpdateSource,
};

/// An [`UpdateSource`] replying with a fixed script of batches and failures.
///
/// Once the script is exhausted every further fetch blocks forever.
#[derive(Debug, Default)]
pub(crate) struct MockUpdateSource {
    state: Mutex<SourceState>,
    drained: Notify,
}

#[derive(Debug, Default)]
struct SourceState {
    replies: VecDeque<Result<Vec<Update>, String>>,
    requests: Vec<FetchRequest>,
}

impl MockUpdateSource {
    pub(crate) fn with_batch(self, batch: impl IntoIterator<Item = Update>) -> Self {
        self.state
            .lock()
            .replies
            .push_back(Ok(batch.into_iter().collect()));
        self
    }

    pub(crate) fn with_failure(self, msg: impl Into<String>) -> Self {
        self.state.lock().replies.push_back(Err(msg.into()));
        self
    }

    pub(crate) fn requests(&self) -> Vec<FetchRequest> {
        self.state.lock().requests.clone()
    }

    pub(crate) fn offsets(&self) -> Vec<i64> {
        self.state.lock().requests.iter().map(|r| r.offset).collect()
    }

    /// Resolves once a fetch found the script exhausted.
    pub(crate) async fn wait_drained(&self) {
        self.drained.notified().await
    }
}

#[async_trait]
impl UpdateSource for MockUpdateSource {
    async fn fetch_batch(&self, request: &FetchRequest) -> Result<Vec<Update>, DynError> {
        let reply = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            state.replies.pop_front()
        };

        match reply {
            Some(Ok(batch)) => Ok(batch),
            Some(Err(msg)) => Err(msg.into()),
            None => {
                self.drained.notify_one();
                futures::future::pending().await
            }
        }
    }
}

/// An [`UpdateSource`] that behaves like a long-polling server queue.
///
/// Fetching with a non-negative offset acknowledges (and forgets) every update below it, a
/// negative offset `-n` forgets all but the newest `n` updates.
#[derive(Debug, Default)]
pub(crate) struct MockUpdateQueue {
    state: Mutex<QueueState>,
    pushed: Notify,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<Update>,
    requests: Vec<FetchRequest>,
}

impl MockUpdateQueue {
    pub(crate) fn push(&self, update: Update) {
        self.state.lock().pending.push(update);
        self.pushed.notify_one();
    }

    pub(crate) fn requests(&self) -> Vec<FetchRequest> {
        self.state.lock().requests.clone()
    }

    pub(crate) fn offsets(&self) -> Vec<i64> {
        self.state.lock().requests.iter().map(|r| r.offset).collect()
    }

    /// Wait until at least `n` fetches were issued.
    pub(crate) async fn wait_for_requests(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.state.lock().requests.len() < n {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("source was not polled in time");
    }

    fn take(&self, request: &FetchRequest) -> Vec<Update> {
        let mut state = self.state.lock();

        if request.offset >= 0 {
            state.pending.retain(|u| u.id().get() >= request.offset);
        } else {
            let keep = usize::try_from(request.offset.unsigned_abs()).unwrap_or(usize::MAX);
            let forget = state.pending.len().saturating_sub(keep);
            state.pending.drain(..forget);
        }

        state
            .pending
            .iter()
            .filter(|u| {
                request.allowed_updates.is_empty() || request.allowed_updates.contains(&u.kind())
            })
            .take(usize::from(request.limit))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl UpdateSource for MockUpdateQueue {
    async fn fetch_batch(&self, request: &FetchRequest) -> Result<Vec<Update>, DynError> {
        self.state.lock().requests.push(request.clone());

        let deadline = tokio::time::Instant::now() + request.timeout;
        loop {
            let batch = self.take(request);
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, self.pushed.notified())
                .await
                .is_err()
            {
                return Ok(vec![]);
            }
        }
    }
}

/// One observed call into a [`MockUpdateHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Update(i64),
    Error {
        origin: ErrorOrigin,
        update_id: Option<i64>,
    },
}

/// An [`UpdateHandler`] recording its calls.
///
/// Panics if two calls overlap.
#[derive(Debug, Default)]
pub(crate) struct MockUpdateHandler {
    calls: Mutex<Vec<Call>>,
    contexts: Mutex<Vec<ErrorContext>>,
    failing: HashSet<i64>,
    directives: Mutex<VecDeque<Result<Directive, String>>>,
    cancel_on: Option<i64>,
    cancel_on_error: bool,
    busy: AtomicBool,
}

impl MockUpdateHandler {
    /// Fail `handle_update` for these update ids.
    pub(crate) fn with_failing_updates(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.failing.extend(ids);
        self
    }

    /// Answer successive `handle_error` calls with these results, then with
    /// [`Directive::Continue`].
    pub(crate) fn with_directives(
        self,
        directives: impl IntoIterator<Item = Result<Directive, String>>,
    ) -> Self {
        self.directives.lock().extend(directives);
        self
    }

    /// Cancel the receiver's token while handling this update id.
    pub(crate) fn with_cancel_on(mut self, id: i64) -> Self {
        self.cancel_on = Some(id);
        self
    }

    /// Cancel the receiver's token from every `handle_error` call.
    pub(crate) fn with_cancel_on_error(mut self) -> Self {
        self.cancel_on_error = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn contexts(&self) -> Vec<ErrorContext> {
        self.contexts.lock().clone()
    }

    /// Wait until at least `n` calls were observed.
    pub(crate) async fn wait_for_calls(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls.lock().len() < n {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("handler was not called in time");
    }

    fn enter(&self, call: Call) {
        assert!(
            !self.busy.swap(true, Ordering::SeqCst),
            "overlapping handler calls"
        );
        self.calls.lock().push(call);
    }

    fn exit(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl UpdateHandler for MockUpdateHandler {
    async fn handle_update(
        &self,
        update: Update,
        shutdown: &CancellationToken,
    ) -> Result<(), DynError> {
        let id = update.id().get();
        self.enter(Call::Update(id));
        tokio::task::yield_now().await;

        if self.cancel_on == Some(id) {
            shutdown.cancel();
        }
        let result = if self.failing.contains(&id) {
            Err(format!("update {id} failed").into())
        } else {
            Ok(())
        };

        self.exit();
        result
    }

    async fn handle_error(
        &self,
        context: ErrorContext,
        shutdown: &CancellationToken,
    ) -> Result<Directive, DynError> {
        self.enter(Call::Error {
            origin: context.origin(),
            update_id: context.update().map(|u| u.id().get()),
        });
        self.contexts.lock().push(context);
        tokio::task::yield_now().await;

        if self.cancel_on_error {
            shutdown.cancel();
        }

        let directive = self
            .directives
            .lock()
            .pop_front()
            .unwrap_or(Ok(Directive::Continue));

        self.exit();
        directive.map_err(Into::into)
    }
}
