//! Consume a [`Receiver`] as a [`Stream`] of updates.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use futures::{Stream, StreamExt, stream::BoxStream};
use longpoll_types::Update;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{Directive, DynError, ErrorContext, Receiver, Result, UpdateHandler, UpdateSource};

impl<S> Receiver<S>
where
    S: UpdateSource + 'static,
{
    /// Run the receive loop in the background and yield the updates it receives.
    ///
    /// An update counts as handled, and is acknowledged by the next fetch, as soon as it is
    /// buffered. At most [`batch_limit`](crate::ReceiverOptions::batch_limit) updates are buffered
    /// before the receiver waits for the consumer. Failures are answered with the configured
    /// [`default_directive`](crate::ReceiverOptions::default_directive); if the run aborts, the
    /// error is the last item of the stream.
    ///
    /// Dropping the stream stops the run.
    pub fn into_stream(self, shutdown: &CancellationToken) -> UpdateStream {
        let (tx, rx) = mpsc::channel(usize::from(self.options().batch_limit()));
        let handler = QueueHandler {
            tx,
            directive: self.options().default_directive(),
        };

        let handle = self.start_receiving(handler, shutdown);
        let shutdown = handle.shutdown_token().clone();

        let updates = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|update| (Ok(update), rx))
        });
        let completion = futures::stream::once(handle.join())
            .filter_map(|res| futures::future::ready(res.err().map(Err)));

        UpdateStream {
            inner: updates.chain(completion).boxed(),
            shutdown,
        }
    }
}

/// The updates of a [`Receiver`] run, see [`Receiver::into_stream`].
pub struct UpdateStream {
    inner: BoxStream<'static, Result<Update>>,
    shutdown: CancellationToken,
}

impl UpdateStream {
    /// Stop the run. Updates already buffered are still yielded.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for UpdateStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateStream")
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

impl Stream for UpdateStream {
    type Item = Result<Update>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for UpdateStream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Hands updates over to an [`UpdateStream`].
#[derive(Debug)]
struct QueueHandler {
    tx: mpsc::Sender<Update>,
    directive: Directive,
}

#[async_trait]
impl UpdateHandler for QueueHandler {
    async fn handle_update(
        &self,
        update: Update,
        shutdown: &CancellationToken,
    ) -> Result<(), DynError> {
        tokio::select! {
            res = self.tx.send(update) => res.map_err(|_| DynError::from("update stream closed")),
            _ = shutdown.cancelled() => Ok(()),
        }
    }

    async fn handle_error(
        &self,
        _context: ErrorContext,
        _shutdown: &CancellationToken,
    ) -> Result<Directive, DynError> {
        Ok(self.directive)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use assert_matches::assert_matches;
    use longpoll_types::UpdateKind;
    use serde_json::json;

    use super::*;
    use crate::{Error, ReceiveError, ReceiverOptions, mock::MockUpdateSource};

    fn update(id: i64) -> Update {
        Update::new(id, UpdateKind::Message, json!({}))
    }

    fn ids(updates: Vec<Result<Update>>) -> Vec<i64> {
        updates
            .into_iter()
            .map(|u| u.unwrap().id().get())
            .collect()
    }

    #[test_log::test(tokio::test)]
    async fn test_yields_updates_in_order() {
        let source = Arc::new(
            MockUpdateSource::default()
                .with_batch((1..=5).map(update))
                .with_batch([update(6)]),
        );
        let options = ReceiverOptions::default().with_batch_limit(2);

        let mut stream = Receiver::new(Arc::clone(&source), options)
            .unwrap()
            .into_stream(&CancellationToken::new());
        let received = stream.by_ref().take(6).collect::<Vec<_>>().await;
        assert_eq!(ids(received), vec![1, 2, 3, 4, 5, 6]);

        source.wait_drained().await;
        assert_eq!(source.offsets(), vec![0, 6, 7]);
    }

    #[test_log::test(tokio::test)]
    async fn test_abort_is_last_item() {
        let source = MockUpdateSource::default()
            .with_batch([update(1)])
            .with_failure("gateway timeout");
        let options = ReceiverOptions::default().with_default_directive(Directive::Abort);

        let received = Receiver::new(source, options)
            .unwrap()
            .into_stream(&CancellationToken::new())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(received.len(), 2);
        assert_matches!(&received[0], Ok(u) if u.id().get() == 1);
        assert_matches!(
            &received[1],
            Err(Error::Aborted(ReceiveError::Fetch { offset: 2, .. }))
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_failures_continue_by_default() {
        let source = Arc::new(
            MockUpdateSource::default()
                .with_failure("gateway timeout")
                .with_batch([update(1)]),
        );
        let options = ReceiverOptions::default().with_retry_delay(Duration::from_millis(1));

        let mut stream = Receiver::new(Arc::clone(&source), options)
            .unwrap()
            .into_stream(&CancellationToken::new());

        assert_eq!(stream.next().await.unwrap().unwrap().id().get(), 1);
        source.wait_drained().await;
        assert_eq!(source.offsets(), vec![0, 0, 2]);
    }

    #[test_log::test(tokio::test)]
    async fn test_cancellation_ends_stream() {
        let source = Arc::new(MockUpdateSource::default());
        let shutdown = CancellationToken::new();

        let stream = Receiver::new(Arc::clone(&source), ReceiverOptions::default())
            .unwrap()
            .into_stream(&shutdown);
        source.wait_drained().await;
        shutdown.cancel();

        let received = tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
            .await
            .expect("stream did not end");
        assert!(received.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_drop_stops_run() {
        let source = Arc::new(MockUpdateSource::default());
        let shutdown = CancellationToken::new();

        let stream = Receiver::new(Arc::clone(&source), ReceiverOptions::default())
            .unwrap()
            .into_stream(&shutdown);
        source.wait_drained().await;
        drop(stream);

        // The run owns the other reference to the source until it completes.
        tokio::time::timeout(Duration::from_secs(5), async {
            while Arc::strong_count(&source) > 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("run did not stop");
        assert!(!shutdown.is_cancelled());
    }
}
