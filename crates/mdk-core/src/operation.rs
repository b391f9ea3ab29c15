//! Bridges a blocking, callback-driven vendor operation into an async stream.
//!
//! The vendor call runs on a dedicated worker thread. Its status callback
//! decodes each payload and forwards it through an unbounded channel; when
//! the call returns, exactly one terminal message follows. The sender is
//! retired under the lock the callback takes, so anything the vendor
//! delivers after that point is ignored.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll};
use std::thread;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::backend::StatusCallback;
use crate::error::DeviceError;
use crate::status::{OperationPhase, ProgressStatus, StatusPayload};

enum Message<P> {
    Progress(ProgressStatus<P>),
    Finished(Result<(), DeviceError>),
}

type Sender<P> = Arc<Mutex<Option<mpsc::UnboundedSender<Message<P>>>>>;

/// Progress of one long-running operation.
///
/// Yields decoded progress in callback order. Success ends the stream; a
/// failure is delivered as the last item. Dropping the stream stops
/// forwarding but does not interrupt the vendor call.
#[must_use = "streams do nothing unless polled"]
pub struct OperationStream<P> {
    receiver: mpsc::UnboundedReceiver<Message<P>>,
    finished: bool,
}

impl<P: OperationPhase> OperationStream<P> {
    /// A stream whose only item is `error`.
    pub(crate) fn failed(error: DeviceError) -> Self {
        let (tx, receiver) = mpsc::unbounded_channel();
        let _ = tx.send(Message::Finished(Err(error)));
        Self {
            receiver,
            finished: false,
        }
    }

    /// Drain the stream, discarding progress, and return the outcome.
    pub async fn complete(mut self) -> Result<(), DeviceError> {
        while let Some(item) = self.next().await {
            item?;
        }
        Ok(())
    }
}

impl<P: OperationPhase> Stream for OperationStream<P> {
    type Item = Result<ProgressStatus<P>, DeviceError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(Message::Progress(status))) => Poll::Ready(Some(Ok(status))),
            Poll::Ready(Some(Message::Finished(result))) => {
                self.finished = true;
                Poll::Ready(result.err().map(Err))
            }
            Poll::Ready(None) => {
                // Worker went away without a result (panicked or never started)
                self.finished = true;
                Poll::Ready(Some(Err(DeviceError::OperationInterrupted {
                    operation: P::KIND.as_str(),
                })))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Run `operation` on a worker thread and stream its progress.
///
/// `operation` receives the status callback to hand to the vendor and
/// returns the already-mapped outcome of the vendor call.
pub(crate) fn spawn_operation<P, F>(operation: F) -> OperationStream<P>
where
    P: OperationPhase,
    F: FnOnce(StatusCallback) -> Result<(), DeviceError> + Send + 'static,
{
    let (tx, receiver) = mpsc::unbounded_channel();
    let sender: Sender<P> = Arc::new(Mutex::new(Some(tx)));

    let callback = status_callback(sender.clone());
    let spawned = thread::Builder::new()
        .name(format!("mobiledevice-{}", P::KIND.as_str().replace(' ', "-")))
        .spawn(move || {
            let result = operation(callback);
            match &result {
                Ok(()) => debug!(kind = %P::KIND, "Operation finished"),
                Err(e) => debug!(kind = %P::KIND, error = %e, "Operation failed"),
            }
            if let Some(tx) = sender.lock().take() {
                let _ = tx.send(Message::Finished(result));
            }
        });

    if let Err(e) = spawned {
        // The closure and its sender are gone; the stream reports interruption.
        error!(kind = %P::KIND, error = %e, "Failed to spawn operation worker");
    }

    OperationStream {
        receiver,
        finished: false,
    }
}

fn status_callback<P: OperationPhase>(sender: Sender<P>) -> StatusCallback {
    let last_percent = AtomicU8::new(0);
    Arc::new(move |payload: StatusPayload| {
        let sender = sender.lock();
        let Some(tx) = sender.as_ref() else {
            trace!(kind = %P::KIND, "Ignoring status delivered after completion");
            return;
        };
        if tx.is_closed() {
            return;
        }
        match P::decode(&payload) {
            Some(status) => {
                let previous = last_percent.swap(status.percent_complete, Ordering::Relaxed);
                if status.percent_complete < previous {
                    debug!(kind = %P::KIND, previous, percent = status.percent_complete, "Progress went backwards");
                }
                trace!(kind = %P::KIND, percent = status.percent_complete, phase = %status.phase, "Progress");
                let _ = tx.send(Message::Progress(status));
            }
            None => trace!(kind = %P::KIND, ?payload, "Dropping unrecognized status payload"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::payload::{KEY_PERCENT_COMPLETE, KEY_STATUS};
    use crate::status::{InstallPhase, TransferPhase};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    fn status(name: &str, percent: i64) -> StatusPayload {
        StatusPayload::new()
            .with(KEY_STATUS, name)
            .with(KEY_PERCENT_COMPLETE, percent)
    }

    fn failure() -> DeviceError {
        DeviceError::InstallFailure {
            message: "ApplicationVerificationFailed".into(),
        }
    }

    #[tokio::test]
    async fn test_progress_in_order_then_clean_end() {
        let stream = spawn_operation::<InstallPhase, _>(|callback| {
            callback(status("CreatingStagingDirectory", 5));
            callback(status("ExtractingPackage", 15));
            callback(status("InstallComplete", 100));
            Ok(())
        });

        let items: Vec<_> = stream.collect().await;
        let phases: Vec<_> = items
            .into_iter()
            .map(|item| item.unwrap().phase)
            .collect();
        assert_eq!(
            phases,
            vec![
                InstallPhase::CreatingStagingDirectory,
                InstallPhase::ExtractingPackage,
                InstallPhase::InstallComplete
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_is_last_item() {
        let mut stream = spawn_operation::<InstallPhase, _>(|callback| {
            callback(status("ExtractingPackage", 15));
            Err(failure())
        });

        assert!(stream.next().await.unwrap().is_ok());
        match stream.next().await {
            Some(Err(DeviceError::InstallFailure { message })) => {
                assert_eq!(message, "ApplicationVerificationFailed")
            }
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unrecognized_payloads_are_dropped() {
        let stream = spawn_operation::<TransferPhase, _>(|callback| {
            callback(status("SomethingNew", 10));
            callback(StatusPayload::new().with(KEY_PERCENT_COMPLETE, 10i64));
            callback(status("TransferringPackage", 40));
            Ok(())
        });

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        let status = items[0].as_ref().unwrap();
        assert_eq!(status.phase, TransferPhase::TransferringPackage);
        assert_eq!(status.percent_complete, 40);
    }

    #[tokio::test]
    async fn test_decreasing_percent_is_forwarded() {
        let stream = spawn_operation::<TransferPhase, _>(|callback| {
            callback(status("TransferringPackage", 50));
            callback(status("TransferringPackage", 30));
            callback(status("TransferringPackage", 60));
            Ok(())
        });

        let percents: Vec<_> = stream
            .map(|item| item.unwrap().percent_complete)
            .collect()
            .await;
        assert_eq!(percents, vec![50, 30, 60]);
    }

    #[tokio::test]
    async fn test_late_and_duplicate_callbacks_are_ignored() {
        let retained: Arc<Mutex<Option<StatusCallback>>> = Arc::new(Mutex::new(None));
        let slot = retained.clone();

        let mut stream = spawn_operation::<TransferPhase, _>(move |callback| {
            callback(status("PreflightingTransfer", 0));
            *slot.lock() = Some(callback);
            Ok(())
        });

        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.is_none());

        let late = retained.lock().take().unwrap();
        late(status("TransferringPackage", 50));
        late(status("TransferringPackage", 50));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_stream_lets_vendor_call_finish() {
        let (gate_tx, gate_rx) = std_mpsc::channel::<()>();
        let (done_tx, done_rx) = std_mpsc::channel::<()>();

        let mut stream = spawn_operation::<TransferPhase, _>(move |callback| {
            callback(status("PreflightingTransfer", 0));
            let _ = gate_rx.recv();
            // Delivered after the consumer went away
            callback(status("TransferringPackage", 80));
            let _ = done_tx.send(());
            Ok(())
        });

        assert!(stream.next().await.unwrap().is_ok());
        drop(stream);
        gate_tx.send(()).unwrap();

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[tokio::test]
    async fn test_failed_stream_has_single_error() {
        let mut stream = OperationStream::<TransferPhase>::failed(DeviceError::DeviceNotFound(
            "X".into(),
        ));
        assert!(matches!(
            stream.next().await,
            Some(Err(DeviceError::DeviceNotFound(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_panicking_worker_reports_interruption() {
        let mut stream = spawn_operation::<InstallPhase, _>(|_callback| {
            panic!("vendor crashed");
        });

        match stream.next().await {
            Some(Err(DeviceError::OperationInterrupted { operation })) => {
                assert_eq!(operation, "app install")
            }
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_complete_returns_outcome() {
        let ok = spawn_operation::<InstallPhase, _>(|callback| {
            callback(status("InstallComplete", 100));
            Ok(())
        });
        assert!(ok.complete().await.is_ok());

        let failed = spawn_operation::<InstallPhase, _>(|_| Err(failure()));
        assert!(matches!(
            failed.complete().await,
            Err(DeviceError::InstallFailure { .. })
        ));
    }
}
