//! Purpose: Drive one subscription from establishment to its single terminal notification.
//! Exports: `Subscription`, `Notification`, `CancelHandle`.
//! Role: Lifecycle state machine over a transport `FrameStream`.
//! Invariants: Events are yielded only while `Active`, in arrival order, each exactly once.
//! Invariants: Exactly one `Notification::Terminated` per subscription; later calls fail with `SubscriptionClosed`.
//! Invariants: The transport stream is released exactly once, on the first terminal transition.
//! Invariants: Cancellation is idempotent and a no-op once terminal.
use super::transport::FrameStream;
use crate::core::error::Error;
use crate::core::event::{ChangeEvent, FilterSpec};
use crate::core::frame::Frame;
use crate::core::state::{Outcome, SubscriptionState, TerminalLatch, stream_failure};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// One step of consumption.
#[derive(Debug)]
pub enum Notification {
    Event(ChangeEvent),
    Terminated(Outcome),
}

/// Requests cancellation of a subscription from any task.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    inner: Arc<CancelSignal>,
}

#[derive(Debug, Default)]
struct CancelSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if !self.inner.requested.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_one();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

enum Step {
    Cancelled,
    Frame(Option<Frame>),
}

#[derive(Debug)]
pub struct Subscription {
    filter: FilterSpec,
    state: SubscriptionState,
    stream: Option<FrameStream>,
    pending: Option<Outcome>,
    delivered: u64,
    cancel: CancelHandle,
}

impl Subscription {
    /// Wraps an established stream; the subscription starts `Active`.
    pub fn new(filter: FilterSpec, stream: FrameStream) -> Self {
        Self {
            filter,
            state: SubscriptionState::Active,
            stream: Some(stream),
            pending: None,
            delivered: 0,
            cancel: CancelHandle::default(),
        }
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SubscriptionState::Active
    }

    pub fn events_delivered(&self) -> u64 {
        self.delivered
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancels the subscription. Returns `false` when it had already terminated.
    ///
    /// The transport is released immediately; the next call to [`next`](Self::next)
    /// yields `Terminated(Outcome::Cancelled)`.
    pub fn cancel(&mut self) -> bool {
        self.cancel.cancel();
        self.apply_cancel()
    }

    /// Waits for the next event or the terminal notification.
    pub async fn next(&mut self) -> Result<Notification, Error> {
        if self.state.is_terminal() {
            return self.deliver_pending();
        }
        if self.cancel.is_cancelled() {
            self.apply_cancel();
            return self.deliver_pending();
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::subscription_closed());
        };

        let cancel = self.cancel.clone();
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => Step::Cancelled,
            frame = stream.recv() => Step::Frame(frame),
        };

        match step {
            Step::Cancelled => {
                self.apply_cancel();
                self.deliver_pending()
            }
            Step::Frame(Some(Frame::Event(event))) => {
                self.delivered += 1;
                Ok(Notification::Event(event))
            }
            Step::Frame(Some(frame)) => {
                let outcome = self.settle_terminal(frame);
                self.finish(outcome)
            }
            Step::Frame(None) => self.finish(Outcome::Completed),
        }
    }

    /// Settles a terminal frame together with any terminal frames queued behind it.
    fn settle_terminal(&mut self, first: Frame) -> Outcome {
        let mut latch = TerminalLatch::new();
        observe_terminal(&mut latch, first);
        if let Some(stream) = self.stream.as_mut() {
            while let Some(frame) = stream.try_recv() {
                observe_terminal(&mut latch, frame);
            }
        }
        latch.settle()
    }

    fn apply_cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.terminate(Outcome::Cancelled);
        true
    }

    fn finish(&mut self, outcome: Outcome) -> Result<Notification, Error> {
        self.terminate(outcome);
        self.deliver_pending()
    }

    fn terminate(&mut self, outcome: Outcome) {
        self.state = outcome.state();
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!(
                tables = %self.filter.table_expression(),
                state = ?self.state,
                events = self.delivered,
                "released listen stream"
            );
        }
        match &outcome {
            Outcome::Failed(error) => tracing::debug!(%error, "subscription failed"),
            Outcome::StatusReceived(status) => {
                tracing::debug!(%status, "subscription ended with status")
            }
            Outcome::Completed | Outcome::Cancelled => {}
        }
        self.pending = Some(outcome);
    }

    fn deliver_pending(&mut self) -> Result<Notification, Error> {
        match self.pending.take() {
            Some(outcome) => Ok(Notification::Terminated(outcome)),
            None => Err(Error::subscription_closed()),
        }
    }
}

fn observe_terminal(latch: &mut TerminalLatch, frame: Frame) {
    match frame {
        Frame::Status(status) => latch.observe_status(status),
        Frame::Error(error) => latch.observe_error(stream_failure(error)),
        Frame::Event(_) => tracing::debug!("discarding event queued after terminal frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::{Notification, Subscription};
    use crate::api::transport::{self, FrameStream};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::event::{ChangeEvent, FilterSpec};
    use crate::core::frame::Frame;
    use crate::core::state::{Outcome, SubscriptionState};
    use crate::core::status::{Code, Status};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn open(filter: &str) -> (mpsc::Sender<Frame>, Subscription) {
        let (tx, stream): (_, FrameStream) = transport::channel();
        (tx, Subscription::new(FilterSpec::new(filter), stream))
    }

    fn event(n: u64) -> Frame {
        Frame::Event(ChangeEvent::new(json!({"table": "orders", "n": n})))
    }

    async fn expect_event(sub: &mut Subscription) -> ChangeEvent {
        match sub.next().await.expect("notification") {
            Notification::Event(event) => event,
            other => panic!("expected event, got {other:?}"),
        }
    }

    async fn expect_terminal(sub: &mut Subscription) -> Outcome {
        match sub.next().await.expect("notification") {
            Notification::Terminated(outcome) => outcome,
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    async fn expect_closed(sub: &mut Subscription) {
        let err = sub.next().await.expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::SubscriptionClosed);
    }

    #[tokio::test]
    async fn graceful_end_delivers_events_then_completed() {
        let (tx, mut sub) = open(".*");
        tx.send(event(1)).await.expect("send");
        tx.send(event(2)).await.expect("send");
        drop(tx);

        assert_eq!(expect_event(&mut sub).await.as_value()["n"], 1);
        assert_eq!(expect_event(&mut sub).await.as_value()["n"], 2);
        assert!(matches!(expect_terminal(&mut sub).await, Outcome::Completed));
        assert_eq!(sub.state(), SubscriptionState::Completed);
        assert_eq!(sub.events_delivered(), 2);
        expect_closed(&mut sub).await;
        expect_closed(&mut sub).await;
    }

    #[tokio::test]
    async fn transport_error_after_first_event_fails() {
        let (tx, mut sub) = open("^orders$");
        tx.send(event(1)).await.expect("send");
        let reset = Error::new(ErrorKind::Transport).with_message("connection reset");
        tx.send(Frame::Error(reset)).await.expect("send");

        assert_eq!(expect_event(&mut sub).await.as_value()["n"], 1);
        match expect_terminal(&mut sub).await {
            Outcome::Failed(err) => {
                assert_eq!(err.kind(), ErrorKind::Transport);
                assert_eq!(err.message(), Some("connection reset"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(sub.state(), SubscriptionState::Failed);
        assert!(tx.is_closed());
        expect_closed(&mut sub).await;
    }

    #[tokio::test]
    async fn queued_status_outranks_error() {
        let (tx, mut sub) = open(".*");
        tx.send(Frame::Error(Error::new(ErrorKind::Transport)))
            .await
            .expect("send");
        tx.send(Frame::Status(Status::new(Code::Unavailable, "draining")))
            .await
            .expect("send");

        match expect_terminal(&mut sub).await {
            Outcome::StatusReceived(status) => assert_eq!(status.code, Code::Unavailable),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(sub.state(), SubscriptionState::Failed);
    }

    #[tokio::test]
    async fn ok_status_completes() {
        let (tx, mut sub) = open(".*");
        tx.send(Frame::Status(Status::new(Code::Ok, "")))
            .await
            .expect("send");
        assert!(matches!(expect_terminal(&mut sub).await, Outcome::Completed));
        assert_eq!(sub.state(), SubscriptionState::Completed);
    }

    #[tokio::test]
    async fn events_after_terminal_frame_are_not_delivered() {
        let (tx, mut sub) = open(".*");
        tx.send(Frame::Status(Status::new(Code::Aborted, "")))
            .await
            .expect("send");
        tx.send(event(9)).await.expect("send");
        assert!(matches!(
            expect_terminal(&mut sub).await,
            Outcome::StatusReceived(_)
        ));
        expect_closed(&mut sub).await;
        assert_eq!(sub.events_delivered(), 0);
    }

    #[tokio::test]
    async fn cancel_before_any_event() {
        let (tx, mut sub) = open(".*");
        assert!(sub.cancel());
        assert!(!sub.cancel());
        assert_eq!(sub.state(), SubscriptionState::Cancelled);
        assert!(tx.is_closed());

        assert!(matches!(expect_terminal(&mut sub).await, Outcome::Cancelled));
        assert!(!sub.cancel());
        expect_closed(&mut sub).await;
        assert_eq!(sub.events_delivered(), 0);
    }

    #[tokio::test]
    async fn cancel_discards_queued_events() {
        let (tx, mut sub) = open(".*");
        tx.send(event(1)).await.expect("send");
        tx.send(event(2)).await.expect("send");
        assert_eq!(expect_event(&mut sub).await.as_value()["n"], 1);
        sub.cancel();
        assert!(matches!(expect_terminal(&mut sub).await, Outcome::Cancelled));
        expect_closed(&mut sub).await;
        assert_eq!(sub.events_delivered(), 1);
    }

    #[tokio::test]
    async fn cancel_after_terminal_is_noop() {
        let (tx, mut sub) = open(".*");
        drop(tx);
        assert!(matches!(expect_terminal(&mut sub).await, Outcome::Completed));
        assert!(!sub.cancel());
        sub.cancel_handle().cancel();
        assert_eq!(sub.state(), SubscriptionState::Completed);
        expect_closed(&mut sub).await;
    }

    #[tokio::test]
    async fn cancel_handle_wakes_pending_next() {
        let (tx, mut sub) = open(".*");
        let handle = sub.cancel_handle();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
            handle.cancel();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), expect_terminal(&mut sub))
            .await
            .expect("cancel observed");
        assert!(matches!(outcome, Outcome::Cancelled));
        assert!(tx.is_closed());
        canceller.await.expect("canceller");
        expect_closed(&mut sub).await;
    }

    #[tokio::test]
    async fn cancel_handle_before_next_is_observed() {
        let (_tx, mut sub) = open(".*");
        sub.cancel_handle().cancel();
        assert!(matches!(expect_terminal(&mut sub).await, Outcome::Cancelled));
        assert_eq!(sub.state(), SubscriptionState::Cancelled);
    }

    #[tokio::test]
    async fn preserves_order_without_loss_or_duplication() {
        let (tx, mut sub) = open(".*");
        let producer = tokio::spawn(async move {
            for n in 0..200 {
                tx.send(event(n)).await.expect("send");
            }
        });

        let mut seen = Vec::new();
        loop {
            match sub.next().await.expect("notification") {
                Notification::Event(event) => {
                    seen.push(event.as_value()["n"].as_u64().expect("n"))
                }
                Notification::Terminated(outcome) => {
                    assert!(outcome.is_success());
                    break;
                }
            }
        }
        producer.await.expect("producer");
        assert_eq!(seen, (0..200).collect::<Vec<_>>());
        assert_eq!(sub.events_delivered(), 200);
    }
}
