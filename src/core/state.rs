//! Purpose: Subscription lifecycle states, terminal outcomes, and their precedence rules.
//! Exports: `SubscriptionState`, `Outcome`, `TerminalLatch`.
//! Role: Pure state logic shared by `api::Subscription` and transports.
//! Invariants: `Active` is the only non-terminal state; terminal states never transition.
//! Invariants: An explicit status outranks a transport error observed for the same closure.
//! Invariants: A status with code `Ok` is a graceful completion, not a failure.
use super::error::{Error, ErrorKind};
use super::status::Status;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubscriptionState {
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl SubscriptionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SubscriptionState::Active)
    }
}

/// The single terminal notification of a subscription.
#[derive(Debug)]
pub enum Outcome {
    Completed,
    Failed(Error),
    StatusReceived(Status),
    Cancelled,
}

impl Outcome {
    /// State the subscription settles in after this outcome.
    pub fn state(&self) -> SubscriptionState {
        match self {
            Outcome::Completed => SubscriptionState::Completed,
            Outcome::Failed(_) | Outcome::StatusReceived(_) => SubscriptionState::Failed,
            Outcome::Cancelled => SubscriptionState::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed | Outcome::Cancelled)
    }

    /// Folds the outcome into a `Result`; completion and cancellation are `Ok`.
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Outcome::Completed | Outcome::Cancelled => Ok(()),
            Outcome::Failed(err) => Err(err),
            Outcome::StatusReceived(status) => Err(Error::from_status(status)),
        }
    }
}

/// Collects the terminal signals a transport sees while a stream closes and
/// settles them into exactly one `Outcome`.
#[derive(Debug, Default)]
pub struct TerminalLatch {
    status: Option<Status>,
    error: Option<Error>,
}

impl TerminalLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a status. A later status replaces an earlier one.
    pub fn observe_status(&mut self, status: Status) {
        self.status = Some(status);
    }

    /// Records an error. Only the first error is kept.
    pub fn observe_error(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub fn has_status(&self) -> bool {
        self.status.is_some()
    }

    pub fn settle(self) -> Outcome {
        match (self.status, self.error) {
            (Some(status), error) => {
                if let Some(error) = error {
                    tracing::debug!(%error, %status, "status outranks transport error");
                }
                if status.is_ok() {
                    Outcome::Completed
                } else {
                    Outcome::StatusReceived(status)
                }
            }
            (None, Some(error)) => Outcome::Failed(error),
            (None, None) => Outcome::Completed,
        }
    }
}

/// Wraps an error that ended a stream so callers always see a mid-stream kind.
pub(crate) fn stream_failure(error: Error) -> Error {
    match error.kind() {
        ErrorKind::Transport | ErrorKind::Protocol => error,
        _ => Error::new(ErrorKind::Transport)
            .with_message("listen stream failed")
            .with_source(error),
    }
}

#[cfg(test)]
mod tests {
    use super::{Outcome, SubscriptionState, TerminalLatch, stream_failure};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::status::{Code, Status};

    fn reset() -> Error {
        Error::new(ErrorKind::Transport).with_message("connection reset")
    }

    #[test]
    fn only_active_is_non_terminal() {
        assert!(!SubscriptionState::Active.is_terminal());
        assert!(SubscriptionState::Completed.is_terminal());
        assert!(SubscriptionState::Failed.is_terminal());
        assert!(SubscriptionState::Cancelled.is_terminal());
    }

    #[test]
    fn empty_latch_settles_as_completed() {
        assert!(matches!(TerminalLatch::new().settle(), Outcome::Completed));
    }

    #[test]
    fn error_alone_settles_as_failed() {
        let mut latch = TerminalLatch::new();
        latch.observe_error(reset());
        match latch.settle() {
            Outcome::Failed(err) => assert_eq!(err.message(), Some("connection reset")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn status_outranks_error_in_either_order() {
        let mut latch = TerminalLatch::new();
        latch.observe_error(reset());
        latch.observe_status(Status::new(Code::Unavailable, "shutting down"));
        assert!(matches!(latch.settle(), Outcome::StatusReceived(s) if s.code == Code::Unavailable));

        let mut latch = TerminalLatch::new();
        latch.observe_status(Status::new(Code::PermissionDenied, ""));
        latch.observe_error(reset());
        assert!(
            matches!(latch.settle(), Outcome::StatusReceived(s) if s.code == Code::PermissionDenied)
        );
    }

    #[test]
    fn ok_status_is_graceful_completion() {
        let mut latch = TerminalLatch::new();
        latch.observe_status(Status::new(Code::Ok, ""));
        latch.observe_error(reset());
        assert!(matches!(latch.settle(), Outcome::Completed));
    }

    #[test]
    fn outcome_states_and_results() {
        assert_eq!(Outcome::Completed.state(), SubscriptionState::Completed);
        assert_eq!(Outcome::Cancelled.state(), SubscriptionState::Cancelled);
        assert_eq!(Outcome::Failed(reset()).state(), SubscriptionState::Failed);
        let status = Outcome::StatusReceived(Status::new(Code::InvalidArgument, "bad"));
        assert_eq!(status.state(), SubscriptionState::Failed);
        assert_eq!(
            status.into_result().expect_err("status").kind(),
            ErrorKind::Status
        );
        assert!(Outcome::Cancelled.into_result().is_ok());
    }

    #[test]
    fn stream_failure_keeps_mid_stream_kinds() {
        assert_eq!(stream_failure(reset()).kind(), ErrorKind::Transport);
        let protocol = Error::new(ErrorKind::Protocol);
        assert_eq!(stream_failure(protocol).kind(), ErrorKind::Protocol);
        let other = Error::new(ErrorKind::Internal);
        assert_eq!(stream_failure(other).kind(), ErrorKind::Transport);
    }
}
