//! Purpose: Single structured error type shared by the client, transport, and CLI.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Builder-style error carrying kind, message, hint, status, and source chain.
//! Invariants: Kinds are stable; exit codes derived from kinds never change meaning.
use super::status::Status;
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Connection,
    Transport,
    Protocol,
    Status,
    SubscriptionClosed,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    status: Option<Status>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            status: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Error returned when a terminated subscription is consumed again.
    pub fn subscription_closed() -> Self {
        Self::new(ErrorKind::SubscriptionClosed)
            .with_message("subscription already delivered its terminal notification")
    }

    /// Converts an explicit service status into an error of kind `Status`.
    pub fn from_status(status: Status) -> Self {
        let message = if status.message.is_empty() {
            format!("service returned status {}", status.code)
        } else {
            format!("service returned status {}: {}", status.code, status.message)
        };
        Self::new(ErrorKind::Status)
            .with_message(message)
            .with_status(status)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(status) = &self.status {
            write!(f, " (status: {})", status.code)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Connection => 3,
        ErrorKind::Transport => 4,
        ErrorKind::Protocol => 5,
        ErrorKind::Status => 6,
        ErrorKind::SubscriptionClosed => 7,
        ErrorKind::Io => 8,
    }
}
