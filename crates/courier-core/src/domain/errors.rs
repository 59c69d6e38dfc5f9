//! Handler errors and their retry classification.

use std::error::Error;
use std::fmt;

/// ErrorKind tells the broker what to do with a failed task.
///
/// - Retryable: redeliver with backoff until the retry ceiling
/// - SkipRetry: archive now; redelivery can never succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Retryable,
    SkipRetry,
}

/// Error returned by a task handler.
///
/// Plain errors are retryable. Use [`HandlerError::skip_retry`] for failures
/// that will not change on redelivery, e.g. a payload that cannot decode.
#[derive(Debug)]
pub struct HandlerError {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Retryable,
            message: message.into(),
            source: None,
        }
    }

    pub fn skip_retry(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::SkipRetry,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Retryable
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Retryable => f.write_str(&self.message),
            ErrorKind::SkipRetry => write!(f, "{}: skip retry for the task", self.message),
        }
    }
}

impl Error for HandlerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn Error + 'static))
    }
}
