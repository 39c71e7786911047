use teloxide::RequestError;
use thiserror::Error;

use crate::navigation::PayloadError;

/// Failures that end a conversation on the error screen.
#[derive(Debug, Error)]
pub enum FlowError {
  #[error("activity is unavailable")]
  Unavailable,
  #[error("action is not permitted")]
  Forbidden,
  #[error("session timed out")]
  Timeout,
  #[error(transparent)]
  Payload(#[from] PayloadError),
  #[error(transparent)]
  Storage(#[from] anyhow::Error),
  #[error(transparent)]
  Telegram(#[from] RequestError),
}

/// Error screen variants shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Unknown,
  Timeout,
  Unavailable,
  Forbidden,
  ServerSide,
}

impl FlowError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Unavailable => ErrorKind::Unavailable,
      Self::Forbidden => ErrorKind::Forbidden,
      Self::Timeout => ErrorKind::Timeout,
      Self::Payload(_) => ErrorKind::Unknown,
      Self::Storage(_) | Self::Telegram(_) => ErrorKind::ServerSide,
    }
  }
}
