//! Minimal channel-based logging used for diagnostics that must never block
//! or panic the caller: cache faults, ACME retries, fallback substitutions.

/// A single log line together with its severity.
pub struct LogMessage {
  message: String,
  is_error: bool,
}

impl LogMessage {
  pub fn new(message: String, is_error: bool) -> Self {
    LogMessage { message, is_error }
  }

  pub fn into_parts(self) -> (String, bool) {
    (self.message, self.is_error)
  }
}

/// Sends log messages to an optional receiver without ever blocking the
/// caller on a full channel or a missing subscriber.
pub struct ErrorLogger {
  sender: Option<async_channel::Sender<LogMessage>>,
}

impl ErrorLogger {
  pub fn new(sender: async_channel::Sender<LogMessage>) -> Self {
    Self { sender: Some(sender) }
  }

  /// A logger that discards every message, used in tests and when no
  /// diagnostic sink is configured.
  pub fn without_logger() -> Self {
    Self { sender: None }
  }

  pub async fn log(&self, message: &str) {
    if let Some(sender) = &self.sender {
      sender.send(LogMessage::new(message.to_string(), true)).await.unwrap_or_default();
    }
  }

  pub async fn info(&self, message: &str) {
    if let Some(sender) = &self.sender {
      sender.send(LogMessage::new(message.to_string(), false)).await.unwrap_or_default();
    }
  }
}

impl Clone for ErrorLogger {
  fn clone(&self) -> Self {
    Self {
      sender: self.sender.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn without_logger_discards_silently() {
    let logger = ErrorLogger::without_logger();
    logger.log("should not panic").await;
  }

  #[tokio::test]
  async fn log_forwards_message_with_error_flag() {
    let (tx, rx) = async_channel::bounded(1);
    let logger = ErrorLogger::new(tx);
    logger.log("boom").await;
    let (message, is_error) = rx.recv().await.unwrap().into_parts();
    assert_eq!(message, "boom");
    assert!(is_error);
  }
}
