use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use teloxide::types::MessageId;

use crate::models::ListMode;
use crate::navigation::HistoryStack;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum ConversationState {
  /// No conversation; the next update starts one.
  #[default]
  Idle,
  /// Waiting for the display name of a new user.
  FirstMet { prompt: Option<MessageId> },
  Menu(Session),
}

/// Per-chat context carried between menu screens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
  pub user_id: i64,
  pub specname: String,
  pub username: Option<String>,
  pub evfilter: Option<ListMode>,
  pub pending: Option<PendingBooking>,
  pub last_messages: Vec<MessageId>,
  pub history: HistoryStack,
  pub last_seen: DateTime<Utc>,
}

/// Parameters confirmed on the booking confirmation screen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingBooking {
  pub activity_id: i64,
  pub quantity: i32,
}

impl Session {
  pub fn new(user_id: i64, specname: String, username: Option<String>, now: DateTime<Utc>) -> Self {
    Self {
      user_id,
      specname,
      username,
      evfilter: None,
      pending: None,
      last_messages: Vec::new(),
      history: HistoryStack::new(),
      last_seen: now,
    }
  }

  pub fn is_expired(&self, now: DateTime<Utc>, timeout_secs: i64) -> bool {
    now - self.last_seen > Duration::seconds(timeout_secs)
  }

  pub fn touch(&mut self, now: DateTime<Utc>) {
    self.last_seen = now;
  }

  pub fn list_mode(&self) -> ListMode {
    self.evfilter.unwrap_or(ListMode::Announce)
  }

  /// Hands out the messages of the current screen so they can be deleted.
  pub fn take_messages(&mut self) -> Vec<MessageId> {
    std::mem::take(&mut self.last_messages)
  }
}

/// Messages of the name question and answer, removed once the name is stored.
pub fn name_exchange(prompt: Option<MessageId>, reply: MessageId) -> Vec<MessageId> {
  prompt.into_iter().chain(std::iter::once(reply)).collect()
}

#[cfg(test)]
mod tests {
  use chrono::Duration;
  use chrono::Utc;
  use teloxide::types::MessageId;

  use super::Session;
  use super::name_exchange;
  use crate::models::ListMode;

  #[test]
  fn new_session_starts_at_root() {
    let session = Session::new(1, "Ann".to_string(), None, Utc::now());
    assert_eq!(session.history.len(), 1);
    assert!(session.pending.is_none());
    assert_eq!(session.list_mode(), ListMode::Announce);
  }

  #[test]
  fn expires_after_timeout() {
    let start = Utc::now();
    let mut session = Session::new(1, "Ann".to_string(), None, start);
    assert!(!session.is_expired(start + Duration::seconds(60), 120));
    assert!(session.is_expired(start + Duration::seconds(121), 120));
    session.touch(start + Duration::seconds(121));
    assert!(!session.is_expired(start + Duration::seconds(200), 120));
  }

  #[test]
  fn taking_messages_clears_them() {
    let mut session = Session::new(1, "Ann".to_string(), None, Utc::now());
    session.last_messages = vec![MessageId(3), MessageId(4)];
    assert_eq!(session.take_messages(), vec![MessageId(3), MessageId(4)]);
    assert!(session.last_messages.is_empty());
  }

  #[test]
  fn name_exchange_includes_reply() {
    assert_eq!(name_exchange(Some(MessageId(5)), MessageId(6)), vec![MessageId(5), MessageId(6)]);
    assert_eq!(name_exchange(None, MessageId(6)), vec![MessageId(6)]);
  }
}
