use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
  /// Open the booking menu
  Start(String),
  /// Show the help text
  Help,
}

#[cfg(test)]
mod tests {
  use teloxide::utils::command::BotCommands;

  use super::Command;

  #[test]
  fn start_carries_deep_link_payload() {
    match Command::parse("/start 12_7", "booking_bot").unwrap() {
      Command::Start(payload) => assert_eq!(payload, "12_7"),
      other => panic!("unexpected command {other:?}"),
    }
    match Command::parse("/start", "booking_bot").unwrap() {
      Command::Start(payload) => assert!(payload.is_empty()),
      other => panic!("unexpected command {other:?}"),
    }
  }
}
