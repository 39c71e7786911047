use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

static BACK_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^back(\d*)").expect("valid regex"));

/// Callback-button names understood by the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Button {
  Error,
  Main,
  Announce,
  MyBooking,
  Service,
  About,
  Goodbye,
  More,
  Book,
  ShowMap,
  ShowTicket,
  BookConfirm,
  BookAccept,
  AdminConfirmBook,
  Visitors,
  Remind,
}

impl Button {
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Error => "error",
      Self::Main => "main",
      Self::Announce => "announce",
      Self::MyBooking => "mybooking",
      Self::Service => "service",
      Self::About => "about",
      Self::Goodbye => "goodbye",
      Self::More => "more",
      Self::Book => "book",
      Self::ShowMap => "showmap",
      Self::ShowTicket => "showticket",
      Self::BookConfirm => "confirm_book",
      Self::BookAccept => "accept_book",
      Self::AdminConfirmBook => "admin_confirm_book",
      Self::Visitors => "visitors",
      Self::Remind => "remind",
    }
  }

  /// Builds a `name:value` callback payload.
  pub fn with(self, value: impl fmt::Display) -> String {
    format!("{}:{}", self.as_str(), value)
  }
}

impl fmt::Display for Button {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Button {
  type Err = PayloadError;

  fn from_str(name: &str) -> Result<Self, Self::Err> {
    let button = match name {
      "error" => Self::Error,
      "main" => Self::Main,
      "announce" => Self::Announce,
      "mybooking" => Self::MyBooking,
      "service" => Self::Service,
      "about" => Self::About,
      "goodbye" => Self::Goodbye,
      "more" => Self::More,
      "book" => Self::Book,
      "showmap" => Self::ShowMap,
      "showticket" => Self::ShowTicket,
      "confirm_book" => Self::BookConfirm,
      "accept_book" => Self::BookAccept,
      "admin_confirm_book" => Self::AdminConfirmBook,
      "visitors" => Self::Visitors,
      "remind" => Self::Remind,
      other => return Err(PayloadError::UnknownButton(other.to_string())),
    };
    Ok(button)
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
  #[error("unknown button `{0}`")]
  UnknownButton(String),
  #[error("malformed payload value `{0}`")]
  MalformedValue(String),
}

/// One recorded user action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationStep {
  pub button: Button,
  pub value: Option<String>,
}

impl NavigationStep {
  pub fn new(button: Button, value: Option<String>) -> Self {
    Self { button, value }
  }

  pub fn root() -> Self {
    Self::new(Button::Main, None)
  }

  /// Parses the `<button-name>:<value>` wire format. An empty value is treated as absent.
  pub fn parse(payload: &str) -> Result<Self, PayloadError> {
    let (name, value) = match payload.split_once(':') {
      Some((name, value)) => (name, Some(value)),
      None => (payload, None),
    };
    let button = name.trim().parse::<Button>()?;
    let value = value.filter(|v| !v.is_empty()).map(str::to_string);
    Ok(Self { button, value })
  }

  /// Number of entries to unwind when the value carries the back marker.
  pub fn back_steps(&self) -> Option<usize> {
    let value = self.value.as_deref()?;
    let captures = BACK_PATTERN.captures(value)?;
    let digits = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    if digits.is_empty() {
      return Some(1);
    }
    Some(digits.parse::<usize>().unwrap_or(usize::MAX))
  }

  pub fn value_as<T: FromStr>(&self) -> Option<T> {
    self.value.as_deref().and_then(|value| value.trim().parse::<T>().ok())
  }

  /// Like `value_as`, but a missing or unparsable value is a payload error.
  pub fn required_value<T: FromStr>(&self) -> Result<T, PayloadError> {
    self
      .value_as::<T>()
      .ok_or_else(|| PayloadError::MalformedValue(self.to_string()))
  }
}

impl fmt::Display for NavigationStep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.value {
      Some(value) => write!(f, "{}:{}", self.button, value),
      None => write!(f, "{}", self.button),
    }
  }
}

/// How a step changed the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
  Forward,
  Back(usize),
  Reset,
}

/// Path taken through the menu tree. The first entry is always the main-menu root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStack {
  steps: Vec<NavigationStep>,
}

impl Default for HistoryStack {
  fn default() -> Self {
    Self::new()
  }
}

impl HistoryStack {
  pub fn new() -> Self {
    Self {
      steps: vec![NavigationStep::root()],
    }
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn current(&self) -> &NavigationStep {
    // never empty: unwind and reset keep the root
    &self.steps[self.steps.len() - 1]
  }

  pub fn prev(&self) -> Option<&NavigationStep> {
    self.steps.len().checked_sub(2).map(|index| &self.steps[index])
  }

  /// Entry that becomes current after unwinding `steps` entries.
  pub fn back_target(&self, steps: usize) -> &NavigationStep {
    let index = self.steps.len().saturating_sub(steps + 1);
    &self.steps[index]
  }

  /// Payload of a button returning `steps` screens back.
  pub fn back_payload(&self, steps: usize) -> String {
    let target = self.back_target(steps);
    if steps == 1 {
      target.button.with("back")
    } else {
      target.button.with(format_args!("back{steps}"))
    }
  }

  pub fn push(&mut self, step: NavigationStep) {
    self.steps.push(step);
  }

  pub fn unwind(&mut self, steps: usize) {
    let keep = self.steps.len().saturating_sub(steps).max(1);
    self.steps.truncate(keep);
  }

  pub fn reset(&mut self) {
    self.steps.clear();
    self.steps.push(NavigationStep::root());
  }

  /// Applies a pressed button: back markers unwind, `main` resets, anything else is pushed.
  pub fn apply(&mut self, step: NavigationStep) -> Movement {
    if let Some(steps) = step.back_steps() {
      self.unwind(steps);
      return Movement::Back(steps);
    }
    if step.button == Button::Main {
      self.reset();
      return Movement::Reset;
    }
    self.push(step);
    Movement::Forward
  }
}

impl fmt::Display for HistoryStack {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let path: Vec<String> = self.steps.iter().map(ToString::to_string).collect();
    f.write_str(&path.join(" > "))
  }
}

#[cfg(test)]
mod tests {
  use super::Button;
  use super::HistoryStack;
  use super::Movement;
  use super::NavigationStep;
  use super::PayloadError;

  fn step(payload: &str) -> NavigationStep {
    NavigationStep::parse(payload).unwrap()
  }

  #[test]
  fn parses_payload_with_and_without_value() {
    let with_value = step("more:42");
    assert_eq!(with_value.button, Button::More);
    assert_eq!(with_value.value_as::<i64>(), Some(42));

    let bare = step("announce");
    assert_eq!(bare.button, Button::Announce);
    assert!(bare.value.is_none());

    let empty = step("main:");
    assert!(empty.value.is_none());
  }

  #[test]
  fn required_value_rejects_missing_or_garbled_ids() {
    assert_eq!(step("more:12").required_value::<i64>(), Ok(12));
    assert_eq!(
      step("more").required_value::<i64>(),
      Err(PayloadError::MalformedValue("more".to_string()))
    );
    assert_eq!(
      step("book:x1").required_value::<i64>(),
      Err(PayloadError::MalformedValue("book:x1".to_string()))
    );
  }

  #[test]
  fn rejects_unknown_button() {
    assert_eq!(
      NavigationStep::parse("bogus:1"),
      Err(PayloadError::UnknownButton("bogus".to_string()))
    );
  }

  #[test]
  fn back_marker_defaults_to_one_step() {
    assert_eq!(step("more:back").back_steps(), Some(1));
    assert_eq!(step("more:back3").back_steps(), Some(3));
    assert_eq!(step("more:7").back_steps(), None);
    assert_eq!(step("announce").back_steps(), None);
  }

  #[test]
  fn back_one_restores_history_before_last_forward_step() {
    let mut history = HistoryStack::new();
    for payload in ["announce", "more:5", "book:5"] {
      history.apply(step(payload));
    }
    let before = history.clone();
    history.apply(step("confirm_book:2"));
    assert_eq!(history.apply(step("book:back1")), Movement::Back(1));
    assert_eq!(history, before);
  }

  #[test]
  fn back_two_from_four_deep_keeps_root_and_one() {
    let mut history = HistoryStack::new();
    for payload in ["announce", "more:5", "showmap:5"] {
      history.apply(step(payload));
    }
    assert_eq!(history.len(), 4);
    history.apply(step("announce:back2"));
    assert_eq!(history.len(), 2);
    assert_eq!(history.current().button, Button::Announce);
  }

  #[test]
  fn unwinding_never_drops_the_root() {
    let mut history = HistoryStack::new();
    history.apply(step("announce"));
    history.apply(step("main:back9"));
    assert_eq!(history.len(), 1);
    assert_eq!(history.current(), &NavigationStep::root());
  }

  #[test]
  fn main_resets_to_single_entry() {
    let mut history = HistoryStack::new();
    for payload in ["mybooking", "more:1", "book:1", "confirm_book:1", "accept_book"] {
      history.apply(step(payload));
    }
    assert_eq!(history.apply(step("main")), Movement::Reset);
    assert_eq!(history.len(), 1);
    assert!(history.prev().is_none());
  }

  #[test]
  fn back_payload_names_the_target_screen() {
    let mut history = HistoryStack::new();
    for payload in ["announce", "more:5", "book:5", "confirm_book:1", "accept_book"] {
      history.apply(step(payload));
    }
    assert_eq!(history.back_payload(1), "confirm_book:back");
    assert_eq!(history.back_payload(3), "more:back3");

    let target = history.back_target(3).clone();
    let payload = history.back_payload(3);
    history.apply(step(&payload));
    assert_eq!(history.current(), &target);
    assert_eq!(history.current().value_as::<i64>(), Some(5));
  }
}
