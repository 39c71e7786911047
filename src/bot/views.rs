use teloxide::types::InlineKeyboardButton;
use teloxide::types::InlineKeyboardMarkup;
use teloxide::utils::markdown;

use crate::booking::AdminRequest;
use crate::booking::AdminVerdict;
use crate::booking::BookingOutcome;
use crate::booking::QuantityChoice;
use crate::error::ErrorKind;
use crate::models::ActivityRow;
use crate::models::ListMode;
use crate::models::RegistrantRow;
use crate::navigation::Button;
use crate::navigation::HistoryStack;
use crate::util::format_date;
use crate::util::format_showtime;
use crate::util::format_time;
use crate::util::user_link;

pub const FIRST_MET_TEXT: &str = "👋 Hi! I'm the booking assistant. How should I call you? Send me your name.";
pub const ABOUT_TEXT: &str = "ℹ️ I keep the schedule of upcoming activities. Pick one from the list, book places for \
                              you and your friends, show your ticket at the entrance or cancel when plans change.";
pub const GOODBYE_TEXT: &str = "👋 See you soon! Send any message when you need me again.";

/// Text and keyboard of one outgoing message.
#[derive(Debug, Clone)]
pub struct Screen {
  pub text: String,
  pub keyboard: Option<InlineKeyboardMarkup>,
  pub markdown: bool,
}

impl Screen {
  pub fn plain(text: impl Into<String>) -> Self {
    Self {
      text: text.into(),
      keyboard: None,
      markdown: false,
    }
  }

  /// MarkdownV2 text; every piece of it must already be escaped.
  fn card(text: String) -> Self {
    Self {
      text,
      keyboard: None,
      markdown: true,
    }
  }

  fn with_rows(mut self, rows: Vec<Vec<InlineKeyboardButton>>) -> Self {
    let rows: Vec<Vec<InlineKeyboardButton>> = rows.into_iter().filter(|row| !row.is_empty()).collect();
    if !rows.is_empty() {
      self.keyboard = Some(InlineKeyboardMarkup::new(rows));
    }
    self
  }
}

fn button(label: impl Into<String>, payload: impl Into<String>) -> InlineKeyboardButton {
  InlineKeyboardButton::callback(label, payload)
}

fn main_menu_row() -> Vec<InlineKeyboardButton> {
  vec![button("🏠 Main menu", Button::Main.as_str())]
}

fn back_row(history: &HistoryStack, steps: usize) -> Vec<InlineKeyboardButton> {
  vec![button("⬅️ Back", history.back_payload(steps))]
}

/// Escaped MarkdownV2 card: bold first line, then each non-empty line.
fn card_text<'a>(title: &str, lines: impl IntoIterator<Item = Option<&'a str>>) -> String {
  let mut text = markdown::bold(&markdown::escape(title));
  for line in lines.into_iter().flatten() {
    let line = line.trim();
    if !line.is_empty() {
      text.push('\n');
      text.push_str(&markdown::escape(line));
    }
  }
  text
}

fn places_line(left_places: i32) -> String {
  if left_places > 0 {
    format!("🎟 Places left: {left_places}")
  } else {
    "🚫 No places left".to_string()
  }
}

fn when_where(activity: &ActivityRow) -> String {
  format!("{}, {}", format_showtime(&activity.showtime), activity.place_title)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Greeting {
  NewUser,
  Returning,
  Again,
}

pub fn main_menu(specname: &str, greeting: Greeting, is_admin: bool) -> Screen {
  let text = match greeting {
    Greeting::NewUser => format!("Nice to meet you, {specname}! What would you like to do?"),
    Greeting::Returning => format!("Welcome back, {specname}! What would you like to do?"),
    Greeting::Again => "What else can I do for you?".to_string(),
  };
  let mut rows = vec![
    vec![button("📅 Upcoming activities", Button::Announce.as_str())],
    vec![button("🎟 My bookings", Button::MyBooking.as_str())],
  ];
  if is_admin {
    rows.push(vec![button("🛠 Service", Button::Service.as_str())]);
  }
  rows.push(vec![button("ℹ️ About", Button::About.as_str())]);
  rows.push(vec![button("👋 Goodbye", Button::Goodbye.as_str())]);
  Screen::plain(text).with_rows(rows)
}

pub fn about() -> Screen {
  Screen::plain(ABOUT_TEXT).with_rows(vec![main_menu_row()])
}

/// Header above the activity cards. `any_announced` tells whether the public listing has anything at all.
pub fn list_header(mode: ListMode, shown: usize, any_announced: bool, related_channel: Option<&str>) -> Screen {
  match mode {
    ListMode::Announce if shown > 0 => Screen::plain("📅 Here is what's coming up. Tap a card for details or to book."),
    ListMode::Announce => {
      let mut text = "📭 Nothing is announced right now, or all places are taken.".to_string();
      if let Some(channel) = related_channel {
        text.push_str(&format!("\nFollow the news in our channel: {channel}"));
      }
      Screen::plain(text).with_rows(vec![main_menu_row()])
    },
    ListMode::MyBooking if shown > 0 => Screen::plain("🎟 These are the activities you have booked."),
    ListMode::MyBooking if any_announced => Screen::plain("🎟 You have no bookings yet.").with_rows(vec![
      vec![button("📅 Upcoming activities", Button::Announce.as_str())],
      main_menu_row(),
    ]),
    ListMode::MyBooking => Screen::plain("🎟 You have no bookings, and nothing is announced right now.")
      .with_rows(vec![main_menu_row()]),
    ListMode::Service if shown > 0 => Screen::plain("🛠 Activities in the service window:"),
    ListMode::Service => Screen::plain("🛠 No activities to maintain.").with_rows(vec![main_menu_row()]),
  }
}

pub fn activity_list_card(activity: &ActivityRow, is_last: bool) -> Screen {
  let places = places_line(activity.left_places);
  let text = card_text(
    &activity.title,
    [
      Some(when_where(activity).as_str()),
      activity.announce.as_deref(),
      Some(places.as_str()),
    ],
  );
  let book_label = if activity.quantity > 0 {
    "✏️ Change booking"
  } else {
    "✅ Book"
  };
  let mut rows = vec![vec![
    button("🔎 More", Button::More.with(activity.activity_id)),
    button(book_label, Button::Book.with(activity.activity_id)),
  ]];
  if is_last {
    rows.push(main_menu_row());
  }
  Screen::card(text).with_rows(rows)
}

pub fn service_card(activity: &ActivityRow, is_last: bool) -> Screen {
  let text = card_text(
    &activity.title,
    [Some(when_where(activity).as_str()), Some(places_line(activity.left_places).as_str())],
  );
  let mut rows = vec![vec![
    button("👥 Registrants", Button::Visitors.with(activity.activity_id)),
    button("🔔 Remind", Button::Remind.with(activity.activity_id)),
  ]];
  if is_last {
    rows.push(main_menu_row());
  }
  Screen::card(text).with_rows(rows)
}

pub fn activity_info(activity: &ActivityRow, history: &HistoryStack) -> Screen {
  let places = places_line(activity.left_places);
  let booked = (activity.quantity > 0).then(|| format!("✅ You booked: {}", activity.quantity));
  let text = card_text(
    &activity.title,
    [
      Some(when_where(activity).as_str()),
      activity.addr.as_deref(),
      activity.info.as_deref(),
      Some(places.as_str()),
      booked.as_deref(),
    ],
  );
  let book_label = if activity.quantity > 0 {
    "✏️ Change booking"
  } else {
    "✅ Book"
  };
  let mut rows = vec![
    vec![button(book_label, Button::Book.with(activity.activity_id))],
    vec![button("🗺 Where is it", Button::ShowMap.with(activity.activity_id))],
  ];
  if activity.quantity > 0 {
    rows.push(vec![button("🎫 Ticket", Button::ShowTicket.with(activity.activity_id))]);
  }
  rows.push(back_row(history, 1));
  rows.push(main_menu_row());
  Screen::card(text).with_rows(rows)
}

pub fn place_card(activity: &ActivityRow, history: &HistoryStack) -> Screen {
  let map = activity.maplink.as_deref().map(|link| format!("🗺 Map: {link}"));
  let text = card_text(
    &activity.place_title,
    [activity.place_info.as_deref(), activity.addr.as_deref(), map.as_deref()],
  );
  Screen::card(text).with_rows(vec![back_row(history, 1), main_menu_row()])
}

pub fn ticket(activity: &ActivityRow, link: &str, history: &HistoryStack) -> Screen {
  let text = format!(
    "🎫 Ticket for {} on {} at {}\nPlaces: {}\n\nShow this link to the host at the entrance:\n{}",
    activity.title,
    format_date(&activity.showtime),
    format_time(&activity.showtime),
    activity.quantity,
    link,
  );
  Screen::plain(text).with_rows(vec![back_row(history, 1), main_menu_row()])
}

pub fn booking_sheet(activity: &ActivityRow, specname: &str, choice: &QuantityChoice, history: &HistoryStack) -> Screen {
  let mut text = if activity.quantity > 0 {
    format!(
      "{specname}, you are booked for {} on {} at {}, {}.",
      activity.title,
      format_date(&activity.showtime),
      format_time(&activity.showtime),
      activity.place_title,
    )
  } else {
    format!(
      "{specname}, booking {} on {} at {}, {}.",
      activity.title,
      format_date(&activity.showtime),
      format_time(&activity.showtime),
      activity.place_title,
    )
  };
  text.push(' ');
  text.push_str(&match activity.left_places {
    n if n <= 0 => "No places are left.".to_string(),
    1 => "Only one place is left.".to_string(),
    n => format!("{n} places are left."),
  });
  if activity.quantity > 0 {
    text.push_str(&format!("\nYou hold {} place(s).", activity.quantity));
    text.push_str("\nPick a new number of places, type it, or cancel the booking.");
  } else if !matches!(choice, QuantityChoice::Nothing) {
    text.push_str("\nHow many places? Pick a number or type it.");
  }

  let quantity_row = match choice {
    QuantityChoice::Nothing => vec![],
    QuantityChoice::SingleSeat => vec![button("✅ Book one place", Button::BookConfirm.with(1))],
    QuantityChoice::Range(options) => options
      .iter()
      .map(|n| button(n.to_string(), Button::BookConfirm.with(n)))
      .collect(),
  };
  let cancel_row = if activity.quantity > 0 {
    vec![button("❌ Cancel booking", Button::BookConfirm.with(0))]
  } else {
    vec![]
  };
  Screen::plain(text).with_rows(vec![quantity_row, cancel_row, back_row(history, 1), main_menu_row()])
}

pub fn booking_confirm(activity: &ActivityRow, specname: &str, quantity: i32, history: &HistoryStack) -> Screen {
  let when = format!(
    "{} on {} at {}",
    activity.title,
    format_date(&activity.showtime),
    format_time(&activity.showtime)
  );
  let text = match quantity {
    0 => format!("{specname}, cancel your booking for {when}?"),
    1 => format!("{specname}, book one place for {when}?"),
    n => format!("{specname}, book {n} places for {when}?"),
  };
  Screen::plain(text).with_rows(vec![
    vec![
      button("✅ Yes", Button::BookAccept.as_str()),
      button("✖️ No", history.back_payload(1)),
    ],
    main_menu_row(),
  ])
}

pub fn booking_result(outcome: &BookingOutcome, history: &HistoryStack) -> Screen {
  let text = match outcome {
    BookingOutcome::Booked { quantity } => format!("🎉 Done! You have {quantity} place(s) booked."),
    BookingOutcome::Cancelled => "Your booking is cancelled.".to_string(),
    BookingOutcome::AwaitingAdmin { quantity, .. } => {
      format!("📨 Booking {quantity} places needs the host's approval. I'll message you once they decide.")
    },
    BookingOutcome::NoPlaces => "😔 Sorry, there are not enough free places.".to_string(),
    BookingOutcome::NoLongerAvailable => {
      "😔 Sorry, these places are no longer available. Someone booked them a moment ago.".to_string()
    },
  };
  Screen::plain(text).with_rows(vec![back_row(history, 3), main_menu_row()])
}

pub fn admin_request(activity: &ActivityRow, specname: &str, username: Option<&str>, request: AdminRequest) -> Screen {
  let text = format!(
    "📨 {specname} asks for {} places for {} on {} at {}.\nChat: {}",
    request.quantity.unwrap_or_default(),
    activity.title,
    format_date(&activity.showtime),
    format_time(&activity.showtime),
    user_link(request.client_id, username),
  );
  Screen::plain(text).with_rows(vec![vec![
    button(
      "✅ Accept",
      Button::AdminConfirmBook.with(request.with_verdict(AdminVerdict::Accept)),
    ),
    button(
      "✖️ Decline",
      Button::AdminConfirmBook.with(AdminRequest::decline(request.client_id)),
    ),
  ]])
}

pub fn admin_force(activity: &ActivityRow, overbook: i32, request: AdminRequest) -> Screen {
  let text = format!(
    "⚠️ Accepting this request overbooks {} on {} at {} by {} place(s). Confirm anyway?",
    activity.title,
    format_date(&activity.showtime),
    format_time(&activity.showtime),
    overbook,
  );
  Screen::plain(text).with_rows(vec![vec![
    button(
      "✅ Confirm",
      Button::AdminConfirmBook.with(request.with_verdict(AdminVerdict::Force)),
    ),
    button(
      "✖️ Decline",
      Button::AdminConfirmBook.with(AdminRequest::decline(request.client_id)),
    ),
  ]])
}

pub fn admin_declined(client_id: i64) -> Screen {
  Screen::plain(format!("✖️ Request of client {client_id} declined."))
}

pub fn admin_registered(client_id: i64, quantity: i32) -> Screen {
  Screen::plain(format!("✅ Client {client_id} is registered for {quantity} place(s)."))
}

pub fn admin_response_text(accepted: bool) -> &'static str {
  if accepted {
    "✅ The host approved your booking."
  } else {
    "✖️ The host could not approve your booking."
  }
}

pub fn ticket_info(activity: &ActivityRow) -> String {
  let mut text = format!(
    "🎫 {} place(s) for {} on {} at {}.",
    activity.quantity,
    activity.title,
    format_date(&activity.showtime),
    format_time(&activity.showtime),
  );
  if activity.redeemed {
    text.push_str("\n⚠️ This ticket was already redeemed.");
  }
  text
}

pub fn registrants(activity: &ActivityRow, rows: &[RegistrantRow], history: &HistoryStack) -> Screen {
  let mut text = format!("👥 {} on {}\n", activity.title, format_showtime(&activity.showtime));
  if rows.is_empty() {
    text.push_str("Nobody has booked yet.");
  } else {
    let total: i32 = rows.iter().map(|row| row.quantity).sum();
    text.push_str(&format!("{} registrant(s), {} place(s):\n", rows.len(), total));
    for row in rows {
      let name = row.specname.as_deref().unwrap_or("?");
      let handle = row
        .username
        .as_deref()
        .map(|username| format!(" @{username}"))
        .unwrap_or_default();
      let redeemed = if row.redeemed { " ✔️" } else { "" };
      text.push_str(&format!(
        "\n• {name}{handle}: {} place(s), {} change(s){redeemed}",
        row.quantity, row.num_changes
      ));
    }
  }
  Screen::plain(text).with_rows(vec![back_row(history, 1), main_menu_row()])
}

pub fn reminder_text(activity: &ActivityRow) -> String {
  let mut text = format!(
    "🔔 Reminder: you are booked for {}, starting {} at {}, {}.",
    activity.title,
    format_date(&activity.showtime),
    format_time(&activity.showtime),
    activity.place_title,
  );
  if let Some(addr) = activity.addr.as_deref() {
    text.push_str(&format!("\nAddress: {addr}"));
  }
  text.push_str("\nSee you there!");
  text
}

pub fn reminder_report(delivered: usize, total: usize, history: &HistoryStack) -> Screen {
  Screen::plain(format!("🔔 Reminders delivered: {delivered} of {total}."))
    .with_rows(vec![back_row(history, 1), main_menu_row()])
}

pub fn error_text(kind: ErrorKind) -> &'static str {
  match kind {
    ErrorKind::Unknown => "🤔 Something went wrong. Send any message to start over.",
    ErrorKind::Timeout => "⌛ The session has expired. Send any message to start over.",
    ErrorKind::Unavailable => "😔 This activity is no longer available. Send any message to start over.",
    ErrorKind::Forbidden => "⛔ This action is not available. Send any message to start over.",
    ErrorKind::ServerSide => "⚠️ I could not save your request. Please try again later.",
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use teloxide::types::InlineKeyboardButtonKind;

  use super::Greeting;
  use super::activity_info;
  use super::booking_result;
  use super::booking_sheet;
  use super::main_menu;
  use crate::booking::BookingOutcome;
  use crate::booking::QuantityChoice;
  use crate::models::ActivityRow;
  use crate::navigation::HistoryStack;
  use crate::navigation::NavigationStep;

  fn activity(left_places: i32, quantity: i32) -> ActivityRow {
    ActivityRow {
      activity_id: 8,
      title: "Night walk".to_string(),
      announce: Some("Lanterns provided.".to_string()),
      info: None,
      showtime: Utc::now(),
      place_title: "Old town".to_string(),
      place_info: None,
      addr: Some("1 Main st.".to_string()),
      maplink: None,
      left_places,
      quantity,
      redeemed: false,
    }
  }

  fn payloads(screen: &super::Screen) -> Vec<String> {
    screen
      .keyboard
      .iter()
      .flat_map(|kbd| kbd.inline_keyboard.iter().flatten())
      .filter_map(|button| match &button.kind {
        InlineKeyboardButtonKind::CallbackData(data) => Some(data.clone()),
        _ => None,
      })
      .collect()
  }

  fn history(payloads: &[&str]) -> HistoryStack {
    let mut history = HistoryStack::new();
    for payload in payloads {
      history.apply(NavigationStep::parse(payload).unwrap());
    }
    history
  }

  #[test]
  fn service_button_only_for_admins() {
    assert!(payloads(&main_menu("Ann", Greeting::Returning, true)).contains(&"service".to_string()));
    assert!(!payloads(&main_menu("Ann", Greeting::Returning, false)).contains(&"service".to_string()));
  }

  #[test]
  fn ticket_button_only_when_booked() {
    let history = history(&["announce", "more:8"]);
    assert!(!payloads(&activity_info(&activity(3, 0), &history)).contains(&"showticket:8".to_string()));
    let booked = payloads(&activity_info(&activity(3, 2), &history));
    assert!(booked.contains(&"showticket:8".to_string()));
    assert!(booked.contains(&"announce:back".to_string()));
  }

  #[test]
  fn booking_sheet_offers_cancel_for_holders() {
    let history = history(&["mybooking", "more:8", "book:8"]);
    let screen = booking_sheet(&activity(0, 1), "Ann", &QuantityChoice::Nothing, &history);
    let payloads = payloads(&screen);
    assert!(payloads.contains(&"confirm_book:0".to_string()));
    assert!(payloads.contains(&"more:back".to_string()));
    assert!(!payloads.iter().any(|p| p == "confirm_book:1"));
  }

  #[test]
  fn result_back_button_skips_booking_steps() {
    let history = history(&["announce", "more:8", "book:8", "confirm_book:2", "accept_book"]);
    let screen = booking_result(&BookingOutcome::Booked { quantity: 2 }, &history);
    assert!(payloads(&screen).contains(&"more:back3".to_string()));
  }

  #[test]
  fn cards_escape_markdown() {
    let history = history(&["announce", "more:8"]);
    let screen = activity_info(&activity(3, 0), &history);
    assert!(screen.markdown);
    assert!(screen.text.contains("1 Main st\\."));
  }
}
