use chrono::DateTime;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

static DIGITS_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").expect("valid regex"));

/// Reads a typed seat count: every digit in the text is kept, no digits means zero.
pub fn parse_typed_quantity(input: &str) -> i32 {
  let digits: String = DIGITS_PATTERN.find_iter(input).map(|m| m.as_str()).collect();
  if digits.is_empty() {
    return 0;
  }
  digits.parse::<i32>().unwrap_or(i32::MAX)
}

pub fn format_date(moment: &DateTime<Utc>) -> String {
  moment.format("%d/%m/%Y").to_string()
}

pub fn format_time(moment: &DateTime<Utc>) -> String {
  moment.format("%H:%M").to_string()
}

pub fn format_showtime(moment: &DateTime<Utc>) -> String {
  moment.format("%d/%m/%Y %H:%M").to_string()
}

/// Link opening a chat with the user: by username when known, by id otherwise.
pub fn user_link(user_id: i64, username: Option<&str>) -> String {
  match username {
    Some(name) if !name.is_empty() => format!("https://t.me/{name}"),
    _ => format!("tg://user?id={user_id}"),
  }
}
