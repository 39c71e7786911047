use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Filter applied to activity queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListMode {
  /// Open for registration and not yet over.
  Announce,
  /// Same window as `Announce`, narrowed to the viewer's own bookings by the caller.
  MyBooking,
  /// Admin maintenance window, registration opening ignored.
  Service,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRow {
  pub activity_id: i64,
  pub title: String,
  pub announce: Option<String>,
  pub info: Option<String>,
  pub showtime: DateTime<Utc>,
  pub place_title: String,
  pub place_info: Option<String>,
  pub addr: Option<String>,
  pub maplink: Option<String>,
  /// Capacity minus every committed booking, negative when force-confirmed past capacity.
  pub left_places: i32,
  /// Places held by the viewer.
  pub quantity: i32,
  pub redeemed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrantRow {
  pub client_id: i64,
  pub specname: Option<String>,
  pub username: Option<String>,
  pub quantity: i32,
  pub num_changes: i32,
  pub redeemed: bool,
}
