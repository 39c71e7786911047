use std::env;
use std::str::FromStr;

use anyhow::Context;
use anyhow::Result;

use crate::booking::BookingLimits;

const DEFAULT_MAX_BOOK_PER_USER: i32 = 4;
const DEFAULT_SESSION_TIMEOUT_SECS: i64 = 1800;
const DEFAULT_ACTUAL_INTERVAL_HOURS: i32 = 2;
const DEFAULT_SERVICE_INTERVAL_HOURS: i32 = 72;

#[derive(Debug, Clone)]
pub struct Config {
  pub bot_token: String,
  pub database_url: String,
  pub admins: Vec<i64>,
  pub settings: Settings,
}

/// Runtime knobs shared with the handlers.
#[derive(Debug, Clone)]
pub struct Settings {
  pub booking_admin_chat: Option<i64>,
  pub limits: BookingLimits,
  pub session_timeout_secs: i64,
  pub actual_interval_hours: i32,
  pub service_interval_hours: i32,
  pub related_channel: Option<String>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      booking_admin_chat: None,
      limits: BookingLimits {
        max_per_user: DEFAULT_MAX_BOOK_PER_USER,
        auto_confirm_limit: DEFAULT_MAX_BOOK_PER_USER,
      },
      session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
      actual_interval_hours: DEFAULT_ACTUAL_INTERVAL_HOURS,
      service_interval_hours: DEFAULT_SERVICE_INTERVAL_HOURS,
      related_channel: None,
    }
  }
}

impl Config {
  pub fn from_env() -> Result<Self> {
    let bot_token = env::var("BOT_TOKEN")
      .or_else(|_| env::var("TELOXIDE_TOKEN"))
      .context("BOT_TOKEN or TELOXIDE_TOKEN must be set")?;
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let admins_raw = env::var("ADMIN_IDS").unwrap_or_default();
    let admins = parse_admins(&admins_raw);

    let max_per_user = env_or("MAX_BOOK_PER_USER", DEFAULT_MAX_BOOK_PER_USER)?;
    let auto_confirm_limit = env_or("AUTO_CONFIRM_LIMIT", max_per_user)?;
    let booking_admin_chat = match env::var("BOOKING_ADMIN_CHAT_ID") {
      Ok(raw) => Some(
        raw
          .trim()
          .parse::<i64>()
          .context("BOOKING_ADMIN_CHAT_ID must be a chat id")?,
      ),
      Err(_) => admins.first().copied(),
    };
    let related_channel = env::var("RELATED_CHANNEL_URL")
      .ok()
      .map(|url| url.trim().to_string())
      .filter(|url| !url.is_empty());

    let settings = Settings {
      booking_admin_chat,
      limits: BookingLimits {
        max_per_user,
        auto_confirm_limit,
      },
      session_timeout_secs: env_or("SESSION_TIMEOUT_SECS", DEFAULT_SESSION_TIMEOUT_SECS)?,
      actual_interval_hours: env_or("ACTUAL_INTERVAL_HOURS", DEFAULT_ACTUAL_INTERVAL_HOURS)?,
      service_interval_hours: env_or("SERVICE_INTERVAL_HOURS", DEFAULT_SERVICE_INTERVAL_HOURS)?,
      related_channel,
    };

    Ok(Self {
      bot_token,
      database_url,
      admins,
      settings,
    })
  }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  match env::var(name) {
    Ok(raw) => parse_setting(name, &raw),
    Err(_) => Ok(default),
  }
}

fn parse_setting<T>(name: &str, raw: &str) -> Result<T>
where
  T: FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  raw
    .trim()
    .parse::<T>()
    .with_context(|| format!("{name} has invalid value `{raw}`"))
}

fn parse_admins(raw: &str) -> Vec<i64> {
  raw
    .split(',')
    .filter_map(|id| {
      let trimmed = id.trim();
      if trimmed.is_empty() {
        return None;
      }
      match trimmed.parse::<i64>() {
        Ok(value) => Some(value),
        Err(err) => {
          tracing::warn!(value = trimmed, error = %err, "invalid ADMIN_IDS entry");
          None
        },
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::Settings;
  use super::parse_admins;
  use super::parse_setting;

  #[test]
  fn parses_valid_admins() {
    let admins = parse_admins("1, 2 ,3");
    assert_eq!(admins, vec![1, 2, 3]);
  }

  #[test]
  fn skips_invalid_entries() {
    let admins = parse_admins("42,abc,  7");
    assert_eq!(admins, vec![42, 7]);
  }

  #[test]
  fn empty_input_yields_empty_list() {
    let admins = parse_admins("");
    assert!(admins.is_empty());
  }

  #[test]
  fn parses_numeric_settings() {
    assert_eq!(parse_setting::<i32>("MAX_BOOK_PER_USER", " 6 ").unwrap(), 6);
    let err = parse_setting::<i64>("SESSION_TIMEOUT_SECS", "soon").unwrap_err();
    assert!(err.to_string().contains("SESSION_TIMEOUT_SECS"));
  }

  #[test]
  fn defaults_auto_confirm_to_seat_cap() {
    let settings = Settings::default();
    assert_eq!(settings.limits.auto_confirm_limit, settings.limits.max_per_user);
  }
}
