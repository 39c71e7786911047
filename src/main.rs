mod app;
mod booking;
mod bot;
mod config;
mod db;
mod error;
mod models;
mod navigation;
mod telemetry;
mod util;

use anyhow::Result;
use teloxide::prelude::Bot;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
  telemetry::init()?;
  let config = config::Config::from_env()?;
  let settings = config.settings.clone();
  info!(
    admin_count = config.admins.len(),
    booking_admin_chat = ?settings.booking_admin_chat,
    max_per_user = settings.limits.max_per_user,
    auto_confirm_limit = settings.limits.auto_confirm_limit,
    "starting bot"
  );

  let bot = Bot::new(config.bot_token.clone());
  let windows = db::ActivityWindows {
    actual_hours: settings.actual_interval_hours,
    service_hours: settings.service_interval_hours,
  };
  let db = db::Db::connect(&config.database_url, windows).await?;
  let app = app::App::new(bot, db, config.admins, settings);
  app.run().await
}
