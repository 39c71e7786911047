use std::collections::HashSet;

use crate::config::Settings;
use crate::db::Db;

#[derive(Clone)]
pub struct AppContext {
  db: Db,
  admins: HashSet<i64>,
  settings: Settings,
}

impl AppContext {
  pub fn new(db: Db, admins: Vec<i64>, settings: Settings) -> Self {
    Self {
      db,
      admins: admins.into_iter().collect(),
      settings,
    }
  }

  pub fn db(&self) -> &Db {
    &self.db
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn is_admin(&self, tg_id: i64) -> bool {
    self.admins.contains(&tg_id)
  }
}
