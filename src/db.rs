use anyhow::Result;
use sqlx::Pool;
use sqlx::Postgres;
use sqlx::Row;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::postgres::PgRow;
use tracing::info;
use tracing::instrument;

use crate::booking::ActivityRepository;
use crate::models::ActivityRow;
use crate::models::ListMode;
use crate::models::RegistrantRow;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const ACTIVITY_QUERY: &str = r#"
  WITH reg AS (
    SELECT activity_id, COALESCE(SUM(quantity), 0) AS booked
    FROM bookings
    WHERE quantity > 0
    GROUP BY activity_id
  )
  SELECT
    a.activity_id,
    a.title,
    a.announce,
    a.info,
    a.showtime,
    p.title AS place_title,
    p.info AS place_info,
    p.addr,
    p.maplink,
    (a.max_visitors - COALESCE(r.booked, 0))::INT AS left_places,
    COALESCE(b.quantity, 0) AS quantity,
    COALESCE(b.redeemed, FALSE) AS redeemed
  FROM activities a
  JOIN places p ON p.place_id = a.place_id
  LEFT JOIN bookings b ON b.client_id = $1 AND b.activity_id = a.activity_id
  LEFT JOIN reg r ON r.activity_id = a.activity_id
  WHERE a.active
    AND ($2 OR a.openreg <= NOW())
    AND NOW() < a.showtime + make_interval(hours => $3)
    AND ($4::BIGINT IS NULL OR a.activity_id = $4)
  ORDER BY a.showtime
"#;

const UPSERT_BOOKING: &str = r#"
  INSERT INTO bookings (client_id, activity_id, quantity, modified, num_changes)
  VALUES ($1, $2, $3, NOW(), 0)
  ON CONFLICT (client_id, activity_id) DO UPDATE SET
    quantity = EXCLUDED.quantity,
    modified = EXCLUDED.modified,
    redeemed = FALSE,
    num_changes = bookings.num_changes + 1
"#;

/// Hours an activity stays visible after it starts, per query mode.
#[derive(Debug, Clone, Copy)]
pub struct ActivityWindows {
  pub actual_hours: i32,
  pub service_hours: i32,
}

#[derive(Clone)]
pub struct Db {
  pool: Pool<Postgres>,
  windows: ActivityWindows,
}

impl Db {
  pub async fn connect(database_url: &str, windows: ActivityWindows) -> Result<Self> {
    let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
    MIGRATOR.run(&pool).await?;
    info!("database migrations applied");
    Ok(Self { pool, windows })
  }

  #[instrument(skip(self))]
  pub async fn upsert_client(
    &self,
    id: i64,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
  ) -> Result<()> {
    sqlx::query(
      r#"
      INSERT INTO clients (client_id, username, first_name, last_name)
      VALUES ($1, $2, $3, $4)
      ON CONFLICT (client_id) DO UPDATE SET
        username = EXCLUDED.username,
        first_name = EXCLUDED.first_name,
        last_name = EXCLUDED.last_name
      "#,
    )
    .bind(id)
    .bind(username)
    .bind(first_name)
    .bind(last_name)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  pub async fn client_specname(&self, id: i64) -> Result<Option<String>> {
    let specname = sqlx::query_scalar::<_, Option<String>>("SELECT specname FROM clients WHERE client_id = $1")
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(specname.flatten().filter(|name| !name.trim().is_empty()))
  }

  #[instrument(skip(self))]
  pub async fn set_specname(&self, id: i64, specname: &str) -> Result<()> {
    sqlx::query(
      r#"
      INSERT INTO clients (client_id, specname)
      VALUES ($1, $2)
      ON CONFLICT (client_id) DO UPDATE SET specname = EXCLUDED.specname
      "#,
    )
    .bind(id)
    .bind(specname)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  pub async fn list_activities(&self, mode: ListMode, user_id: i64) -> Result<Vec<ActivityRow>> {
    let rows = self.activity_query(mode, user_id, None).fetch_all(&self.pool).await?;
    Ok(rows.iter().map(activity_from_row).collect())
  }

  #[instrument(skip(self))]
  pub async fn list_registrants(&self, activity_id: i64) -> Result<Vec<RegistrantRow>> {
    let rows = sqlx::query(
      r#"
      SELECT c.client_id, c.specname, c.username, b.quantity, b.num_changes, b.redeemed
      FROM bookings b
      JOIN clients c ON c.client_id = b.client_id
      WHERE b.activity_id = $1 AND b.quantity > 0
      ORDER BY b.modified ASC
      "#,
    )
    .bind(activity_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(
      rows
        .into_iter()
        .map(|row| RegistrantRow {
          client_id: row.get("client_id"),
          specname: row.get("specname"),
          username: row.get("username"),
          quantity: row.get("quantity"),
          num_changes: row.get("num_changes"),
          redeemed: row.get("redeemed"),
        })
        .collect(),
    )
  }

  fn activity_query(
    &self,
    mode: ListMode,
    user_id: i64,
    activity_id: Option<i64>,
  ) -> sqlx::query::Query<'static, Postgres, sqlx::postgres::PgArguments> {
    let service = mode == ListMode::Service;
    let hours = if service {
      self.windows.service_hours
    } else {
      self.windows.actual_hours
    };
    sqlx::query(ACTIVITY_QUERY)
      .bind(user_id)
      .bind(service)
      .bind(hours)
      .bind(activity_id)
  }
}

impl ActivityRepository for Db {
  #[instrument(skip(self))]
  async fn find_activity(&self, mode: ListMode, user_id: i64, activity_id: i64) -> Result<Option<ActivityRow>> {
    let row = self
      .activity_query(mode, user_id, Some(activity_id))
      .fetch_optional(&self.pool)
      .await?;
    Ok(row.as_ref().map(activity_from_row))
  }

  #[instrument(skip(self))]
  async fn reserve_places(&self, user_id: i64, activity_id: i64, quantity: i32) -> Result<bool> {
    let mut tx = self.pool.begin().await?;

    let capacity =
      sqlx::query_scalar::<_, i32>("SELECT max_visitors FROM activities WHERE activity_id = $1 FOR UPDATE")
        .bind(activity_id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(capacity) = capacity else {
      tx.rollback().await?;
      return Ok(false);
    };

    let current =
      sqlx::query_scalar::<_, i32>("SELECT quantity FROM bookings WHERE client_id = $1 AND activity_id = $2")
        .bind(user_id)
        .bind(activity_id)
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(0);
    let booked_by_others = sqlx::query_scalar::<_, i64>(
      "SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM bookings WHERE activity_id = $1 AND client_id <> $2",
    )
    .bind(activity_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    if quantity > current && booked_by_others + i64::from(quantity) > i64::from(capacity) {
      tx.rollback().await?;
      info!(user_id, activity_id, quantity, capacity, "reservation rejected, capacity exhausted");
      return Ok(false);
    }

    sqlx::query(UPSERT_BOOKING)
      .bind(user_id)
      .bind(activity_id)
      .bind(quantity)
      .execute(&mut *tx)
      .await?;
    tx.commit().await?;
    Ok(true)
  }

  #[instrument(skip(self))]
  async fn force_registration(&self, user_id: i64, activity_id: i64, quantity: i32) -> Result<()> {
    sqlx::query(UPSERT_BOOKING)
      .bind(user_id)
      .bind(activity_id)
      .bind(quantity)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  async fn redeem_ticket(&self, user_id: i64, activity_id: i64) -> Result<bool> {
    let result = sqlx::query(
      r#"
      UPDATE bookings
      SET redeemed = TRUE, modified = NOW()
      WHERE client_id = $1 AND activity_id = $2 AND quantity > 0
      "#,
    )
    .bind(user_id)
    .bind(activity_id)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected() > 0)
  }
}

fn activity_from_row(row: &PgRow) -> ActivityRow {
  ActivityRow {
    activity_id: row.get("activity_id"),
    title: row.get("title"),
    announce: row.get("announce"),
    info: row.get("info"),
    showtime: row.get("showtime"),
    place_title: row.get("place_title"),
    place_info: row.get("place_info"),
    addr: row.get("addr"),
    maplink: row.get("maplink"),
    left_places: row.get("left_places"),
    quantity: row.get("quantity"),
    redeemed: row.get("redeemed"),
  }
}
