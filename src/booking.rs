use std::fmt;
use std::future::Future;
use std::str::FromStr;

use anyhow::Result;
use anyhow::anyhow;
use tracing::info;
use tracing::instrument;

use crate::error::FlowError;
use crate::models::ActivityRow;
use crate::models::ListMode;
use crate::navigation::PayloadError;

/// Storage operations the booking rules depend on.
pub trait ActivityRepository: Send + Sync {
  fn find_activity(
    &self,
    mode: ListMode,
    user_id: i64,
    activity_id: i64,
  ) -> impl Future<Output = Result<Option<ActivityRow>>> + Send;

  /// Sets the user's quantity unless an increase would exceed capacity. Returns `false` when rejected.
  fn reserve_places(&self, user_id: i64, activity_id: i64, quantity: i32) -> impl Future<Output = Result<bool>> + Send;

  /// Sets the user's quantity without any capacity check.
  fn force_registration(&self, user_id: i64, activity_id: i64, quantity: i32)
  -> impl Future<Output = Result<()>> + Send;

  /// Marks a held ticket as redeemed. Returns `false` when nothing was updated.
  fn redeem_ticket(&self, user_id: i64, activity_id: i64) -> impl Future<Output = Result<bool>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingLimits {
  pub max_per_user: i32,
  pub auto_confirm_limit: i32,
}

/// Upper bound of the quantity a user may pick on the booking sheet.
pub fn bookable_limit(left_places: i32, current: i32, max_per_user: i32) -> i32 {
  max_per_user.min(left_places + current).max(0)
}

/// Quantity buttons offered on the booking sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuantityChoice {
  Nothing,
  SingleSeat,
  Range(Vec<i32>),
}

pub fn quantity_choice(left_places: i32, current: i32, max_per_user: i32) -> QuantityChoice {
  if left_places + current > 1 {
    let upper = bookable_limit(left_places, current, max_per_user);
    let options: Vec<i32> = (1 ..= upper).filter(|n| *n != current).collect();
    if options.is_empty() {
      return QuantityChoice::Nothing;
    }
    return QuantityChoice::Range(options);
  }
  if left_places == 1 && current == 0 && max_per_user >= 1 {
    return QuantityChoice::SingleSeat;
  }
  QuantityChoice::Nothing
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingDecision {
  Commit,
  AskAdmin,
  NoPlaces,
}

/// Increases above the seat cap always go to an admin.
pub fn decide(requested: i32, current: i32, left_places: i32, limits: BookingLimits) -> BookingDecision {
  let reduction = requested <= current;
  if !reduction && left_places + current < requested {
    return BookingDecision::NoPlaces;
  }
  let auto_confirm = limits.auto_confirm_limit.min(limits.max_per_user);
  if reduction || requested <= auto_confirm {
    BookingDecision::Commit
  } else {
    BookingDecision::AskAdmin
  }
}

#[derive(Debug, Clone)]
pub enum BookingOutcome {
  Booked { quantity: i32 },
  Cancelled,
  AwaitingAdmin { activity: ActivityRow, quantity: i32 },
  NoPlaces,
  NoLongerAvailable,
}

/// Re-reads the activity and commits, queues or rejects the request.
#[instrument(skip(repo, limits))]
pub async fn request_booking<R: ActivityRepository>(
  repo: &R,
  mode: ListMode,
  user_id: i64,
  activity_id: i64,
  requested: i32,
  limits: BookingLimits,
) -> Result<BookingOutcome, FlowError> {
  if requested < 0 {
    return Err(FlowError::Forbidden);
  }
  let activity = repo
    .find_activity(mode, user_id, activity_id)
    .await?
    .ok_or(FlowError::Unavailable)?;

  let outcome = match decide(requested, activity.quantity, activity.left_places, limits) {
    BookingDecision::NoPlaces => BookingOutcome::NoPlaces,
    BookingDecision::AskAdmin => BookingOutcome::AwaitingAdmin {
      activity,
      quantity: requested,
    },
    BookingDecision::Commit => {
      if !repo.reserve_places(user_id, activity_id, requested).await? {
        BookingOutcome::NoLongerAvailable
      } else if requested == 0 {
        BookingOutcome::Cancelled
      } else {
        BookingOutcome::Booked { quantity: requested }
      }
    },
  };
  info!(user_id, activity_id, requested, outcome = outcome_label(&outcome), "booking request handled");
  Ok(outcome)
}

fn outcome_label(outcome: &BookingOutcome) -> &'static str {
  match outcome {
    BookingOutcome::Booked { .. } => "booked",
    BookingOutcome::Cancelled => "cancelled",
    BookingOutcome::AwaitingAdmin { .. } => "awaiting_admin",
    BookingOutcome::NoPlaces => "no_places",
    BookingOutcome::NoLongerAvailable => "no_longer_available",
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminVerdict {
  Decline,
  Accept,
  Force,
}

/// Value of an `admin_confirm_book` payload: `<state>,<client_id>,<activity_id>,<quantity>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminRequest {
  pub verdict: AdminVerdict,
  pub client_id: i64,
  pub activity_id: Option<i64>,
  pub quantity: Option<i32>,
}

impl AdminRequest {
  pub fn new(verdict: AdminVerdict, client_id: i64, activity_id: i64, quantity: i32) -> Self {
    Self {
      verdict,
      client_id,
      activity_id: Some(activity_id),
      quantity: Some(quantity),
    }
  }

  pub fn decline(client_id: i64) -> Self {
    Self {
      verdict: AdminVerdict::Decline,
      client_id,
      activity_id: None,
      quantity: None,
    }
  }

  pub fn with_verdict(self, verdict: AdminVerdict) -> Self {
    Self { verdict, ..self }
  }
}

impl fmt::Display for AdminRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = match self.verdict {
      AdminVerdict::Decline => 0,
      AdminVerdict::Accept => 1,
      AdminVerdict::Force => 2,
    };
    let activity = self.activity_id.map(|id| id.to_string()).unwrap_or_default();
    let quantity = self.quantity.map(|q| q.to_string()).unwrap_or_default();
    write!(f, "{state},{},{activity},{quantity}", self.client_id)
  }
}

impl FromStr for AdminRequest {
  type Err = PayloadError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    let malformed = || PayloadError::MalformedValue(value.to_string());
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [state, client, activity, quantity] = parts.as_slice() else {
      return Err(malformed());
    };
    let verdict = match *state {
      "0" => AdminVerdict::Decline,
      "1" => AdminVerdict::Accept,
      "2" => AdminVerdict::Force,
      _ => return Err(malformed()),
    };
    let client_id = client.parse::<i64>().map_err(|_| malformed())?;
    let optional = |raw: &str| -> Result<Option<i64>, PayloadError> {
      if raw.is_empty() {
        Ok(None)
      } else {
        raw.parse::<i64>().map(Some).map_err(|_| malformed())
      }
    };
    let activity_id = optional(*activity)?;
    let quantity = optional(*quantity)?
      .map(i32::try_from)
      .transpose()
      .map_err(|_| malformed())?;
    if verdict != AdminVerdict::Decline && (activity_id.is_none() || quantity.is_none()) {
      return Err(malformed());
    }
    Ok(Self {
      verdict,
      client_id,
      activity_id,
      quantity,
    })
  }
}

#[derive(Debug, Clone)]
pub enum AdminOutcome {
  Declined,
  Registered { quantity: i32 },
  NeedsForce { activity: ActivityRow, overbook: i32 },
}

/// Places the request would take beyond what is free, counting the client's own places.
pub fn overbook(requested: i32, activity: &ActivityRow) -> i32 {
  requested - (activity.quantity + activity.left_places)
}

#[instrument(skip(repo))]
pub async fn review_request<R: ActivityRepository>(repo: &R, request: AdminRequest) -> Result<AdminOutcome, FlowError> {
  let (activity_id, quantity) = match (request.verdict, request.activity_id, request.quantity) {
    (AdminVerdict::Decline, ..) => return Ok(AdminOutcome::Declined),
    (_, Some(activity_id), Some(quantity)) => (activity_id, quantity),
    _ => return Err(FlowError::Unavailable),
  };

  if request.verdict == AdminVerdict::Force {
    repo.force_registration(request.client_id, activity_id, quantity).await?;
    info!(client_id = request.client_id, activity_id, quantity, "registration force-confirmed");
    return Ok(AdminOutcome::Registered { quantity });
  }

  let activity = repo
    .find_activity(ListMode::Service, request.client_id, activity_id)
    .await?
    .ok_or(FlowError::Unavailable)?;
  let excess = overbook(quantity, &activity);
  if excess > 0 {
    return Ok(AdminOutcome::NeedsForce {
      activity,
      overbook: excess,
    });
  }

  if repo.reserve_places(request.client_id, activity_id, quantity).await? {
    info!(client_id = request.client_id, activity_id, quantity, "registration confirmed");
    return Ok(AdminOutcome::Registered { quantity });
  }

  // capacity taken between the read and the write
  let activity = repo
    .find_activity(ListMode::Service, request.client_id, activity_id)
    .await?
    .ok_or(FlowError::Unavailable)?;
  let excess = overbook(quantity, &activity).max(1);
  Ok(AdminOutcome::NeedsForce {
    activity,
    overbook: excess,
  })
}

/// Ticket redemption deep-link payload `<client_id>_<activity_id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketRef {
  pub client_id: i64,
  pub activity_id: i64,
}

impl fmt::Display for TicketRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}_{}", self.client_id, self.activity_id)
  }
}

impl FromStr for TicketRef {
  type Err = PayloadError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    let malformed = || PayloadError::MalformedValue(value.to_string());
    let (client, activity) = value.trim().split_once('_').ok_or_else(malformed)?;
    Ok(Self {
      client_id: client.parse().map_err(|_| malformed())?,
      activity_id: activity.parse().map_err(|_| malformed())?,
    })
  }
}

/// Redeems a ticket; the returned row carries the redeemed flag as it was before.
#[instrument(skip(repo))]
pub async fn redeem<R: ActivityRepository>(repo: &R, ticket: TicketRef) -> Result<ActivityRow, FlowError> {
  let activity = repo
    .find_activity(ListMode::Service, ticket.client_id, ticket.activity_id)
    .await?
    .ok_or(FlowError::Unavailable)?;
  if activity.quantity <= 0 {
    return Err(FlowError::Forbidden);
  }
  if !repo.redeem_ticket(ticket.client_id, ticket.activity_id).await? {
    return Err(FlowError::Storage(anyhow!("ticket {ticket} was not redeemed")));
  }
  info!(client_id = ticket.client_id, activity_id = ticket.activity_id, "ticket redeemed");
  Ok(activity)
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use anyhow::Result;
  use chrono::Utc;
  use futures::future::join;
  use tokio::sync::Mutex;

  use super::ActivityRepository;
  use super::AdminOutcome;
  use super::AdminRequest;
  use super::AdminVerdict;
  use super::BookingDecision;
  use super::BookingLimits;
  use super::BookingOutcome;
  use super::QuantityChoice;
  use super::TicketRef;
  use super::bookable_limit;
  use super::decide;
  use super::quantity_choice;
  use super::redeem;
  use super::request_booking;
  use super::review_request;
  use crate::error::FlowError;
  use crate::models::ActivityRow;
  use crate::models::ListMode;

  const LIMITS: BookingLimits = BookingLimits {
    max_per_user: 4,
    auto_confirm_limit: 4,
  };

  #[derive(Default)]
  struct MemoryState {
    capacity: HashMap<i64, i32>,
    bookings: HashMap<(i64, i64), (i32, bool)>,
  }

  /// Snapshot reads yield before returning so concurrent callers interleave.
  #[derive(Default)]
  struct MemoryRepository {
    state: Mutex<MemoryState>,
  }

  impl MemoryRepository {
    fn with_activity(activity_id: i64, capacity: i32) -> Self {
      let repo = Self::default();
      repo.state.try_lock().unwrap().capacity.insert(activity_id, capacity);
      repo
    }

    async fn book(&self, user_id: i64, activity_id: i64, quantity: i32) {
      self
        .state
        .lock()
        .await
        .bookings
        .insert((user_id, activity_id), (quantity, false));
    }

    async fn held(&self, user_id: i64, activity_id: i64) -> i32 {
      self
        .state
        .lock()
        .await
        .bookings
        .get(&(user_id, activity_id))
        .map(|(q, _)| *q)
        .unwrap_or(0)
    }
  }

  fn booked_by_others(state: &MemoryState, user_id: i64, activity_id: i64) -> i32 {
    state
      .bookings
      .iter()
      .filter(|((user, activity), _)| *activity == activity_id && *user != user_id)
      .map(|(_, (quantity, _))| *quantity)
      .sum()
  }

  impl ActivityRepository for MemoryRepository {
    async fn find_activity(&self, _mode: ListMode, user_id: i64, activity_id: i64) -> Result<Option<ActivityRow>> {
      let row = {
        let state = self.state.lock().await;
        state.capacity.get(&activity_id).map(|capacity| {
          let (quantity, redeemed) = state.bookings.get(&(user_id, activity_id)).copied().unwrap_or((0, false));
          ActivityRow {
            activity_id,
            title: "Night walk".to_string(),
            announce: None,
            info: None,
            showtime: Utc::now(),
            place_title: "Old town".to_string(),
            place_info: None,
            addr: None,
            maplink: None,
            left_places: capacity - booked_by_others(&state, user_id, activity_id) - quantity,
            quantity,
            redeemed,
          }
        })
      };
      tokio::task::yield_now().await;
      Ok(row)
    }

    async fn reserve_places(&self, user_id: i64, activity_id: i64, quantity: i32) -> Result<bool> {
      let mut state = self.state.lock().await;
      let Some(capacity) = state.capacity.get(&activity_id).copied() else {
        return Ok(false);
      };
      let current = state.bookings.get(&(user_id, activity_id)).map(|(q, _)| *q).unwrap_or(0);
      if quantity > current && booked_by_others(&state, user_id, activity_id) + quantity > capacity {
        return Ok(false);
      }
      state.bookings.insert((user_id, activity_id), (quantity, false));
      Ok(true)
    }

    async fn force_registration(&self, user_id: i64, activity_id: i64, quantity: i32) -> Result<()> {
      let mut state = self.state.lock().await;
      state.bookings.insert((user_id, activity_id), (quantity, false));
      Ok(())
    }

    async fn redeem_ticket(&self, user_id: i64, activity_id: i64) -> Result<bool> {
      let mut state = self.state.lock().await;
      match state.bookings.get_mut(&(user_id, activity_id)) {
        Some((quantity, redeemed)) if *quantity > 0 => {
          *redeemed = true;
          Ok(true)
        },
        _ => Ok(false),
      }
    }
  }

  #[test]
  fn limit_is_capped_by_max_and_capacity() {
    assert_eq!(bookable_limit(10, 0, 4), 4);
    assert_eq!(bookable_limit(2, 1, 4), 3);
    assert_eq!(bookable_limit(-3, 1, 4), 0);
  }

  #[test]
  fn offered_quantities_never_exceed_limits() {
    for left in -2 ..= 6 {
      for current in 0 ..= 5 {
        let options = match quantity_choice(left, current, 4) {
          QuantityChoice::Range(options) => options,
          QuantityChoice::SingleSeat => vec![1],
          QuantityChoice::Nothing => vec![],
        };
        for requested in options {
          assert!(requested <= 4);
          assert!(requested <= left + current);
          assert_ne!(requested, current);
        }
      }
    }
  }

  #[test]
  fn single_place_collapses_to_one_button() {
    assert_eq!(quantity_choice(1, 0, 4), QuantityChoice::SingleSeat);
    assert_eq!(quantity_choice(0, 1, 4), QuantityChoice::Nothing);
    assert_eq!(quantity_choice(0, 0, 4), QuantityChoice::Nothing);
    assert_eq!(quantity_choice(3, 1, 4), QuantityChoice::Range(vec![2, 3, 4]));
  }

  #[test]
  fn decision_respects_capacity_and_threshold() {
    let limits = BookingLimits {
      max_per_user: 4,
      auto_confirm_limit: 2,
    };
    assert_eq!(decide(2, 0, 5, limits), BookingDecision::Commit);
    assert_eq!(decide(3, 0, 5, limits), BookingDecision::AskAdmin);
    assert_eq!(decide(3, 0, 2, limits), BookingDecision::NoPlaces);
    assert_eq!(decide(0, 3, -2, limits), BookingDecision::Commit);
    assert_eq!(decide(3, 4, 0, limits), BookingDecision::Commit);
  }

  #[tokio::test]
  async fn concurrent_requests_for_last_place_commit_once() {
    let repo = MemoryRepository::with_activity(7, 1);
    let (first, second) = join(
      request_booking(&repo, ListMode::Announce, 1, 7, 1, LIMITS),
      request_booking(&repo, ListMode::Announce, 2, 7, 1, LIMITS),
    )
    .await;

    let outcomes = [first.unwrap(), second.unwrap()];
    let booked = outcomes
      .iter()
      .filter(|o| matches!(o, BookingOutcome::Booked { quantity: 1 }))
      .count();
    assert_eq!(booked, 1);
    assert!(
      outcomes
        .iter()
        .any(|o| matches!(o, BookingOutcome::NoLongerAvailable | BookingOutcome::NoPlaces))
    );
    assert_eq!(repo.held(1, 7).await + repo.held(2, 7).await, 1);
  }

  #[tokio::test]
  async fn cancelling_releases_places() {
    let repo = MemoryRepository::with_activity(3, 2);
    repo.book(1, 3, 2).await;
    let outcome = request_booking(&repo, ListMode::MyBooking, 1, 3, 0, LIMITS).await.unwrap();
    assert!(matches!(outcome, BookingOutcome::Cancelled));
    assert_eq!(repo.held(1, 3).await, 0);
  }

  #[tokio::test]
  async fn large_request_is_queued_for_admin() {
    let repo = MemoryRepository::with_activity(3, 20);
    let outcome = request_booking(&repo, ListMode::Announce, 1, 3, 6, LIMITS).await.unwrap();
    assert!(matches!(outcome, BookingOutcome::AwaitingAdmin { quantity: 6, .. }));
    assert_eq!(repo.held(1, 3).await, 0);
  }

  #[tokio::test]
  async fn auto_confirm_never_exceeds_seat_cap() {
    let limits = BookingLimits {
      max_per_user: 4,
      auto_confirm_limit: 10,
    };
    assert_eq!(decide(8, 0, 20, limits), BookingDecision::AskAdmin);
    assert_eq!(decide(4, 0, 20, limits), BookingDecision::Commit);

    let repo = MemoryRepository::with_activity(3, 20);
    let outcome = request_booking(&repo, ListMode::Announce, 1, 3, 8, limits).await.unwrap();
    assert!(matches!(outcome, BookingOutcome::AwaitingAdmin { quantity: 8, .. }));
    assert_eq!(repo.held(1, 3).await, 0);
  }

  #[tokio::test]
  async fn changing_a_booking_clears_redemption() {
    let repo = MemoryRepository::with_activity(4, 10);
    repo.book(11, 4, 1).await;
    let ticket = TicketRef {
      client_id: 11,
      activity_id: 4,
    };
    redeem(&repo, ticket).await.unwrap();

    let outcome = request_booking(&repo, ListMode::Announce, 11, 4, 3, LIMITS).await.unwrap();
    assert!(matches!(outcome, BookingOutcome::Booked { quantity: 3 }));
    let activity = repo.find_activity(ListMode::Announce, 11, 4).await.unwrap().unwrap();
    assert!(!activity.redeemed);

    redeem(&repo, ticket).await.unwrap();
    let forced = review_request(&repo, AdminRequest::new(AdminVerdict::Force, 11, 4, 6))
      .await
      .unwrap();
    assert!(matches!(forced, AdminOutcome::Registered { quantity: 6 }));
    let activity = repo.find_activity(ListMode::Announce, 11, 4).await.unwrap().unwrap();
    assert!(!activity.redeemed);
  }

  #[tokio::test]
  async fn missing_activity_is_unavailable() {
    let repo = MemoryRepository::default();
    let result = request_booking(&repo, ListMode::Announce, 1, 99, 1, LIMITS).await;
    assert!(matches!(result, Err(FlowError::Unavailable)));
  }

  #[tokio::test]
  async fn admin_overbook_requires_force_confirmation() {
    let repo = MemoryRepository::with_activity(5, 3);
    repo.book(9, 5, 2).await;
    let request = AdminRequest::new(AdminVerdict::Accept, 1, 5, 3);

    let outcome = review_request(&repo, request).await.unwrap();
    match outcome {
      AdminOutcome::NeedsForce { overbook, .. } => assert_eq!(overbook, 2),
      other => panic!("expected force confirmation, got {other:?}"),
    }
    assert_eq!(repo.held(1, 5).await, 0);

    let forced = review_request(&repo, request.with_verdict(AdminVerdict::Force)).await.unwrap();
    assert!(matches!(forced, AdminOutcome::Registered { quantity: 3 }));
    assert_eq!(repo.held(1, 5).await, 3);
  }

  #[tokio::test]
  async fn admin_accept_within_capacity_registers() {
    let repo = MemoryRepository::with_activity(5, 10);
    let outcome = review_request(&repo, AdminRequest::new(AdminVerdict::Accept, 1, 5, 6))
      .await
      .unwrap();
    assert!(matches!(outcome, AdminOutcome::Registered { quantity: 6 }));

    let declined = review_request(&repo, AdminRequest::decline(1)).await.unwrap();
    assert!(matches!(declined, AdminOutcome::Declined));
  }

  #[test]
  fn admin_payload_round_trips() {
    let request = AdminRequest::new(AdminVerdict::Force, 42, 7, 5);
    assert_eq!(request.to_string(), "2,42,7,5");
    assert_eq!("2,42,7,5".parse::<AdminRequest>(), Ok(request));
    assert_eq!("0,42,,".parse::<AdminRequest>(), Ok(AdminRequest::decline(42)));
    assert!("1,42,,".parse::<AdminRequest>().is_err());
    assert!("9,42,7,5".parse::<AdminRequest>().is_err());
  }

  #[tokio::test]
  async fn redeeming_requires_held_places() {
    let repo = MemoryRepository::with_activity(4, 5);
    let ticket: TicketRef = "11_4".parse().unwrap();
    assert!(matches!(redeem(&repo, ticket).await, Err(FlowError::Forbidden)));

    repo.book(11, 4, 2).await;
    let activity = redeem(&repo, ticket).await.unwrap();
    assert!(!activity.redeemed);
    let again = redeem(&repo, ticket).await.unwrap();
    assert!(again.redeemed);

    assert!("11-4".parse::<TicketRef>().is_err());
  }
}
