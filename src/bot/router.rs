use chrono::DateTime;
use chrono::Utc;

use crate::bot::state::ConversationState;
use crate::bot::state::Session;
use crate::error::FlowError;
use crate::models::ListMode;
use crate::navigation::Button;
use crate::navigation::HistoryStack;
use crate::navigation::Movement;
use crate::navigation::NavigationStep;
use crate::navigation::PayloadError;
use crate::util::parse_typed_quantity;

/// Screen handlers a button can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
  MainMenu,
  ActivityList(ListMode),
  ServiceList,
  About,
  Goodbye,
  ActivityInfo,
  PlaceCard,
  Ticket,
  BookingSheet,
  BookingConfirm,
  BookingResult,
  Registrants,
  Reminders,
  AdminConfirm,
  Error,
}

pub const fn handler_for(button: Button) -> HandlerKind {
  match button {
    Button::Main => HandlerKind::MainMenu,
    Button::Announce => HandlerKind::ActivityList(ListMode::Announce),
    Button::MyBooking => HandlerKind::ActivityList(ListMode::MyBooking),
    Button::Service => HandlerKind::ServiceList,
    Button::About => HandlerKind::About,
    Button::Goodbye => HandlerKind::Goodbye,
    Button::More => HandlerKind::ActivityInfo,
    Button::ShowMap => HandlerKind::PlaceCard,
    Button::ShowTicket => HandlerKind::Ticket,
    Button::Book => HandlerKind::BookingSheet,
    Button::BookConfirm => HandlerKind::BookingConfirm,
    Button::BookAccept => HandlerKind::BookingResult,
    Button::Visitors => HandlerKind::Registrants,
    Button::Remind => HandlerKind::Reminders,
    Button::AdminConfirmBook => HandlerKind::AdminConfirm,
    Button::Error => HandlerKind::Error,
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
  pub handler: HandlerKind,
  pub step: NavigationStep,
  /// `None` when the button lives outside the conversation history.
  pub movement: Option<Movement>,
}

/// Parses a callback payload, updates the history and resolves the handler.
pub fn route(history: &mut HistoryStack, payload: &str) -> Result<Route, PayloadError> {
  let step = NavigationStep::parse(payload)?;
  let handler = handler_for(step.button);
  if handler == HandlerKind::AdminConfirm {
    return Ok(Route {
      handler,
      step,
      movement: None,
    });
  }
  let movement = history.apply(step.clone());
  Ok(Route {
    handler,
    step,
    movement: Some(movement),
  })
}

/// Outcome of a button press against the stored conversation.
#[derive(Debug)]
pub enum Dispatch {
  Screen { session: Session, route: Route },
  /// `session` is handed back so its screen can be cleaned up.
  Abort {
    session: Option<Session>,
    error: FlowError,
  },
}

/// Checks the conversation is live at `now`, then routes the payload.
pub fn route_callback(state: ConversationState, payload: &str, now: DateTime<Utc>, timeout_secs: i64) -> Dispatch {
  let ConversationState::Menu(mut session) = state else {
    return Dispatch::Abort {
      session: None,
      error: FlowError::Timeout,
    };
  };
  if session.is_expired(now, timeout_secs) {
    return Dispatch::Abort {
      session: Some(session),
      error: FlowError::Timeout,
    };
  }
  match route(&mut session.history, payload) {
    Ok(route) => Dispatch::Screen { session, route },
    Err(err) => Dispatch::Abort {
      session: Some(session),
      error: err.into(),
    },
  }
}

/// Plain text on the booking sheet is a typed quantity; anything else is not routed.
pub fn route_text(history: &mut HistoryStack, text: &str) -> Option<HandlerKind> {
  if history.current().button != Button::Book {
    return None;
  }
  let quantity = parse_typed_quantity(text);
  history.push(NavigationStep::new(Button::BookConfirm, Some(quantity.to_string())));
  Some(HandlerKind::BookingConfirm)
}
