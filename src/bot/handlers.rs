use std::sync::Arc;

use anyhow::Context;
use anyhow::anyhow;
use chrono::Utc;
use teloxide::ApiError;
use teloxide::RequestError;
use teloxide::dispatching::UpdateHandler;
use teloxide::dispatching::dialogue::Dialogue;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use teloxide::types::ChatId;
use teloxide::types::Me;
use teloxide::types::Message;
use teloxide::types::MessageId;
use teloxide::types::ParseMode;
use teloxide::types::User;
use teloxide::utils::command::BotCommands;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::booking;
use crate::booking::ActivityRepository;
use crate::booking::AdminOutcome;
use crate::booking::AdminRequest;
use crate::booking::AdminVerdict;
use crate::booking::BookingOutcome;
use crate::booking::TicketRef;
use crate::bot::Command;
use crate::bot::DialogueStorage;
use crate::bot::HandlerResult;
use crate::bot::context::AppContext;
use crate::bot::router;
use crate::bot::router::Dispatch;
use crate::bot::router::HandlerKind;
use crate::bot::state::ConversationState;
use crate::bot::state::PendingBooking;
use crate::bot::state::Session;
use crate::bot::state::name_exchange;
use crate::bot::views;
use crate::bot::views::Greeting;
use crate::bot::views::Screen;
use crate::error::FlowError;
use crate::models::ActivityRow;
use crate::models::ListMode;
use crate::navigation::Button;
use crate::navigation::NavigationStep;
use crate::navigation::PayloadError;

type SharedContext = Arc<AppContext>;
type BotDialogue = Dialogue<ConversationState, DialogueStorage>;

const SPECNAME_MAX_CHARS: usize = 100;

/// Conversation state after a screen handler ran.
enum Next {
  Menu,
  End,
}

pub fn build_schema() -> UpdateHandler<anyhow::Error> {
  let message_handler = Update::filter_message()
    .enter_dialogue::<Message, DialogueStorage, ConversationState>()
    .branch(command_branch())
    .branch(dptree::case![ConversationState::FirstMet { prompt }].endpoint(handle_first_met_text))
    .branch(dptree::case![ConversationState::Menu(session)].endpoint(handle_menu_text))
    .branch(dptree::endpoint(handle_idle_text));

  let callback_handler = Update::filter_callback_query()
    .branch(dptree::filter(is_admin_confirmation).endpoint(handle_admin_confirmation))
    .branch(
      dptree::entry()
        .enter_dialogue::<CallbackQuery, DialogueStorage, ConversationState>()
        .endpoint(handle_callback_query),
    );

  dptree::entry().branch(message_handler).branch(callback_handler)
}

fn command_branch() -> UpdateHandler<anyhow::Error> {
  dptree::entry()
    .filter_command::<Command>()
    .branch(dptree::case![Command::Start(payload)].endpoint(handle_start))
    .branch(dptree::case![Command::Help].endpoint(handle_help))
}

#[instrument(skip(bot, dialogue, ctx, msg))]
async fn handle_start(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  payload: String,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  ensure_user_record(&ctx, user).await?;
  let user_id = user.id.0 as i64;
  info!(user_id, chat_id = %msg.chat.id, "received /start command");

  let payload = payload.trim();
  if !payload.is_empty() {
    if ctx.is_admin(user_id) {
      close_conversation(&bot, &dialogue, msg.chat.id).await?;
      return send_redemption_result(&bot, &ctx, msg.chat.id, payload).await;
    }
    warn!(user_id, payload, "ignoring /start payload from non-admin");
  }
  start_conversation(&bot, &dialogue, &ctx, msg.chat.id, user).await
}

#[instrument(skip(bot, msg))]
async fn handle_help(bot: Bot, msg: Message) -> HandlerResult {
  info!(chat_id = %msg.chat.id, "received /help command");
  let mut text = Command::descriptions().to_string();
  text.push_str("\n\nBrowse activities and manage your bookings from the menu buttons.");
  bot.send_message(msg.chat.id, text).await?;
  Ok(())
}

#[instrument(skip(bot, dialogue, ctx, msg))]
async fn handle_idle_text(bot: Bot, dialogue: BotDialogue, ctx: SharedContext, msg: Message) -> HandlerResult {
  let Some(user) = msg.from.as_ref() else {
    return Ok(());
  };
  ensure_user_record(&ctx, user).await?;
  info!(user_id = user.id.0, chat_id = %msg.chat.id, "idle chat received a message");
  start_conversation(&bot, &dialogue, &ctx, msg.chat.id, user).await
}

async fn start_conversation(
  bot: &Bot,
  dialogue: &BotDialogue,
  ctx: &SharedContext,
  chat: ChatId,
  user: &User,
) -> HandlerResult {
  close_conversation(bot, dialogue, chat).await?;
  let user_id = user.id.0 as i64;

  let specname = match ctx.db().client_specname(user_id).await {
    Ok(specname) => specname,
    Err(err) => return fail(bot, dialogue, chat, None, FlowError::Storage(err)).await,
  };
  match specname {
    Some(specname) => {
      let mut session = Session::new(user_id, specname, user.username.clone(), Utc::now());
      let screen = views::main_menu(&session.specname, Greeting::Returning, ctx.is_admin(user_id));
      show_screen(bot, chat, &mut session, screen).await?;
      dialogue.update(ConversationState::Menu(session)).await?;
      info!(user_id, chat_id = %chat, "conversation started");
    },
    None => {
      let prompt = bot.send_message(chat, views::FIRST_MET_TEXT).await?;
      dialogue
        .update(ConversationState::FirstMet { prompt: Some(prompt.id) })
        .await?;
      info!(user_id, chat_id = %chat, "asked new user for a display name");
    },
  }
  Ok(())
}

#[instrument(skip(bot, dialogue, ctx, msg))]
async fn handle_first_met_text(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  prompt: Option<MessageId>,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  let user_id = user.id.0 as i64;
  let Some(name) = msg.text().map(str::trim).filter(|text| !text.is_empty()) else {
    bot.send_message(msg.chat.id, views::FIRST_MET_TEXT).await?;
    return Ok(());
  };
  let specname: String = name.chars().take(SPECNAME_MAX_CHARS).collect();

  if let Err(err) = ctx.db().set_specname(user_id, &specname).await {
    return fail(&bot, &dialogue, msg.chat.id, None, FlowError::Storage(err)).await;
  }
  for message_id in name_exchange(prompt, msg.id) {
    delete_quietly(&bot, msg.chat.id, message_id).await;
  }
  info!(user_id, chat_id = %msg.chat.id, "stored display name");

  let mut session = Session::new(user_id, specname, user.username.clone(), Utc::now());
  let screen = views::main_menu(&session.specname, Greeting::NewUser, ctx.is_admin(user_id));
  show_screen(&bot, msg.chat.id, &mut session, screen).await?;
  dialogue.update(ConversationState::Menu(session)).await?;
  Ok(())
}

#[instrument(skip(bot, dialogue, ctx, me, msg, session))]
async fn handle_menu_text(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  me: Me,
  msg: Message,
  session: Session,
) -> HandlerResult {
  let mut session = session;
  let chat = msg.chat.id;
  if session.is_expired(Utc::now(), ctx.settings().session_timeout_secs) {
    return fail(&bot, &dialogue, chat, Some(&mut session), FlowError::Timeout).await;
  }
  delete_quietly(&bot, chat, msg.id).await;

  let Some(text) = msg.text() else {
    return Ok(());
  };
  match router::route_text(&mut session.history, text) {
    Some(handler) => {
      info!(user_id = session.user_id, chat_id = %chat, history = %session.history, "typed quantity received");
      run_screen(&bot, &dialogue, &ctx, &me, chat, session, handler).await
    },
    None => Ok(()),
  }
}

#[instrument(skip(bot, ctx, me, query, dialogue, state))]
async fn handle_callback_query(
  bot: Bot,
  ctx: SharedContext,
  me: Me,
  query: CallbackQuery,
  dialogue: BotDialogue,
  state: ConversationState,
) -> HandlerResult {
  bot.answer_callback_query(query.id.clone()).await?;
  ensure_user_record(&ctx, &query.from).await?;
  let user_id = query.from.id.0 as i64;
  let Some((chat, message_id)) = query.message.as_ref().map(|message| (message.chat().id, message.id())) else {
    warn!(user_id, "callback query without message context");
    return Ok(());
  };
  let payload = query.data.as_deref().unwrap_or_default();
  info!(user_id, chat_id = %chat, callback = payload, "handling callback query");

  let timeout_secs = ctx.settings().session_timeout_secs;
  match router::route_callback(state, payload, Utc::now(), timeout_secs) {
    Dispatch::Screen { session, route } => {
      info!(
        user_id,
        step = %route.step,
        movement = ?route.movement,
        depth = session.history.len(),
        "callback routed"
      );
      run_screen(&bot, &dialogue, &ctx, &me, chat, session, route.handler).await
    },
    Dispatch::Abort { mut session, error } => {
      if session.is_none() {
        delete_quietly(&bot, chat, message_id).await;
      }
      fail(&bot, &dialogue, chat, session.as_mut(), error).await
    },
  }
}

/// Replaces the current screen with the one produced by `handler` and stores the session.
async fn run_screen(
  bot: &Bot,
  dialogue: &BotDialogue,
  ctx: &SharedContext,
  me: &Me,
  chat: ChatId,
  mut session: Session,
  handler: HandlerKind,
) -> HandlerResult {
  session.touch(Utc::now());
  clear_screen(bot, chat, &mut session).await;
  match render(bot, ctx, me, chat, &mut session, handler).await {
    Ok(Next::Menu) => dialogue.update(ConversationState::Menu(session)).await?,
    Ok(Next::End) => dialogue.exit().await?,
    Err(err) => return fail(bot, dialogue, chat, Some(&mut session), err).await,
  }
  Ok(())
}

async fn render(
  bot: &Bot,
  ctx: &SharedContext,
  me: &Me,
  chat: ChatId,
  session: &mut Session,
  handler: HandlerKind,
) -> Result<Next, FlowError> {
  match handler {
    HandlerKind::MainMenu => {
      let screen = views::main_menu(&session.specname, Greeting::Again, ctx.is_admin(session.user_id));
      show_screen(bot, chat, session, screen).await?;
      Ok(Next::Menu)
    },
    HandlerKind::ActivityList(mode) => show_activity_list(bot, ctx, chat, session, mode).await,
    HandlerKind::ServiceList => {
      require_admin(ctx, session)?;
      show_activity_list(bot, ctx, chat, session, ListMode::Service).await
    },
    HandlerKind::About => {
      show_screen(bot, chat, session, views::about()).await?;
      Ok(Next::Menu)
    },
    HandlerKind::Goodbye => {
      bot.send_message(chat, views::GOODBYE_TEXT).await?;
      info!(user_id = session.user_id, "conversation ended");
      Ok(Next::End)
    },
    HandlerKind::ActivityInfo => {
      let activity = current_activity(ctx, session, session.list_mode()).await?;
      let screen = views::activity_info(&activity, &session.history);
      show_screen(bot, chat, session, screen).await?;
      Ok(Next::Menu)
    },
    HandlerKind::PlaceCard => {
      let activity = current_activity(ctx, session, session.list_mode()).await?;
      let screen = views::place_card(&activity, &session.history);
      show_screen(bot, chat, session, screen).await?;
      Ok(Next::Menu)
    },
    HandlerKind::Ticket => show_ticket(bot, ctx, me, chat, session).await,
    HandlerKind::BookingSheet => show_booking_sheet(bot, ctx, chat, session).await,
    HandlerKind::BookingConfirm => show_booking_confirm(bot, ctx, chat, session).await,
    HandlerKind::BookingResult => show_booking_result(bot, ctx, chat, session).await,
    HandlerKind::Registrants => show_registrants(bot, ctx, chat, session).await,
    HandlerKind::Reminders => send_reminders(bot, ctx, chat, session).await,
    HandlerKind::AdminConfirm => Err(FlowError::Forbidden),
    HandlerKind::Error => Err(PayloadError::UnknownButton(session.history.current().to_string()).into()),
  }
}

async fn show_activity_list(
  bot: &Bot,
  ctx: &SharedContext,
  chat: ChatId,
  session: &mut Session,
  mode: ListMode,
) -> Result<Next, FlowError> {
  session.evfilter = Some(mode);
  let activities = ctx.db().list_activities(mode, session.user_id).await?;
  let any_announced = !activities.is_empty();
  let shown: Vec<ActivityRow> = match mode {
    ListMode::MyBooking => activities.into_iter().filter(|activity| activity.quantity > 0).collect(),
    ListMode::Announce | ListMode::Service => activities,
  };

  let related_channel = ctx.settings().related_channel.as_deref();
  let header = views::list_header(mode, shown.len(), any_announced, related_channel);
  show_screen(bot, chat, session, header).await?;

  let last = shown.len().saturating_sub(1);
  for (index, activity) in shown.iter().enumerate() {
    let card = match mode {
      ListMode::Service => views::service_card(activity, index == last),
      ListMode::Announce | ListMode::MyBooking => views::activity_list_card(activity, index == last),
    };
    show_screen(bot, chat, session, card).await?;
  }
  info!(user_id = session.user_id, mode = ?mode, count = shown.len(), "sent activity list");
  Ok(Next::Menu)
}

async fn show_ticket(
  bot: &Bot,
  ctx: &SharedContext,
  me: &Me,
  chat: ChatId,
  session: &mut Session,
) -> Result<Next, FlowError> {
  let activity = current_activity(ctx, session, session.list_mode()).await?;
  if activity.quantity <= 0 {
    return Err(FlowError::Forbidden);
  }
  let ticket = TicketRef {
    client_id: session.user_id,
    activity_id: activity.activity_id,
  };
  let link = format!("https://t.me/{}?start={ticket}", me.username());
  let screen = views::ticket(&activity, &link, &session.history);
  show_screen(bot, chat, session, screen).await?;
  Ok(Next::Menu)
}

async fn show_booking_sheet(
  bot: &Bot,
  ctx: &SharedContext,
  chat: ChatId,
  session: &mut Session,
) -> Result<Next, FlowError> {
  session.pending = None;
  let activity = current_activity(ctx, session, session.list_mode()).await?;
  let choice = booking::quantity_choice(
    activity.left_places,
    activity.quantity,
    ctx.settings().limits.max_per_user,
  );
  let screen = views::booking_sheet(&activity, &session.specname, &choice, &session.history);
  show_screen(bot, chat, session, screen).await?;
  Ok(Next::Menu)
}

async fn show_booking_confirm(
  bot: &Bot,
  ctx: &SharedContext,
  chat: ChatId,
  session: &mut Session,
) -> Result<Next, FlowError> {
  let quantity = session.history.current().required_value::<i32>()?;
  let activity_id = session
    .history
    .prev()
    .filter(|prev| prev.button == Button::Book)
    .and_then(|prev| prev.value_as::<i64>())
    .ok_or_else(|| PayloadError::MalformedValue(session.history.to_string()))?;

  let activity = find_activity(ctx, session.list_mode(), session.user_id, activity_id).await?;
  if quantity < 0 || (quantity == 0 && activity.quantity == 0) {
    return Err(FlowError::Forbidden);
  }
  session.pending = Some(PendingBooking { activity_id, quantity });

  let screen = views::booking_confirm(&activity, &session.specname, quantity, &session.history);
  show_screen(bot, chat, session, screen).await?;
  Ok(Next::Menu)
}

async fn show_booking_result(
  bot: &Bot,
  ctx: &SharedContext,
  chat: ChatId,
  session: &mut Session,
) -> Result<Next, FlowError> {
  let pending = session.pending.take().ok_or(FlowError::Forbidden)?;
  let outcome = booking::request_booking(
    ctx.db(),
    session.list_mode(),
    session.user_id,
    pending.activity_id,
    pending.quantity,
    ctx.settings().limits,
  )
  .await?;
  if let BookingOutcome::AwaitingAdmin { activity, quantity } = &outcome {
    notify_booking_admin(bot, ctx, session, activity, *quantity).await?;
  }

  let screen = views::booking_result(&outcome, &session.history);
  show_screen(bot, chat, session, screen).await?;
  Ok(Next::Menu)
}

async fn notify_booking_admin(
  bot: &Bot,
  ctx: &SharedContext,
  session: &Session,
  activity: &ActivityRow,
  quantity: i32,
) -> Result<(), FlowError> {
  let Some(admin_chat) = ctx.settings().booking_admin_chat else {
    return Err(anyhow!("no booking admin chat configured").into());
  };
  let request = AdminRequest::new(AdminVerdict::Accept, session.user_id, activity.activity_id, quantity);
  let screen = views::admin_request(activity, &session.specname, session.username.as_deref(), request);
  send_screen(bot, ChatId(admin_chat), screen).await?;
  info!(
    user_id = session.user_id,
    activity_id = activity.activity_id,
    quantity,
    admin_chat,
    "booking request sent to admin"
  );
  Ok(())
}

async fn show_registrants(
  bot: &Bot,
  ctx: &SharedContext,
  chat: ChatId,
  session: &mut Session,
) -> Result<Next, FlowError> {
  require_admin(ctx, session)?;
  let activity = current_activity(ctx, session, ListMode::Service).await?;
  let rows = ctx.db().list_registrants(activity.activity_id).await?;
  let screen = views::registrants(&activity, &rows, &session.history);
  show_screen(bot, chat, session, screen).await?;
  Ok(Next::Menu)
}

async fn send_reminders(
  bot: &Bot,
  ctx: &SharedContext,
  chat: ChatId,
  session: &mut Session,
) -> Result<Next, FlowError> {
  require_admin(ctx, session)?;
  let activity = current_activity(ctx, session, ListMode::Service).await?;
  let rows = ctx.db().list_registrants(activity.activity_id).await?;
  let text = views::reminder_text(&activity);

  let mut delivered = 0usize;
  for row in &rows {
    match bot.send_message(ChatId(row.client_id), text.clone()).await {
      Ok(_) => delivered += 1,
      Err(err) => warn!(
        error = %err,
        target_user_id = row.client_id,
        activity_id = activity.activity_id,
        "failed to deliver reminder"
      ),
    }
  }
  info!(
    admin_id = session.user_id,
    activity_id = activity.activity_id,
    delivered,
    total = rows.len(),
    "reminders sent"
  );

  let screen = views::reminder_report(delivered, rows.len(), &session.history);
  show_screen(bot, chat, session, screen).await?;
  Ok(Next::Menu)
}

fn is_admin_confirmation(query: CallbackQuery) -> bool {
  query
    .data
    .as_deref()
    .and_then(|data| NavigationStep::parse(data).ok())
    .is_some_and(|step| step.button == Button::AdminConfirmBook)
}

#[instrument(skip(bot, ctx, query))]
async fn handle_admin_confirmation(bot: Bot, ctx: SharedContext, query: CallbackQuery) -> HandlerResult {
  let admin_id = query.from.id.0 as i64;
  if !ctx.is_admin(admin_id) {
    bot.answer_callback_query(query.id.clone()).text("🛡️ Admins only.").await?;
    return Ok(());
  }
  bot.answer_callback_query(query.id.clone()).await?;

  let Some((chat, message_id)) = query.message.as_ref().map(|message| (message.chat().id, message.id())) else {
    warn!(admin_id, "admin confirmation without message context");
    return Ok(());
  };
  let payload = query.data.as_deref().unwrap_or_default();
  info!(admin_id, chat_id = %chat, callback = payload, "handling admin confirmation");

  let screen = match review_admin_payload(&ctx, payload).await {
    Ok((request, outcome)) => admin_outcome_screen(&bot, request, outcome).await,
    Err(err) => {
      warn!(admin_id, error = %err, "admin confirmation failed");
      Screen::plain(views::error_text(err.kind()))
    },
  };
  edit_screen(&bot, chat, message_id, screen).await?;
  Ok(())
}

async fn review_admin_payload(ctx: &SharedContext, payload: &str) -> Result<(AdminRequest, AdminOutcome), FlowError> {
  let step = NavigationStep::parse(payload)?;
  let request = step.value.as_deref().unwrap_or_default().parse::<AdminRequest>()?;
  let outcome = booking::review_request(ctx.db(), request).await?;
  Ok((request, outcome))
}

async fn admin_outcome_screen(bot: &Bot, request: AdminRequest, outcome: AdminOutcome) -> Screen {
  match outcome {
    AdminOutcome::Declined => {
      notify_applicant(bot, request.client_id, false).await;
      views::admin_declined(request.client_id)
    },
    AdminOutcome::Registered { quantity } => {
      notify_applicant(bot, request.client_id, true).await;
      views::admin_registered(request.client_id, quantity)
    },
    AdminOutcome::NeedsForce { activity, overbook } => {
      info!(client_id = request.client_id, overbook, "admin asked to force the registration");
      views::admin_force(&activity, overbook, request)
    },
  }
}

async fn notify_applicant(bot: &Bot, client_id: i64, accepted: bool) {
  if let Err(err) = bot
    .send_message(ChatId(client_id), views::admin_response_text(accepted))
    .await
  {
    warn!(error = %err, target_user_id = client_id, "failed to notify applicant");
  }
}

async fn send_redemption_result(bot: &Bot, ctx: &SharedContext, chat: ChatId, payload: &str) -> HandlerResult {
  let text = match redeem_ticket_link(ctx, payload).await {
    Ok(activity) => views::ticket_info(&activity),
    Err(err) => {
      warn!(payload, error = %err, "ticket redemption failed");
      views::error_text(err.kind()).to_string()
    },
  };
  bot.send_message(chat, text).await?;
  Ok(())
}

async fn redeem_ticket_link(ctx: &SharedContext, payload: &str) -> Result<ActivityRow, FlowError> {
  let ticket = payload.parse::<TicketRef>()?;
  booking::redeem(ctx.db(), ticket).await
}

fn require_admin(ctx: &SharedContext, session: &Session) -> Result<(), FlowError> {
  if ctx.is_admin(session.user_id) {
    Ok(())
  } else {
    Err(FlowError::Forbidden)
  }
}

async fn current_activity(ctx: &SharedContext, session: &Session, mode: ListMode) -> Result<ActivityRow, FlowError> {
  let activity_id = session.history.current().required_value::<i64>()?;
  find_activity(ctx, mode, session.user_id, activity_id).await
}

async fn find_activity(
  ctx: &SharedContext,
  mode: ListMode,
  user_id: i64,
  activity_id: i64,
) -> Result<ActivityRow, FlowError> {
  ctx
    .db()
    .find_activity(mode, user_id, activity_id)
    .await?
    .ok_or(FlowError::Unavailable)
}

/// Shows the error screen and ends the conversation.
async fn fail(
  bot: &Bot,
  dialogue: &BotDialogue,
  chat: ChatId,
  session: Option<&mut Session>,
  err: FlowError,
) -> HandlerResult {
  let kind = err.kind();
  warn!(chat_id = %chat, kind = ?kind, error = %err, "conversation aborted");
  if let Some(session) = session {
    clear_screen(bot, chat, session).await;
  }
  dialogue.exit().await?;
  bot.send_message(chat, views::error_text(kind)).await?;
  Ok(())
}

async fn close_conversation(bot: &Bot, dialogue: &BotDialogue, chat: ChatId) -> HandlerResult {
  match dialogue.get().await? {
    Some(ConversationState::Menu(mut session)) => clear_screen(bot, chat, &mut session).await,
    Some(ConversationState::FirstMet { prompt: Some(prompt) }) => delete_quietly(bot, chat, prompt).await,
    _ => {},
  }
  dialogue.exit().await?;
  Ok(())
}

async fn send_screen(bot: &Bot, chat: ChatId, screen: Screen) -> Result<Message, RequestError> {
  let mut request = bot.send_message(chat, screen.text);
  if let Some(keyboard) = screen.keyboard {
    request = request.reply_markup(keyboard);
  }
  if screen.markdown {
    request = request.parse_mode(ParseMode::MarkdownV2);
  }
  request.await
}

/// Sends a screen message and remembers it for the next cleanup.
async fn show_screen(bot: &Bot, chat: ChatId, session: &mut Session, screen: Screen) -> Result<(), RequestError> {
  let sent = send_screen(bot, chat, screen).await?;
  session.last_messages.push(sent.id);
  Ok(())
}

async fn edit_screen(bot: &Bot, chat: ChatId, message_id: MessageId, screen: Screen) -> Result<(), RequestError> {
  let mut request = bot.edit_message_text(chat, message_id, screen.text);
  if let Some(keyboard) = screen.keyboard {
    request = request.reply_markup(keyboard);
  }
  if screen.markdown {
    request = request.parse_mode(ParseMode::MarkdownV2);
  }
  match request.await {
    Ok(_) => Ok(()),
    Err(RequestError::Api(ApiError::MessageNotModified)) => {
      info!(chat_id = %chat, message_id = %message_id, "message already current");
      Ok(())
    },
    Err(err) => Err(err),
  }
}

async fn clear_screen(bot: &Bot, chat: ChatId, session: &mut Session) {
  for message_id in session.take_messages() {
    delete_quietly(bot, chat, message_id).await;
  }
}

async fn delete_quietly(bot: &Bot, chat: ChatId, message_id: MessageId) {
  if let Err(err) = bot.delete_message(chat, message_id).await {
    warn!(error = %err, chat_id = %chat, message_id = %message_id, "failed to delete message");
  }
}

async fn ensure_user_record(ctx: &SharedContext, user: &User) -> anyhow::Result<()> {
  ctx
    .db()
    .upsert_client(
      user.id.0 as i64,
      user.username.clone(),
      Some(user.first_name.clone()),
      user.last_name.clone(),
    )
    .await
    .context("failed to upsert client record")
}
