//! Market Engine Use Case - Serialized Access to the Market State
//!
//! Wraps [`MarketState`] in a single `tokio::sync::RwLock`. Every mutating
//! operation holds the write lock for its whole duration, every query the
//! read lock, so each call is one atomic transaction and readers never see
//! an intermediate state. Nothing awaits while a guard is held except lock
//! acquisition itself.
//!
//! After a mutation commits and the guard is released, the engine emits
//! change events through the [`EventSink`] port. Delivery is
//! fire-and-forget and cannot affect the outcome of the call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::bet::{Bet, PlaceBet};
use crate::domain::credentials;
use crate::domain::error::MarketError;
use crate::domain::ids::{self, PredictionId, SessionToken, UserId};
use crate::domain::ledger::TokenLogEntry;
use crate::domain::prediction::{NewPrediction, Prediction, PredictionUpdate, PredictionWithOdds};
use crate::domain::snapshot::StateSnapshot;
use crate::domain::state::{LedgerMismatch, MarketState, MarketStats, Settlement, VoidOutcome};
use crate::domain::user::{self, LeaderboardEntry, User};
use crate::ports::events::{EventSink, MarketEvent};

/// A freshly issued session together with its (redacted) user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthSession {
  pub token: SessionToken,
  pub user: User,
}

/// The ledger-and-settlement engine.
///
/// Users handed out by the engine never carry their credential hash.
pub struct MarketEngine {
  state: RwLock<MarketState>,
  events: Arc<dyn EventSink>,
  /// Tokens granted to every newly registered player.
  starting_tokens: i64,
}

impl MarketEngine {
  /// Create an engine over an empty market.
  pub fn new(events: Arc<dyn EventSink>, starting_tokens: i64) -> Self {
    Self::with_state(MarketState::new(), events, starting_tokens)
  }

  /// Create an engine over existing state.
  pub fn with_state(state: MarketState, events: Arc<dyn EventSink>, starting_tokens: i64) -> Self {
    Self {
      state: RwLock::new(state),
      events,
      starting_tokens,
    }
  }

  fn emit(&self, events: impl IntoIterator<Item = MarketEvent>) {
    for event in events {
      self.events.emit(event);
    }
  }

  // Users and sessions

  /// Register a player and open a session for them.
  #[instrument(skip(self, pin))]
  pub async fn register(&self, name: &str, pin: &str) -> Result<AuthSession, MarketError> {
    user::validate_name(name).inspect_err(|e| rejected("register", e))?;
    if pin.is_empty() {
      return Err(MarketError::MissingField("pin"));
    }

    let candidate = User::new(ids::new_id(), name, credentials::hash_pin(pin), false);
    let session = {
      let mut state = self.state.write().await;
      state
        .add_user(candidate, self.starting_tokens)
        .and_then(|user| {
          let token = state.create_session(&user.id)?;
          Ok(AuthSession {
            token,
            user: user.redacted(),
          })
        })
    }
    .inspect_err(|e| rejected("register", e))?;

    info!(user_id = %session.user.id, tokens = session.user.tokens, "User registered");
    self.emit([MarketEvent::Leaderboard]);
    Ok(session)
  }

  /// Create an admin account with an empty balance.
  #[instrument(skip(self, pin))]
  pub async fn create_admin(&self, name: &str, pin: &str) -> Result<User, MarketError> {
    let candidate = User::new(ids::new_id(), name, credentials::hash_pin(pin), true);
    let admin = self.state.write().await.add_user(candidate, 0)?;
    info!(user_id = %admin.id, "Admin user created");
    Ok(admin.redacted())
  }

  /// Check a name/PIN pair and open a session. Every failure looks the same.
  #[instrument(skip(self, pin))]
  pub async fn login(&self, name: &str, pin: &str) -> Result<AuthSession, MarketError> {
    let (user, token) = {
      let mut state = self.state.write().await;
      let user = state
        .user_by_name(name)
        .filter(|u| credentials::verify_pin(&u.pin_hash, pin))
        .cloned()
        .ok_or(MarketError::InvalidCredentials)
        .inspect_err(|e| rejected("login", e))?;
      let token = state.create_session(&user.id)?;
      (user, token)
    };
    debug!(user_id = %user.id, "User logged in");
    Ok(AuthSession {
      token,
      user: user.redacted(),
    })
  }

  /// Resolve a session token to a user id.
  pub async fn user_id_by_session(&self, token: &str) -> Option<UserId> {
    self.state.read().await.user_id_by_session(token).cloned()
  }

  /// Resolve a session token to its user.
  pub async fn authenticate(&self, token: &str) -> Result<User, MarketError> {
    let state = self.state.read().await;
    let user_id = state
      .user_id_by_session(token)
      .ok_or(MarketError::InvalidCredentials)?;
    state.get_user(user_id).map(User::redacted)
  }

  pub async fn get_user(&self, user_id: &str) -> Result<User, MarketError> {
    self.state.read().await.get_user(user_id).map(User::redacted)
  }

  pub async fn list_users(&self) -> Vec<User> {
    self.state.read().await.users().map(User::redacted).collect()
  }

  #[instrument(skip(self, pin))]
  pub async fn reset_pin(&self, user_id: &str, pin: &str) -> Result<(), MarketError> {
    if pin.is_empty() {
      return Err(MarketError::MissingField("pin"));
    }
    let pin_hash = credentials::hash_pin(pin);
    self
      .state
      .write()
      .await
      .update_pin(user_id, pin_hash)
      .inspect_err(|e| rejected("reset_pin", e))?;
    info!(user_id, "PIN reset");
    Ok(())
  }

  /// Admin gift: credit `amount` tokens to a user.
  #[instrument(skip(self))]
  pub async fn gift_tokens(&self, user_id: &str, amount: i64) -> Result<TokenLogEntry, MarketError> {
    let entry = self
      .state
      .write()
      .await
      .gift_tokens(user_id, amount)
      .inspect_err(|e| rejected("gift_tokens", e))?;
    info!(user_id, amount, "Tokens gifted");
    self.emit([MarketEvent::Leaderboard]);
    Ok(entry)
  }

  pub async fn leaderboard(&self) -> Vec<LeaderboardEntry> {
    self.state.read().await.leaderboard()
  }

  /// A user's ledger history, newest first.
  pub async fn token_history(&self, user_id: &str) -> Result<Vec<TokenLogEntry>, MarketError> {
    let state = self.state.read().await;
    state.get_user(user_id)?;
    Ok(state.entries_for_user(user_id))
  }

  // Predictions

  #[instrument(skip(self, new), fields(name = %new.name))]
  pub async fn create_prediction(&self, new: NewPrediction) -> Result<Prediction, MarketError> {
    let prediction = self
      .state
      .write()
      .await
      .create_prediction(new)
      .inspect_err(|e| rejected("create_prediction", e))?;
    info!(prediction_id = %prediction.id, choices = prediction.choices.len(), "Prediction created");
    self.emit([MarketEvent::Predictions]);
    Ok(prediction)
  }

  #[instrument(skip(self, update))]
  pub async fn update_prediction(
    &self,
    prediction_id: &str,
    update: PredictionUpdate,
  ) -> Result<Prediction, MarketError> {
    let prediction = self
      .state
      .write()
      .await
      .update_prediction(prediction_id, update)
      .inspect_err(|e| rejected("update_prediction", e))?;
    info!(prediction_id, "Prediction updated");
    self.emit([MarketEvent::Predictions]);
    Ok(prediction)
  }

  #[instrument(skip(self))]
  pub async fn close_prediction(&self, prediction_id: &str) -> Result<(), MarketError> {
    self
      .state
      .write()
      .await
      .close_prediction(prediction_id)
      .inspect_err(|e| rejected("close_prediction", e))?;
    info!(prediction_id, "Prediction closed");
    self.emit([MarketEvent::Predictions]);
    Ok(())
  }

  /// Close every open prediction whose close time is at or before `now`.
  ///
  /// Returns the ids actually closed. Emits a single "predictions changed"
  /// event if anything closed.
  #[instrument(skip(self))]
  pub async fn close_expired(&self, now: DateTime<Utc>) -> Vec<PredictionId> {
    let mut closed = Vec::new();
    {
      let mut state = self.state.write().await;
      for prediction_id in state.expired_predictions(now) {
        match state.close_prediction(&prediction_id) {
          Ok(()) => {
            info!(prediction_id = %prediction_id, "Sweep closed prediction");
            closed.push(prediction_id);
          }
          Err(e) => warn!(prediction_id = %prediction_id, error = %e, "Sweep failed to close prediction"),
        }
      }
    }
    if !closed.is_empty() {
      self.emit([MarketEvent::Predictions]);
    }
    closed
  }

  /// Settle a closed prediction in favour of `winning_choice_id`.
  #[instrument(skip(self))]
  pub async fn decide_prediction(
    &self,
    prediction_id: &str,
    winning_choice_id: &str,
  ) -> Result<Settlement, MarketError> {
    let settlement = self
      .state
      .write()
      .await
      .decide_prediction(prediction_id, winning_choice_id)
      .inspect_err(|e| rejected("decide_prediction", e))?;
    info!(
      prediction_id,
      winning_choice_id,
      odds_bps = settlement.winning_odds_bps,
      winners = settlement.winners.len(),
      losers = settlement.losers,
      paid_out = settlement.paid_out(),
      "Prediction decided"
    );
    self.emit([
      MarketEvent::Predictions,
      MarketEvent::Leaderboard,
      MarketEvent::all_bets(),
    ]);
    Ok(settlement)
  }

  /// Void a prediction and reverse all of its token movements.
  #[instrument(skip(self))]
  pub async fn void_prediction(&self, prediction_id: &str) -> Result<VoidOutcome, MarketError> {
    let outcome = self
      .state
      .write()
      .await
      .void_prediction(prediction_id)
      .inspect_err(|e| rejected("void_prediction", e))?;
    if outcome.already_void {
      debug!(prediction_id, "Prediction already void");
      return Ok(outcome);
    }
    info!(
      prediction_id,
      reversed = outcome.reversed_entries,
      bets = outcome.bets_voided,
      "Prediction voided"
    );
    self.emit([
      MarketEvent::Predictions,
      MarketEvent::Leaderboard,
      MarketEvent::all_bets(),
    ]);
    Ok(outcome)
  }

  pub async fn get_prediction(&self, prediction_id: &str) -> Result<Prediction, MarketError> {
    self.state.read().await.get_prediction(prediction_id).cloned()
  }

  /// Every prediction, newest first.
  pub async fn list_predictions(&self) -> Vec<Prediction> {
    let mut predictions: Vec<Prediction> = self.state.read().await.predictions().cloned().collect();
    predictions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    predictions
  }

  /// Every prediction with its live odds, newest first.
  pub async fn list_predictions_with_odds(&self) -> Vec<PredictionWithOdds> {
    self.state.read().await.predictions_with_odds()
  }

  pub async fn get_prediction_with_odds(
    &self,
    prediction_id: &str,
  ) -> Result<PredictionWithOdds, MarketError> {
    self.state.read().await.prediction_with_odds(prediction_id)
  }

  // Bets

  #[instrument(skip(self, request), fields(user_id = %request.user_id, prediction_id = %request.prediction_id, amount = request.amount))]
  pub async fn place_bet(&self, request: PlaceBet) -> Result<Bet, MarketError> {
    let bet = self
      .state
      .write()
      .await
      .place_bet(request)
      .inspect_err(|e| rejected("place_bet", e))?;
    info!(bet_id = %bet.id, choice_id = %bet.choice_id, "Bet placed");
    self.emit([
      MarketEvent::Predictions,
      MarketEvent::Leaderboard,
      MarketEvent::bets_of(bet.user_id.clone()),
    ]);
    Ok(bet)
  }

  /// Raise a bet owned by `user_id` to `to` tokens.
  ///
  /// A bet owned by someone else is reported as not found.
  #[instrument(skip(self))]
  pub async fn increase_bet(&self, user_id: &str, bet_id: &str, to: i64) -> Result<Bet, MarketError> {
    let increase = {
      let mut state = self.state.write().await;
      let owned = state.get_bet(bet_id).is_ok_and(|b| b.user_id == user_id);
      if owned {
        state.increase_bet(bet_id, to)
      } else {
        Err(MarketError::BetNotFound(bet_id.to_string()))
      }
    }
    .inspect_err(|e| rejected("increase_bet", e))?;

    if increase.debited == 0 {
      debug!(bet_id, amount = to, "Bet already at requested amount");
      return Ok(increase.bet);
    }
    info!(bet_id, amount = to, debited = increase.debited, "Bet increased");
    self.emit([
      MarketEvent::Predictions,
      MarketEvent::Leaderboard,
      MarketEvent::bets_of(user_id),
    ]);
    Ok(increase.bet)
  }

  pub async fn get_bet(&self, bet_id: &str) -> Result<Bet, MarketError> {
    self.state.read().await.get_bet(bet_id).cloned()
  }

  /// A user's bets, newest first.
  pub async fn bets_for_user(&self, user_id: &str) -> Vec<Bet> {
    self.state.read().await.bets_for_user(user_id)
  }

  pub async fn bets_for_prediction(&self, prediction_id: &str) -> Vec<Bet> {
    self
      .state
      .read()
      .await
      .bets_for_prediction(prediction_id)
      .into_iter()
      .cloned()
      .collect()
  }

  // Snapshots and introspection

  /// Consistent point-in-time copy of the whole state, taken under the
  /// write lock. Clears the dirty flag.
  pub async fn export(&self) -> StateSnapshot {
    self.state.write().await.export()
  }

  /// Encode [`Self::export`] as bytes.
  pub async fn export_bytes(&self) -> anyhow::Result<Vec<u8>> {
    let snapshot = self.export().await;
    Ok(snapshot.encode()?)
  }

  /// Replace the whole state with a snapshot.
  #[instrument(skip(self, snapshot), fields(users = snapshot.users.len(), entries = snapshot.token_log.len()))]
  pub async fn import(&self, snapshot: StateSnapshot) {
    let restored = MarketState::from_snapshot(snapshot);
    let mismatches = restored.ledger_mismatches();
    *self.state.write().await = restored;

    report_mismatches(&mismatches);
    info!("Market state imported");
    self.emit([
      MarketEvent::Predictions,
      MarketEvent::Leaderboard,
      MarketEvent::all_bets(),
    ]);
  }

  /// Decode and import a snapshot.
  pub async fn import_bytes(&self, bytes: &[u8]) -> anyhow::Result<()> {
    let snapshot = StateSnapshot::decode(bytes)?;
    self.import(snapshot).await;
    Ok(())
  }

  pub async fn is_dirty(&self) -> bool {
    self.state.read().await.is_dirty()
  }

  pub async fn mark_dirty(&self) {
    self.state.write().await.mark_dirty();
  }

  pub async fn stats(&self) -> MarketStats {
    self.state.read().await.stats()
  }

  /// Users whose balance disagrees with their ledger. Empty when healthy.
  pub async fn ledger_mismatches(&self) -> Vec<LedgerMismatch> {
    self.state.read().await.ledger_mismatches()
  }
}

/// Log a failed operation: faults loudly, ordinary rejections quietly.
fn rejected(operation: &'static str, err: &MarketError) {
  if err.is_fault() {
    error!(operation, kind = ?err.kind(), error = %err, "Ledger invariant violation, operation aborted");
  } else {
    debug!(operation, kind = ?err.kind(), error = %err, "Operation rejected");
  }
}

fn report_mismatches(mismatches: &[LedgerMismatch]) {
  for m in mismatches {
    error!(
      user_id = %m.user_id,
      balance = m.balance,
      ledger_sum = m.ledger_sum,
      "Balance does not match token log"
    );
  }
}
