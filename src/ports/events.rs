//! Events Port - Change Notifications
//!
//! The engine announces what changed after each successful mutation.
//! Delivery is fire-and-forget: a sink must never block and can never fail
//! the mutation that produced the event.

use serde::Serialize;

use crate::domain::ids::UserId;

/// A change announced to connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MarketEvent {
  /// The prediction list or a prediction's odds changed.
  Predictions,
  /// Balances changed.
  Leaderboard,
  /// Bets changed. `user_id` is `None` when every user may be affected.
  Bets {
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<UserId>,
  },
  /// A user earned an achievement. Raised by the rewards collaborator,
  /// never by the engine itself.
  Achievement {
    user_id: UserId,
    achievement_id: String,
  },
}

impl MarketEvent {
  /// Bets of one user changed.
  pub fn bets_of(user_id: impl Into<UserId>) -> Self {
    Self::Bets {
      user_id: Some(user_id.into()),
    }
  }

  /// Bets of potentially every user changed.
  pub fn all_bets() -> Self {
    Self::Bets { user_id: None }
  }

  /// User this event is addressed to. `None` means broadcast.
  pub fn recipient(&self) -> Option<&str> {
    match self {
      Self::Predictions | Self::Leaderboard => None,
      Self::Bets { user_id } => user_id.as_deref(),
      Self::Achievement { user_id, .. } => Some(user_id),
    }
  }

  /// Stable label, used for metrics.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Predictions => "predictions",
      Self::Leaderboard => "leaderboard",
      Self::Bets { .. } => "bets",
      Self::Achievement { .. } => "achievement",
    }
  }
}

/// Receiver of market events.
pub trait EventSink: Send + Sync + 'static {
  fn emit(&self, event: MarketEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
  fn emit(&self, _event: MarketEvent) {}
}
