//! Bets placed by players on predictions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{BetId, ChoiceId, PredictionId, UserId};

/// Lifecycle of a bet. Everything except `Placed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Placed,
    Won,
    Lost,
    Voided,
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Placed => write!(f, "placed"),
            Self::Won => write!(f, "won"),
            Self::Lost => write!(f, "lost"),
            Self::Voided => write!(f, "voided"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub created_at: DateTime<Utc>,
    pub user_id: UserId,
    pub prediction_id: PredictionId,
    #[serde(rename = "prediction_choice_id")]
    pub choice_id: ChoiceId,
    pub amount: i64,
    pub status: BetStatus,
    /// Realized payout; 0 unless the bet won.
    #[serde(default)]
    pub won_amount: i64,
}

impl Bet {
    pub fn is_active(&self) -> bool {
        self.status == BetStatus::Placed
    }
}

/// Player input for a new bet.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceBet {
    pub user_id: UserId,
    pub prediction_id: PredictionId,
    #[serde(rename = "prediction_choice_id")]
    pub choice_id: ChoiceId,
    pub amount: i64,
}
