//! Predictions, choices and pari-mutuel odds.
//!
//! Odds are a pure projection of a prediction plus its bets and are never
//! stored. Multipliers are expressed in basis points of the stake:
//! 100 = 1.0x, 250 = 2.5x, 400 = 4.0x.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bet::{Bet, BetStatus};
use super::ids::{ChoiceId, PredictionId};
use super::snapshot::empty_as_none;

/// Break-even multiplier in basis points.
pub const BREAK_EVEN_BPS: i64 = 100;

/// Minimum number of choices a prediction must offer.
pub const MIN_CHOICES: usize = 2;

/// Lifecycle of a prediction.
///
/// `open -> closed -> decided`, and `void` from any other state.
/// `decided` and `void` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    /// Players can still place and raise bets.
    Open,
    /// Betting is over; the outcome is not known yet.
    Closed,
    /// The outcome is known and winners have been paid.
    Decided,
    /// Invalidated; every token movement has been reversed.
    Void,
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Decided => write!(f, "decided"),
            Self::Void => write!(f, "void"),
        }
    }
}

/// One selectable outcome of a prediction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionChoice {
    #[serde(default)]
    pub id: ChoiceId,
    #[serde(rename = "name")]
    pub label: String,
}

impl PredictionChoice {
    pub fn new(id: impl Into<ChoiceId>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: PredictionId,
    pub created_at: DateTime<Utc>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: PredictionStatus,
    #[serde(default, with = "empty_as_none")]
    pub closes_at: Option<DateTime<Utc>>,
    pub choices: Vec<PredictionChoice>,
    #[serde(default, with = "empty_as_none")]
    pub winning_choice_id: Option<ChoiceId>,
    #[serde(default)]
    pub odds_visible_before_bet: bool,
}

impl Prediction {
    /// Look up a choice by id.
    pub fn choice(&self, choice_id: &str) -> Option<&PredictionChoice> {
        self.choices.iter().find(|c| c.id == choice_id)
    }

    pub fn has_choice(&self, choice_id: &str) -> bool {
        self.choice(choice_id).is_some()
    }

    /// True once the close time has passed for a still-open prediction.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == PredictionStatus::Open && self.closes_at.is_some_and(|t| now >= t)
    }

    /// Aggregate the pool over `bets`, ignoring voided bets and bets that
    /// belong to other predictions.
    pub fn odds<'a, I>(&self, bets: I) -> PredictionOdds
    where
        I: IntoIterator<Item = &'a Bet>,
    {
        let mut per_choice: HashMap<&str, ChoiceOdds> = self
            .choices
            .iter()
            .map(|c| (c.id.as_str(), ChoiceOdds::empty(&c.id)))
            .collect();

        let mut total_tokens_placed = 0i64;
        let mut total_bets_placed = 0usize;

        for bet in bets {
            if bet.prediction_id != self.id || bet.status == BetStatus::Voided {
                continue;
            }
            total_tokens_placed = total_tokens_placed.saturating_add(bet.amount);
            total_bets_placed += 1;
            if let Some(choice) = per_choice.get_mut(bet.choice_id.as_str()) {
                choice.tokens_placed = choice.tokens_placed.saturating_add(bet.amount);
                choice.bets_placed += 1;
            }
        }

        let choices = self
            .choices
            .iter()
            .map(|c| {
                let mut odds = per_choice
                    .remove(c.id.as_str())
                    .unwrap_or_else(|| ChoiceOdds::empty(&c.id));
                odds.odds_basis_points = odds_basis_points(total_tokens_placed, odds.tokens_placed);
                odds
            })
            .collect();

        PredictionOdds {
            total_tokens_placed,
            total_bets_placed,
            choices,
        }
    }
}

/// Multiplier in basis points for a choice holding `on_choice` out of a
/// `pool`. Zero when nothing is staked on the choice yet.
pub fn odds_basis_points(pool: i64, on_choice: i64) -> i64 {
    if on_choice <= 0 {
        return 0;
    }
    let bps = i128::from(pool) * i128::from(BREAK_EVEN_BPS) / i128::from(on_choice);
    i64::try_from(bps).unwrap_or(i64::MAX)
}

/// Payout for a winning stake at `multiplier_bps`, rounded down.
pub fn payout(stake: i64, multiplier_bps: i64) -> i64 {
    let paid = i128::from(stake) * i128::from(multiplier_bps) / i128::from(BREAK_EVEN_BPS);
    i64::try_from(paid).unwrap_or(i64::MAX)
}

/// Pool aggregates of a prediction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionOdds {
    pub total_tokens_placed: i64,
    pub total_bets_placed: usize,
    pub choices: Vec<ChoiceOdds>,
}

impl PredictionOdds {
    pub fn for_choice(&self, choice_id: &str) -> Option<&ChoiceOdds> {
        self.choices
            .iter()
            .find(|c| c.prediction_choice_id == choice_id)
    }
}

/// Pool aggregates of one choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOdds {
    pub prediction_choice_id: ChoiceId,
    pub tokens_placed: i64,
    pub bets_placed: usize,
    /// Payout multiplier (100 = 1x). 0 means no bets on this choice yet.
    pub odds_basis_points: i64,
}

impl ChoiceOdds {
    fn empty(choice_id: &str) -> Self {
        Self {
            prediction_choice_id: choice_id.to_string(),
            tokens_placed: 0,
            bets_placed: 0,
            odds_basis_points: 0,
        }
    }
}

/// A prediction together with its current odds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PredictionWithOdds {
    pub prediction: Prediction,
    pub odds: PredictionOdds,
}

/// Admin input for a new prediction.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPrediction {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, with = "empty_as_none")]
    pub closes_at: Option<DateTime<Utc>>,
    pub choices: Vec<PredictionChoice>,
    #[serde(default)]
    pub odds_visible_before_bet: bool,
}

/// Admin edit of an open prediction. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictionUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    /// `Some(None)` clears the close time.
    pub closes_at: Option<Option<DateTime<Utc>>>,
    pub odds_visible_before_bet: Option<bool>,
}

impl PredictionUpdate {
    pub fn apply_to(self, prediction: &mut Prediction) {
        if let Some(name) = self.name {
            prediction.name = name;
        }
        if let Some(description) = self.description {
            prediction.description = description;
        }
        if let Some(closes_at) = self.closes_at {
            prediction.closes_at = closes_at;
        }
        if let Some(visible) = self.odds_visible_before_bet {
            prediction.odds_visible_before_bet = visible;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction() -> Prediction {
        Prediction {
            id: "p1".into(),
            created_at: Utc::now(),
            name: "Who wins the bake-off?".into(),
            description: String::new(),
            status: PredictionStatus::Open,
            closes_at: None,
            choices: vec![
                PredictionChoice::new("a", "Alice"),
                PredictionChoice::new("b", "Bob"),
            ],
            winning_choice_id: None,
            odds_visible_before_bet: false,
        }
    }

    fn bet(id: &str, choice: &str, amount: i64, status: BetStatus) -> Bet {
        Bet {
            id: id.into(),
            created_at: Utc::now(),
            user_id: format!("user-{id}"),
            prediction_id: "p1".into(),
            choice_id: choice.into(),
            amount,
            status,
            won_amount: 0,
        }
    }

    #[test]
    fn test_odds_saturate_on_huge_pools() {
        let p = prediction();
        let bets = vec![
            bet("1", "a", i64::MAX, BetStatus::Placed),
            bet("2", "b", i64::MAX, BetStatus::Placed),
        ];
        let odds = p.odds(&bets);
        assert_eq!(odds.total_tokens_placed, i64::MAX);
        assert_eq!(odds.for_choice("a").unwrap().odds_basis_points, 100);
    }

    #[test]
    fn test_odds_100_vs_300() {
        let p = prediction();
        let bets = vec![
            bet("1", "a", 100, BetStatus::Placed),
            bet("2", "b", 300, BetStatus::Placed),
        ];

        let odds = p.odds(&bets);
        assert_eq!(odds.total_tokens_placed, 400);
        assert_eq!(odds.total_bets_placed, 2);
        assert_eq!(odds.for_choice("a").unwrap().odds_basis_points, 400);
        assert_eq!(odds.for_choice("b").unwrap().odds_basis_points, 133);

        // Pure: same input, same output.
        assert_eq!(odds, p.odds(&bets));
    }

    #[test]
    fn test_odds_zero_when_choice_empty() {
        let p = prediction();
        let bets = vec![bet("1", "a", 50, BetStatus::Placed)];
        let odds = p.odds(&bets);
        assert_eq!(odds.for_choice("a").unwrap().odds_basis_points, 100);
        assert_eq!(odds.for_choice("b").unwrap().odds_basis_points, 0);
        assert_eq!(odds.for_choice("b").unwrap().bets_placed, 0);
    }

    #[test]
    fn test_odds_ignore_voided_and_foreign_bets() {
        let p = prediction();
        let mut foreign = bet("3", "a", 1_000, BetStatus::Placed);
        foreign.prediction_id = "other".into();
        let bets = vec![
            bet("1", "a", 100, BetStatus::Placed),
            bet("2", "b", 100, BetStatus::Voided),
            foreign,
        ];
        let odds = p.odds(&bets);
        assert_eq!(odds.total_tokens_placed, 100);
        assert_eq!(odds.total_bets_placed, 1);
    }

    #[test]
    fn test_choice_order_preserved() {
        let p = prediction();
        let odds = p.odds(std::iter::empty());
        let ids: Vec<_> = odds
            .choices
            .iter()
            .map(|c| c.prediction_choice_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_payout_rounds_down() {
        assert_eq!(payout(100, 400), 400);
        assert_eq!(payout(300, 133), 399);
        assert_eq!(payout(7, 150), 10);
    }

    #[test]
    fn test_is_expired() {
        let mut p = prediction();
        let now = Utc::now();
        assert!(!p.is_expired(now));

        p.closes_at = Some(now - chrono::Duration::minutes(1));
        assert!(p.is_expired(now));

        p.status = PredictionStatus::Closed;
        assert!(!p.is_expired(now));
    }

    #[test]
    fn test_update_applies_only_given_fields() {
        let mut p = prediction();
        PredictionUpdate {
            name: Some("Renamed".into()),
            closes_at: Some(Some(Utc::now())),
            ..Default::default()
        }
        .apply_to(&mut p);
        assert_eq!(p.name, "Renamed");
        assert!(p.closes_at.is_some());
        assert!(!p.odds_visible_before_bet);
    }

    #[test]
    fn test_prediction_accepts_empty_optional_strings() {
        let json = r#"{
            "id": "p1",
            "created_at": "2025-06-01T18:00:00Z",
            "name": "Rain?",
            "description": "",
            "status": "open",
            "closes_at": "",
            "choices": [{"id": "y", "name": "Yes"}, {"id": "n", "name": "No"}],
            "winning_choice_id": "",
            "odds_visible_before_bet": true
        }"#;
        let p: Prediction = serde_json::from_str(json).unwrap();
        assert_eq!(p.closes_at, None);
        assert_eq!(p.winning_choice_id, None);
        assert_eq!(p.choices[1].label, "No");
    }
}
