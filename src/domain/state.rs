//! Market State - single owner of every collection
//!
//! `MarketState` holds users, predictions, bets, the token log and sessions,
//! and implements every transition of the market as a synchronous method.
//! Each mutating method either succeeds completely or returns an error
//! without having changed anything. Callers provide mutual exclusion; this
//! type has no interior locking.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};

use super::bet::{Bet, BetStatus, PlaceBet};
use super::error::MarketError;
use super::ids::{self, BetId, ChoiceId, EntryId, PredictionId, SessionToken, UserId};
use super::ledger::{self, BetRef, TokenChange, TokenLogEntry};
use super::prediction::{
    self, NewPrediction, Prediction, PredictionStatus, PredictionUpdate, PredictionWithOdds,
    BREAK_EVEN_BPS, MIN_CHOICES,
};
use super::snapshot::StateSnapshot;
use super::user::{self, LeaderboardEntry, User};

/// Result of deciding a prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub prediction_id: PredictionId,
    pub winning_choice_id: ChoiceId,
    /// Multiplier applied to winning stakes, after clamping.
    pub winning_odds_bps: i64,
    pub winners: Vec<(UserId, i64)>,
    pub losers: usize,
}

impl Settlement {
    pub fn paid_out(&self) -> i64 {
        self.winners.iter().map(|(_, amount)| amount).sum()
    }
}

/// Result of voiding a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoidOutcome {
    /// The prediction was already void; nothing changed.
    pub already_void: bool,
    pub reversed_entries: usize,
    pub bets_voided: usize,
}

/// Result of raising a stake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetIncrease {
    pub bet: Bet,
    /// Tokens debited by this call. 0 when the stake was already at the target.
    pub debited: i64,
}

/// A user whose balance disagrees with the sum of their ledger entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerMismatch {
    pub user_id: UserId,
    pub balance: i64,
    pub ledger_sum: i64,
}

/// Headline numbers for dashboards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarketStats {
    pub users: usize,
    pub open_predictions: usize,
    pub placed_bets: usize,
    pub tokens_in_circulation: i64,
    pub ledger_entries: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MarketState {
    users: BTreeMap<UserId, User>,
    predictions: BTreeMap<PredictionId, Prediction>,
    bets: BTreeMap<BetId, Bet>,
    token_log: BTreeMap<EntryId, TokenLogEntry>,
    sessions: BTreeMap<SessionToken, UserId>,
    dirty: bool,
}

impl MarketState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a snapshot verbatim.
    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            users: snapshot.users,
            predictions: snapshot.predictions,
            bets: snapshot.bets,
            token_log: snapshot.token_log,
            sessions: snapshot.sessions,
            dirty: false,
        }
    }

    /// Point-in-time copy of everything. Clears the dirty flag.
    pub fn export(&mut self) -> StateSnapshot {
        self.dirty = false;
        StateSnapshot {
            users: self.users.clone(),
            predictions: self.predictions.clone(),
            bets: self.bets.clone(),
            token_log: self.token_log.clone(),
            sessions: self.sessions.clone(),
        }
    }

    /// True if anything changed since the last export.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Force the next save, e.g. after an exported snapshot failed to persist.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Apply one entry: adjust the balance, then record the entry.
    fn apply_entry(&mut self, entry: TokenLogEntry) -> Result<(), MarketError> {
        let user = self
            .users
            .get_mut(&entry.user_id)
            .ok_or_else(|| MarketError::UserNotFound(entry.user_id.clone()))?;
        user.tokens = ledger::apply_change(&entry.user_id, user.tokens, entry.change)?;
        self.token_log.insert(entry.id.clone(), entry);
        self.dirty = true;
        Ok(())
    }

    /// Apply a batch all-or-nothing. The whole batch is projected first;
    /// balances and the log are only touched once every entry is known to fit.
    fn apply_batch(&mut self, entries: Vec<TokenLogEntry>) -> Result<(), MarketError> {
        if entries.is_empty() {
            return Ok(());
        }
        let users = &self.users;
        let balances = ledger::project_batch(&entries, |id| users.get(id).map(|u| u.tokens))?;

        for (user_id, balance) in balances {
            if let Some(user) = self.users.get_mut(&user_id) {
                user.tokens = balance;
            }
        }
        for entry in entries {
            self.token_log.insert(entry.id.clone(), entry);
        }
        self.dirty = true;
        Ok(())
    }

    /// Credit `amount` (> 0) to a user as an admin gift.
    pub fn gift_tokens(&mut self, user_id: &str, amount: i64) -> Result<TokenLogEntry, MarketError> {
        if amount <= 0 {
            return Err(MarketError::NonPositiveAmount(amount));
        }
        self.get_user(user_id)?;
        ledger::check_supply(user_id, self.tokens_in_circulation(), amount)?;
        let entry = TokenLogEntry::new(user_id, amount, TokenChange::AdminGift);
        self.apply_entry(entry.clone())?;
        Ok(entry)
    }

    /// A user's ledger history, newest first.
    pub fn entries_for_user(&self, user_id: &str) -> Vec<TokenLogEntry> {
        let mut entries: Vec<TokenLogEntry> = self
            .token_log
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| newest_first(a.created_at, &a.id, b.created_at, &b.id));
        entries
    }

    /// Users whose balance differs from the sum of their ledger entries.
    pub fn ledger_mismatches(&self) -> Vec<LedgerMismatch> {
        let mut sums: HashMap<&str, i128> = HashMap::new();
        for entry in self.token_log.values() {
            *sums.entry(entry.user_id.as_str()).or_default() += i128::from(entry.change);
        }
        self.users
            .values()
            .filter_map(|u| {
                let sum = sums.get(u.id.as_str()).copied().unwrap_or(0);
                (sum != i128::from(u.tokens)).then(|| LedgerMismatch {
                    user_id: u.id.clone(),
                    balance: u.tokens,
                    ledger_sum: clamp_i64(sum),
                })
            })
            .collect()
    }

    /// Sum of every balance. Saturates for imported states beyond `i64`.
    pub fn tokens_in_circulation(&self) -> i64 {
        clamp_i64(self.users.values().map(|u| i128::from(u.tokens)).sum())
    }

    pub fn stats(&self) -> MarketStats {
        MarketStats {
            users: self.users.len(),
            open_predictions: self
                .predictions
                .values()
                .filter(|p| p.status == PredictionStatus::Open)
                .count(),
            placed_bets: self.bets.values().filter(|b| b.is_active()).count(),
            tokens_in_circulation: self.tokens_in_circulation(),
            ledger_entries: self.token_log.len(),
        }
    }

    /// Insert a new user with zero balance, then credit `starting_tokens`
    /// through an initial-grant entry (recorded even when the grant is 0).
    pub fn add_user(&mut self, user: User, starting_tokens: i64) -> Result<User, MarketError> {
        if user.tokens != 0 {
            return Err(MarketError::MustStartEmpty(user.tokens));
        }
        if user.id.is_empty() {
            return Err(MarketError::MissingField("id"));
        }
        if user.name.is_empty() {
            return Err(MarketError::MissingField("name"));
        }
        if self.users.contains_key(&user.id) {
            return Err(MarketError::UserExists(user.id));
        }
        if self.user_by_name(&user.name).is_some() {
            return Err(MarketError::NameTaken(user.name));
        }
        ledger::apply_change(&user.id, 0, starting_tokens)?;
        ledger::check_supply(&user.id, self.tokens_in_circulation(), starting_tokens)?;

        let user_id = user.id.clone();
        self.users.insert(user_id.clone(), user);
        self.apply_entry(TokenLogEntry::new(
            user_id.clone(),
            starting_tokens,
            TokenChange::InitialGrant,
        ))?;
        self.get_user(&user_id).cloned()
    }

    pub fn get_user(&self, user_id: &str) -> Result<&User, MarketError> {
        self.users
            .get(user_id)
            .ok_or_else(|| MarketError::UserNotFound(user_id.to_string()))
    }

    /// Case-insensitive lookup by display name.
    pub fn user_by_name(&self, name: &str) -> Option<&User> {
        self.users.values().find(|u| u.has_name(name))
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn update_pin(&mut self, user_id: &str, pin_hash: Vec<u8>) -> Result<(), MarketError> {
        let user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| MarketError::UserNotFound(user_id.to_string()))?;
        user.pin_hash = pin_hash;
        self.dirty = true;
        Ok(())
    }

    /// Issue a fresh session token for an existing user.
    pub fn create_session(&mut self, user_id: &str) -> Result<SessionToken, MarketError> {
        self.get_user(user_id)?;
        let token = ids::new_session_token();
        self.sessions.insert(token.clone(), user_id.to_string());
        self.dirty = true;
        Ok(token)
    }

    pub fn user_id_by_session(&self, token: &str) -> Option<&UserId> {
        self.sessions.get(token)
    }

    /// Ranked non-admin users.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        user::leaderboard(self.users.values())
    }

    /// Store a prediction record. Replacing an existing record is only
    /// allowed while that record is still open.
    pub fn put_prediction(&mut self, mut prediction: Prediction) -> Result<(), MarketError> {
        if prediction.id.is_empty() {
            return Err(MarketError::MissingField("id"));
        }
        if prediction.name.is_empty() {
            return Err(MarketError::MissingField("name"));
        }
        if prediction.choices.len() < MIN_CHOICES {
            return Err(MarketError::TooFewChoices(prediction.choices.len()));
        }
        if let Some(existing) = self.predictions.get(&prediction.id) {
            if existing.status != PredictionStatus::Open {
                return Err(MarketError::PredictionFinalized(prediction.id));
            }
        }

        for choice in prediction.choices.iter_mut().filter(|c| c.id.is_empty()) {
            choice.id = ids::new_id();
        }
        let unique = {
            let mut seen = HashSet::new();
            prediction.choices.iter().all(|c| seen.insert(c.id.as_str()))
        };
        if !unique {
            return Err(MarketError::InvalidField {
                field: "choices",
                reason: "choice ids must be unique",
            });
        }

        self.predictions.insert(prediction.id.clone(), prediction);
        self.dirty = true;
        Ok(())
    }

    /// Create a new open prediction.
    pub fn create_prediction(&mut self, new: NewPrediction) -> Result<Prediction, MarketError> {
        let prediction = Prediction {
            id: ids::new_id(),
            created_at: ids::now(),
            name: new.name,
            description: new.description,
            status: PredictionStatus::Open,
            closes_at: new.closes_at,
            choices: new.choices,
            winning_choice_id: None,
            odds_visible_before_bet: new.odds_visible_before_bet,
        };
        let id = prediction.id.clone();
        self.put_prediction(prediction)?;
        self.get_prediction(&id).cloned()
    }

    /// Edit the mutable fields of an open prediction. Choices never change.
    pub fn update_prediction(
        &mut self,
        prediction_id: &str,
        update: PredictionUpdate,
    ) -> Result<Prediction, MarketError> {
        let mut prediction = self.get_prediction(prediction_id)?.clone();
        update.apply_to(&mut prediction);
        self.put_prediction(prediction)?;
        self.get_prediction(prediction_id).cloned()
    }

    pub fn get_prediction(&self, prediction_id: &str) -> Result<&Prediction, MarketError> {
        self.predictions
            .get(prediction_id)
            .ok_or_else(|| MarketError::PredictionNotFound(prediction_id.to_string()))
    }

    pub fn predictions(&self) -> impl Iterator<Item = &Prediction> {
        self.predictions.values()
    }

    /// Open predictions whose close time is at or before `now`.
    pub fn expired_predictions(&self, now: DateTime<Utc>) -> Vec<PredictionId> {
        self.predictions
            .values()
            .filter(|p| p.is_expired(now))
            .map(|p| p.id.clone())
            .collect()
    }

    /// `open -> closed`.
    pub fn close_prediction(&mut self, prediction_id: &str) -> Result<(), MarketError> {
        let prediction = self
            .predictions
            .get_mut(prediction_id)
            .ok_or_else(|| MarketError::PredictionNotFound(prediction_id.to_string()))?;
        if prediction.status != PredictionStatus::Open {
            return Err(MarketError::PredictionState {
                id: prediction_id.to_string(),
                expected: PredictionStatus::Open,
                actual: prediction.status,
            });
        }
        prediction.status = PredictionStatus::Closed;
        self.dirty = true;
        Ok(())
    }

    /// `closed -> decided`: pay out winning bets at the final pool odds.
    ///
    /// Every payout entry and bet transition is computed before anything is
    /// written; the payouts are then applied as one batch.
    pub fn decide_prediction(
        &mut self,
        prediction_id: &str,
        winning_choice_id: &str,
    ) -> Result<Settlement, MarketError> {
        let prediction = self.get_prediction(prediction_id)?;
        if prediction.status != PredictionStatus::Closed {
            return Err(MarketError::PredictionState {
                id: prediction_id.to_string(),
                expected: PredictionStatus::Closed,
                actual: prediction.status,
            });
        }
        if !prediction.has_choice(winning_choice_id) {
            return Err(MarketError::ChoiceNotFound {
                prediction_id: prediction_id.to_string(),
                choice_id: winning_choice_id.to_string(),
            });
        }

        let placed: Vec<&Bet> = self
            .bets_for_prediction(prediction_id)
            .into_iter()
            .filter(|b| b.is_active())
            .collect();
        let odds = prediction.odds(placed.iter().copied());
        let winning_odds_bps = odds
            .for_choice(winning_choice_id)
            .map_or(0, |c| c.odds_basis_points)
            .max(BREAK_EVEN_BPS);

        let mut payouts = Vec::new();
        let mut transitions: Vec<(BetId, BetStatus, i64)> = Vec::with_capacity(placed.len());
        let mut winners = Vec::new();
        for bet in &placed {
            if bet.choice_id == winning_choice_id {
                let won = prediction::payout(bet.amount, winning_odds_bps);
                payouts.push(TokenLogEntry::new(
                    bet.user_id.clone(),
                    won,
                    TokenChange::BetWon(BetRef {
                        bet_id: bet.id.clone(),
                        prediction_id: prediction_id.to_string(),
                    }),
                ));
                transitions.push((bet.id.clone(), BetStatus::Won, won));
                winners.push((bet.user_id.clone(), won));
            } else {
                transitions.push((bet.id.clone(), BetStatus::Lost, 0));
            }
        }
        let losers = transitions.len() - winners.len();

        self.apply_batch(payouts)?;

        for (bet_id, status, won) in transitions {
            if let Some(bet) = self.bets.get_mut(&bet_id) {
                bet.status = status;
                bet.won_amount = won;
            }
        }
        if let Some(prediction) = self.predictions.get_mut(prediction_id) {
            prediction.status = PredictionStatus::Decided;
            prediction.winning_choice_id = Some(winning_choice_id.to_string());
        }
        self.dirty = true;

        Ok(Settlement {
            prediction_id: prediction_id.to_string(),
            winning_choice_id: winning_choice_id.to_string(),
            winning_odds_bps,
            winners,
            losers,
        })
    }

    /// Void a prediction: reverse every ledger entry ever recorded against
    /// it, mark all of its bets voided. A no-op on an already void prediction.
    pub fn void_prediction(&mut self, prediction_id: &str) -> Result<VoidOutcome, MarketError> {
        let prediction = self.get_prediction(prediction_id)?;
        if prediction.status == PredictionStatus::Void {
            return Ok(VoidOutcome {
                already_void: true,
                reversed_entries: 0,
                bets_voided: 0,
            });
        }

        let mut originals: Vec<&TokenLogEntry> = self
            .token_log
            .values()
            .filter(|e| e.cause.prediction_id() == Some(prediction_id))
            .collect();
        ledger::order_for_reversal(&mut originals);
        let reversals: Vec<TokenLogEntry> =
            originals.into_iter().filter_map(TokenLogEntry::reversal).collect();
        let reversed_entries = reversals.len();

        self.apply_batch(reversals)?;

        let mut bets_voided = 0;
        for bet in self
            .bets
            .values_mut()
            .filter(|b| b.prediction_id == prediction_id)
        {
            bet.status = BetStatus::Voided;
            bet.won_amount = 0;
            bets_voided += 1;
        }
        if let Some(prediction) = self.predictions.get_mut(prediction_id) {
            prediction.status = PredictionStatus::Void;
        }
        self.dirty = true;

        Ok(VoidOutcome {
            already_void: false,
            reversed_entries,
            bets_voided,
        })
    }

    pub fn prediction_with_odds(&self, prediction_id: &str) -> Result<PredictionWithOdds, MarketError> {
        let prediction = self.get_prediction(prediction_id)?;
        let bets = self.bets_for_prediction(prediction_id);
        Ok(PredictionWithOdds {
            prediction: prediction.clone(),
            odds: prediction.odds(bets),
        })
    }

    /// Every prediction with its odds, newest first.
    pub fn predictions_with_odds(&self) -> Vec<PredictionWithOdds> {
        let mut by_prediction: HashMap<&str, Vec<&Bet>> = HashMap::new();
        for bet in self.bets.values() {
            by_prediction
                .entry(bet.prediction_id.as_str())
                .or_default()
                .push(bet);
        }

        let mut out: Vec<PredictionWithOdds> = self
            .predictions
            .values()
            .map(|p| {
                let bets = by_prediction.remove(p.id.as_str()).unwrap_or_default();
                PredictionWithOdds {
                    prediction: p.clone(),
                    odds: p.odds(bets),
                }
            })
            .collect();
        out.sort_by(|a, b| {
            newest_first(
                a.prediction.created_at,
                &a.prediction.id,
                b.prediction.created_at,
                &b.prediction.id,
            )
        });
        out
    }

    /// Stake `amount` on a choice of an open prediction.
    pub fn place_bet(&mut self, request: PlaceBet) -> Result<Bet, MarketError> {
        if request.amount <= 0 {
            return Err(MarketError::NonPositiveAmount(request.amount));
        }
        if self.user_bet_on(&request.user_id, &request.prediction_id).is_some() {
            return Err(MarketError::BetAlreadyExists {
                user_id: request.user_id,
                prediction_id: request.prediction_id,
            });
        }
        let prediction = self.get_prediction(&request.prediction_id)?;
        if prediction.status != PredictionStatus::Open {
            return Err(MarketError::PredictionState {
                id: request.prediction_id,
                expected: PredictionStatus::Open,
                actual: prediction.status,
            });
        }
        if !prediction.has_choice(&request.choice_id) {
            return Err(MarketError::ChoiceNotFound {
                prediction_id: request.prediction_id,
                choice_id: request.choice_id,
            });
        }

        let bet = Bet {
            id: ids::new_id(),
            created_at: ids::now(),
            user_id: request.user_id,
            prediction_id: request.prediction_id,
            choice_id: request.choice_id,
            amount: request.amount,
            status: BetStatus::Placed,
            won_amount: 0,
        };
        self.apply_entry(TokenLogEntry::new(
            bet.user_id.clone(),
            -bet.amount,
            TokenChange::BetPlaced(BetRef {
                bet_id: bet.id.clone(),
                prediction_id: bet.prediction_id.clone(),
            }),
        ))?;
        self.bets.insert(bet.id.clone(), bet.clone());
        Ok(bet)
    }

    /// Raise a placed bet's stake to `to`. Equal is a no-op, lower is rejected.
    pub fn increase_bet(&mut self, bet_id: &str, to: i64) -> Result<BetIncrease, MarketError> {
        if to <= 0 {
            return Err(MarketError::NonPositiveAmount(to));
        }
        let bet = self.get_bet(bet_id)?;
        if bet.status != BetStatus::Placed {
            return Err(MarketError::BetState {
                id: bet_id.to_string(),
                actual: bet.status,
            });
        }
        let prediction = self.get_prediction(&bet.prediction_id)?;
        if prediction.status != PredictionStatus::Open {
            return Err(MarketError::PredictionState {
                id: prediction.id.clone(),
                expected: PredictionStatus::Open,
                actual: prediction.status,
            });
        }

        let difference = match to.cmp(&bet.amount) {
            Ordering::Equal => {
                return Ok(BetIncrease {
                    bet: bet.clone(),
                    debited: 0,
                });
            }
            Ordering::Less => {
                return Err(MarketError::BetAlreadyHigher {
                    current: bet.amount,
                    requested: to,
                });
            }
            Ordering::Greater => to - bet.amount,
        };

        let entry = TokenLogEntry::new(
            bet.user_id.clone(),
            -difference,
            TokenChange::BetPlaced(BetRef {
                bet_id: bet.id.clone(),
                prediction_id: bet.prediction_id.clone(),
            }),
        );
        self.apply_entry(entry)?;

        let bet = self
            .bets
            .get_mut(bet_id)
            .ok_or_else(|| MarketError::BetNotFound(bet_id.to_string()))?;
        bet.amount = to;
        Ok(BetIncrease {
            bet: bet.clone(),
            debited: difference,
        })
    }

    pub fn get_bet(&self, bet_id: &str) -> Result<&Bet, MarketError> {
        self.bets
            .get(bet_id)
            .ok_or_else(|| MarketError::BetNotFound(bet_id.to_string()))
    }

    /// The bet a user holds on a prediction, whatever its status.
    pub fn user_bet_on(&self, user_id: &str, prediction_id: &str) -> Option<&Bet> {
        self.bets
            .values()
            .find(|b| b.user_id == user_id && b.prediction_id == prediction_id)
    }

    pub fn bets_for_prediction(&self, prediction_id: &str) -> Vec<&Bet> {
        self.bets
            .values()
            .filter(|b| b.prediction_id == prediction_id)
            .collect()
    }

    /// A user's bets, newest first.
    pub fn bets_for_user(&self, user_id: &str) -> Vec<Bet> {
        let mut bets: Vec<Bet> = self
            .bets
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bets.sort_by(|a, b| newest_first(a.created_at, &a.id, b.created_at, &b.id));
        bets
    }
}

/// Descending by timestamp, then by id.
fn newest_first(a_at: DateTime<Utc>, a_id: &str, b_at: DateTime<Utc>, b_id: &str) -> Ordering {
    Reverse((a_at, a_id)).cmp(&Reverse((b_at, b_id)))
}

fn clamp_i64(n: i128) -> i64 {
    i64::try_from(n).unwrap_or(if n < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prediction::PredictionChoice;

    fn player(state: &mut MarketState, name: &str, tokens: i64) -> UserId {
        let id = ids::new_id();
        state
            .add_user(User::new(id.clone(), name, Vec::new(), false), tokens)
            .unwrap();
        id
    }

    fn open_prediction(state: &mut MarketState) -> PredictionId {
        state
            .create_prediction(NewPrediction {
                name: "Who wins?".into(),
                choices: vec![PredictionChoice::new("a", "A"), PredictionChoice::new("b", "B")],
                ..Default::default()
            })
            .unwrap()
            .id
    }

    fn bet(state: &mut MarketState, user: &str, prediction: &str, choice: &str, amount: i64) -> Bet {
        state
            .place_bet(PlaceBet {
                user_id: user.into(),
                prediction_id: prediction.into(),
                choice_id: choice.into(),
                amount,
            })
            .unwrap()
    }

    fn balance(state: &MarketState, user: &str) -> i64 {
        state.get_user(user).unwrap().tokens
    }

    #[test]
    fn test_add_user_grants_starting_tokens() {
        let mut state = MarketState::new();
        let id = player(&mut state, "Alice", 1_000);
        assert_eq!(balance(&state, &id), 1_000);

        let log = state.entries_for_user(&id);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].cause, TokenChange::InitialGrant);
        assert!(state.is_dirty());
    }

    #[test]
    fn test_supply_cannot_overflow() {
        let mut state = MarketState::new();
        let alice = player(&mut state, "Alice", 0);
        let bob = player(&mut state, "Bob", 0);

        state.gift_tokens(&alice, i64::MAX).unwrap();
        assert_eq!(
            state.gift_tokens(&bob, 1),
            Err(MarketError::BalanceOverflow(bob.clone()))
        );
        let carol = User::new(ids::new_id(), "Carol", Vec::new(), false);
        assert!(matches!(
            state.add_user(carol, 1),
            Err(MarketError::BalanceOverflow(_))
        ));

        // Everything that sums balances or stakes stays in range.
        assert_eq!(state.stats().tokens_in_circulation, i64::MAX);
        assert!(state.ledger_mismatches().is_empty());
        let prediction = open_prediction(&mut state);
        bet(&mut state, &alice, &prediction, "a", i64::MAX);
        let odds = state.prediction_with_odds(&prediction).unwrap().odds;
        assert_eq!(odds.total_tokens_placed, i64::MAX);
        assert_eq!(balance(&state, &bob), 0);
    }

    #[test]
    fn test_add_user_records_zero_grant() {
        let mut state = MarketState::new();
        let id = player(&mut state, "Admin", 0);
        assert_eq!(state.entries_for_user(&id).len(), 1);
    }

    #[test]
    fn test_add_user_rejects_non_empty_and_duplicates() {
        let mut state = MarketState::new();
        player(&mut state, "Alice", 100);

        let mut rich = User::new("x", "Bob", Vec::new(), false);
        rich.tokens = 5;
        assert_eq!(state.add_user(rich, 100), Err(MarketError::MustStartEmpty(5)));

        let dup = User::new("y", "alice", Vec::new(), false);
        assert_eq!(
            state.add_user(dup, 100),
            Err(MarketError::NameTaken("alice".into()))
        );
        assert_eq!(state.users().count(), 1);
    }

    #[test]
    fn test_place_bet_debits_and_records() {
        let mut state = MarketState::new();
        let alice = player(&mut state, "Alice", 1_000);
        let p = open_prediction(&mut state);

        let b = bet(&mut state, &alice, &p, "a", 250);
        assert_eq!(balance(&state, &alice), 750);
        assert_eq!(state.get_bet(&b.id).unwrap().status, BetStatus::Placed);
        assert!(state.ledger_mismatches().is_empty());
    }

    #[test]
    fn test_place_bet_rejections_leave_state_untouched() {
        let mut state = MarketState::new();
        let alice = player(&mut state, "Alice", 100);
        let p = open_prediction(&mut state);
        let request = |choice: &str, amount: i64| PlaceBet {
            user_id: alice.clone(),
            prediction_id: p.clone(),
            choice_id: choice.into(),
            amount,
        };

        assert_eq!(
            state.place_bet(request("a", 0)),
            Err(MarketError::NonPositiveAmount(0))
        );
        assert!(matches!(
            state.place_bet(request("zzz", 10)),
            Err(MarketError::ChoiceNotFound { .. })
        ));
        assert!(matches!(
            state.place_bet(request("a", 101)),
            Err(MarketError::InsufficientBalance { .. })
        ));
        assert_eq!(balance(&state, &alice), 100);
        assert!(state.bets_for_user(&alice).is_empty());
        assert_eq!(state.entries_for_user(&alice).len(), 1);

        bet(&mut state, &alice, &p, "a", 10);
        assert!(matches!(
            state.place_bet(request("b", 10)),
            Err(MarketError::BetAlreadyExists { .. })
        ));
    }

    #[test]
    fn test_place_bet_requires_open_prediction() {
        let mut state = MarketState::new();
        let alice = player(&mut state, "Alice", 100);
        let p = open_prediction(&mut state);
        state.close_prediction(&p).unwrap();

        let err = state
            .place_bet(PlaceBet {
                user_id: alice,
                prediction_id: p,
                choice_id: "a".into(),
                amount: 10,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            MarketError::PredictionState {
                actual: PredictionStatus::Closed,
                ..
            }
        ));
    }

    #[test]
    fn test_increase_bet_boundaries() {
        let mut state = MarketState::new();
        let alice = player(&mut state, "Alice", 1_000);
        let p = open_prediction(&mut state);
        let b = bet(&mut state, &alice, &p, "a", 100);
        let log_len = state.entries_for_user(&alice).len();

        let same = state.increase_bet(&b.id, 100).unwrap();
        assert_eq!(same.debited, 0);
        assert_eq!(state.entries_for_user(&alice).len(), log_len);

        assert_eq!(
            state.increase_bet(&b.id, 99),
            Err(MarketError::BetAlreadyHigher {
                current: 100,
                requested: 99,
            })
        );

        let raised = state.increase_bet(&b.id, 180).unwrap();
        assert_eq!(raised.debited, 80);
        assert_eq!(raised.bet.amount, 180);
        assert_eq!(balance(&state, &alice), 820);

        state.close_prediction(&p).unwrap();
        assert!(matches!(
            state.increase_bet(&b.id, 200),
            Err(MarketError::PredictionState { .. })
        ));
    }

    #[test]
    fn test_decide_pays_winners_at_pool_odds() {
        let mut state = MarketState::new();
        let alice = player(&mut state, "Alice", 1_000);
        let bob = player(&mut state, "Bob", 1_000);
        let p = open_prediction(&mut state);
        let a_bet = bet(&mut state, &alice, &p, "a", 100);
        let b_bet = bet(&mut state, &bob, &p, "b", 300);

        assert!(matches!(
            state.decide_prediction(&p, "a"),
            Err(MarketError::PredictionState { .. })
        ));
        state.close_prediction(&p).unwrap();

        let settlement = state.decide_prediction(&p, "a").unwrap();
        assert_eq!(settlement.winning_odds_bps, 400);
        assert_eq!(settlement.paid_out(), 400);
        assert_eq!(settlement.losers, 1);

        assert_eq!(balance(&state, &alice), 1_300);
        assert_eq!(balance(&state, &bob), 700);

        let a_bet = state.get_bet(&a_bet.id).unwrap();
        assert_eq!((a_bet.status, a_bet.won_amount), (BetStatus::Won, 400));
        let b_bet = state.get_bet(&b_bet.id).unwrap();
        assert_eq!((b_bet.status, b_bet.won_amount), (BetStatus::Lost, 0));

        let decided = state.get_prediction(&p).unwrap();
        assert_eq!(decided.status, PredictionStatus::Decided);
        assert_eq!(decided.winning_choice_id.as_deref(), Some("a"));
        assert!(state.ledger_mismatches().is_empty());
    }

    #[test]
    fn test_decide_clamps_to_break_even() {
        let mut state = MarketState::new();
        let alice = player(&mut state, "Alice", 1_000);
        let p = open_prediction(&mut state);
        bet(&mut state, &alice, &p, "a", 100);
        state.close_prediction(&p).unwrap();

        // Nobody backed "b": multiplier would be 0.
        let settlement = state.decide_prediction(&p, "b").unwrap();
        assert_eq!(settlement.winning_odds_bps, BREAK_EVEN_BPS);
        assert!(settlement.winners.is_empty());
        assert_eq!(balance(&state, &alice), 900);
    }

    #[test]
    fn test_decide_unknown_choice() {
        let mut state = MarketState::new();
        let p = open_prediction(&mut state);
        state.close_prediction(&p).unwrap();
        assert!(matches!(
            state.decide_prediction(&p, "nope"),
            Err(MarketError::ChoiceNotFound { .. })
        ));
        assert_eq!(state.get_prediction(&p).unwrap().status, PredictionStatus::Closed);
    }

    #[test]
    fn test_void_after_decide_restores_balances() {
        let mut state = MarketState::new();
        let alice = player(&mut state, "Alice", 1_000);
        let bob = player(&mut state, "Bob", 1_000);
        let p = open_prediction(&mut state);
        let a_bet = bet(&mut state, &alice, &p, "a", 100);
        state.increase_bet(&a_bet.id, 150).unwrap();
        bet(&mut state, &bob, &p, "b", 300);
        state.close_prediction(&p).unwrap();
        state.decide_prediction(&p, "a").unwrap();

        let outcome = state.void_prediction(&p).unwrap();
        assert!(!outcome.already_void);
        assert_eq!(outcome.reversed_entries, 4);
        assert_eq!(outcome.bets_voided, 2);

        assert_eq!(balance(&state, &alice), 1_000);
        assert_eq!(balance(&state, &bob), 1_000);
        assert!(state.ledger_mismatches().is_empty());
        assert!(state
            .bets_for_prediction(&p)
            .iter()
            .all(|b| b.status == BetStatus::Voided));
        assert_eq!(state.get_prediction(&p).unwrap().status, PredictionStatus::Void);
    }

    #[test]
    fn test_void_is_idempotent() {
        let mut state = MarketState::new();
        let alice = player(&mut state, "Alice", 1_000);
        let p = open_prediction(&mut state);
        bet(&mut state, &alice, &p, "a", 100);

        state.void_prediction(&p).unwrap();
        let log_len = state.entries_for_user(&alice).len();
        state.export();

        let again = state.void_prediction(&p).unwrap();
        assert!(again.already_void);
        assert_eq!(state.entries_for_user(&alice).len(), log_len);
        assert_eq!(balance(&state, &alice), 1_000);
        assert!(!state.is_dirty());
    }

    #[test]
    fn test_void_rejected_when_winnings_spent() {
        let mut state = MarketState::new();
        let alice = player(&mut state, "Alice", 100);
        let bob = player(&mut state, "Bob", 300);
        let first = open_prediction(&mut state);
        bet(&mut state, &alice, &first, "a", 100);
        bet(&mut state, &bob, &first, "b", 300);
        state.close_prediction(&first).unwrap();
        state.decide_prediction(&first, "a").unwrap();
        assert_eq!(balance(&state, &alice), 400);

        // Alice stakes her winnings elsewhere.
        let second = open_prediction(&mut state);
        bet(&mut state, &alice, &second, "a", 400);

        let before = state.export();
        let err = state.void_prediction(&first).unwrap_err();
        assert!(matches!(err, MarketError::BatchRejected { .. }));
        assert!(err.is_fault());

        // Nothing moved.
        assert_eq!(state.export(), before);
    }

    #[test]
    fn test_put_prediction_refuses_finalized_record() {
        let mut state = MarketState::new();
        let p = open_prediction(&mut state);
        let record = state.get_prediction(&p).unwrap().clone();
        state.close_prediction(&p).unwrap();

        assert_eq!(
            state.put_prediction(record),
            Err(MarketError::PredictionFinalized(p.clone()))
        );
        assert!(matches!(
            state.update_prediction(&p, PredictionUpdate::default()),
            Err(MarketError::PredictionFinalized(_))
        ));
    }

    #[test]
    fn test_create_prediction_validation() {
        let mut state = MarketState::new();
        let err = state
            .create_prediction(NewPrediction {
                name: "Lonely".into(),
                choices: vec![PredictionChoice::new("", "Only")],
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, MarketError::TooFewChoices(1));

        let created = state
            .create_prediction(NewPrediction {
                name: "Coin".into(),
                choices: vec![PredictionChoice::new("", "Heads"), PredictionChoice::new("", "Tails")],
                ..Default::default()
            })
            .unwrap();
        assert!(created.choices.iter().all(|c| !c.id.is_empty()));
        assert_ne!(created.choices[0].id, created.choices[1].id);
        assert_eq!(created.status, PredictionStatus::Open);
    }

    #[test]
    fn test_gift_tokens() {
        let mut state = MarketState::new();
        let alice = player(&mut state, "Alice", 0);
        assert_eq!(
            state.gift_tokens(&alice, 0).unwrap_err(),
            MarketError::NonPositiveAmount(0)
        );
        assert!(matches!(
            state.gift_tokens("ghost", 5),
            Err(MarketError::UserNotFound(_))
        ));
        state.gift_tokens(&alice, 50).unwrap();
        assert_eq!(balance(&state, &alice), 50);
    }

    #[test]
    fn test_sessions() {
        let mut state = MarketState::new();
        let alice = player(&mut state, "Alice", 0);
        let token = state.create_session(&alice).unwrap();
        assert_eq!(state.user_id_by_session(&token), Some(&alice));
        assert_eq!(state.user_id_by_session("nope"), None);
        assert!(state.create_session("ghost").is_err());
    }

    #[test]
    fn test_snapshot_restores_verbatim() {
        let mut state = MarketState::new();
        let alice = player(&mut state, "Alice", 500);
        let p = open_prediction(&mut state);
        bet(&mut state, &alice, &p, "b", 120);
        state.create_session(&alice).unwrap();

        let snapshot = state.export();
        assert!(!state.is_dirty());

        let bytes = snapshot.encode().unwrap();
        let mut restored = MarketState::from_snapshot(StateSnapshot::decode(&bytes).unwrap());
        assert!(!restored.is_dirty());
        assert_eq!(restored.export(), snapshot);
        assert_eq!(restored.get_user(&alice).unwrap().tokens, 380);
    }

    #[test]
    fn test_expired_predictions() {
        let mut state = MarketState::new();
        let now = ids::now();
        let never = open_prediction(&mut state);
        let past = state
            .create_prediction(NewPrediction {
                name: "Past".into(),
                closes_at: Some(now - chrono::Duration::seconds(5)),
                choices: vec![PredictionChoice::new("y", "Yes"), PredictionChoice::new("n", "No")],
                ..Default::default()
            })
            .unwrap()
            .id;

        let expired = state.expired_predictions(now);
        assert_eq!(expired, vec![past]);
        assert!(!expired.contains(&never));
    }
}
