//! Token ledger: append-only balance changes.
//!
//! A [`TokenLogEntry`] is the only way a balance ever moves. Entries are
//! immutable once recorded; the sum of a user's entries always equals the
//! user's balance. Balance arithmetic lives in [`apply_change`] so the
//! non-negativity rule can be checked in isolation, and multi-entry
//! settlements are dry-run through [`project_batch`] before anything is
//! written.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::MarketError;
use super::ids::{self, BetId, EntryId, PredictionId, UserId};

/// Link from a ledger entry to the bet that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BetRef {
    pub bet_id: BetId,
    pub prediction_id: PredictionId,
}

/// Why a balance changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenChange {
    /// Starting tokens granted at registration.
    InitialGrant,
    /// Tokens staked on (or added to) a bet.
    BetPlaced(BetRef),
    /// Payout for a winning bet.
    BetWon(BetRef),
    /// Reversal of an earlier entry when its prediction was voided.
    BetVoided(BetRef),
    /// Tokens handed out by an admin.
    AdminGift,
}

impl TokenChange {
    /// The bet this change belongs to, if any.
    pub fn bet(&self) -> Option<&BetRef> {
        match self {
            Self::BetPlaced(r) | Self::BetWon(r) | Self::BetVoided(r) => Some(r),
            Self::InitialGrant | Self::AdminGift => None,
        }
    }

    /// The prediction this change belongs to, if any.
    pub fn prediction_id(&self) -> Option<&str> {
        self.bet().map(|r| r.prediction_id.as_str())
    }

    /// Stable cause name as written to snapshots.
    pub fn cause(&self) -> CauseName {
        match self {
            Self::InitialGrant => CauseName::Start,
            Self::BetPlaced(_) => CauseName::BetPlaced,
            Self::BetWon(_) => CauseName::BetWon,
            Self::BetVoided(_) => CauseName::BetVoided,
            Self::AdminGift => CauseName::Gift,
        }
    }
}

/// Serialized form of a [`TokenChange`] discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CauseName {
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "bet-placed")]
    BetPlaced,
    #[serde(rename = "bet-won")]
    BetWon,
    #[serde(rename = "bet-voided")]
    BetVoided,
    #[serde(rename = "gift")]
    Gift,
}

impl fmt::Display for CauseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::BetPlaced => "bet-placed",
            Self::BetWon => "bet-won",
            Self::BetVoided => "bet-voided",
            Self::Gift => "gift",
        };
        f.write_str(s)
    }
}

/// One immutable, signed balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEntry", into = "RawEntry")]
pub struct TokenLogEntry {
    pub id: EntryId,
    pub created_at: DateTime<Utc>,
    pub user_id: UserId,
    pub change: i64,
    pub cause: TokenChange,
}

impl TokenLogEntry {
    /// Build a new entry with a fresh id, stamped now.
    pub fn new(user_id: impl Into<UserId>, change: i64, cause: TokenChange) -> Self {
        Self {
            id: ids::new_id(),
            created_at: ids::now(),
            user_id: user_id.into(),
            change,
            cause,
        }
    }

    /// Exact inverse of this entry, attributed to the void of its prediction.
    ///
    /// Returns `None` for entries that are not tied to a bet; those are never
    /// reversed.
    pub fn reversal(&self) -> Option<Self> {
        let bet = self.cause.bet()?.clone();
        Some(Self::new(
            self.user_id.clone(),
            -self.change,
            TokenChange::BetVoided(bet),
        ))
    }
}

/// Flat wire shape: cause name plus optional bet / prediction links.
#[derive(Serialize, Deserialize)]
struct RawEntry {
    id: EntryId,
    created_at: DateTime<Utc>,
    user_id: UserId,
    change: i64,
    cause: CauseName,
    #[serde(default, with = "crate::domain::snapshot::empty_as_none")]
    bet_id: Option<BetId>,
    #[serde(default, with = "crate::domain::snapshot::empty_as_none")]
    prediction_id: Option<PredictionId>,
}

impl TryFrom<RawEntry> for TokenLogEntry {
    type Error = String;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        let bet_ref = || match (raw.bet_id.clone(), raw.prediction_id.clone()) {
            (Some(bet_id), Some(prediction_id)) => Ok(BetRef {
                bet_id,
                prediction_id,
            }),
            _ => Err(format!(
                "token log entry {} has cause {} but no bet/prediction link",
                raw.id, raw.cause
            )),
        };

        let cause = match raw.cause {
            CauseName::Start => TokenChange::InitialGrant,
            CauseName::Gift => TokenChange::AdminGift,
            CauseName::BetPlaced => TokenChange::BetPlaced(bet_ref()?),
            CauseName::BetWon => TokenChange::BetWon(bet_ref()?),
            CauseName::BetVoided => TokenChange::BetVoided(bet_ref()?),
        };

        Ok(Self {
            id: raw.id,
            created_at: raw.created_at,
            user_id: raw.user_id,
            change: raw.change,
            cause,
        })
    }
}

impl From<TokenLogEntry> for RawEntry {
    fn from(entry: TokenLogEntry) -> Self {
        let name = entry.cause.cause();
        let (bet_id, prediction_id) = match entry.cause {
            TokenChange::BetPlaced(r) | TokenChange::BetWon(r) | TokenChange::BetVoided(r) => {
                (Some(r.bet_id), Some(r.prediction_id))
            }
            TokenChange::InitialGrant | TokenChange::AdminGift => (None, None),
        };
        Self {
            id: entry.id,
            created_at: entry.created_at,
            user_id: entry.user_id,
            change: entry.change,
            cause: name,
            bet_id,
            prediction_id,
        }
    }
}

/// Compute `balance + change`, refusing any result below zero.
pub fn apply_change(user_id: &str, balance: i64, change: i64) -> Result<i64, MarketError> {
    let next = balance
        .checked_add(change)
        .ok_or_else(|| MarketError::BalanceOverflow(user_id.to_string()))?;
    if next < 0 {
        return Err(MarketError::InsufficientBalance {
            user_id: user_id.to_string(),
            balance,
            change,
        });
    }
    Ok(next)
}

/// Check that minting `grant` new tokens keeps the total `supply` in range.
///
/// Payouts never exceed the pool they come from, so bounding the supply at
/// mint time bounds every stake, pool and balance sum as well.
pub fn check_supply(user_id: &str, supply: i64, grant: i64) -> Result<i64, MarketError> {
    supply
        .checked_add(grant)
        .ok_or_else(|| MarketError::BalanceOverflow(user_id.to_string()))
}

/// Dry-run a batch of entries, in order, against current balances.
///
/// Returns the final balance of every touched user. Fails with
/// [`MarketError::BatchRejected`] naming the first entry that would
/// overdraw (or reference an unknown user); nothing is mutated either way.
pub fn project_batch<F>(
    entries: &[TokenLogEntry],
    balance_of: F,
) -> Result<HashMap<UserId, i64>, MarketError>
where
    F: Fn(&str) -> Option<i64>,
{
    let mut running: HashMap<UserId, i64> = HashMap::new();

    for (position, entry) in entries.iter().enumerate() {
        let reject = |source: MarketError| MarketError::BatchRejected {
            position,
            source: Box::new(source),
        };

        let current = match running.get(&entry.user_id) {
            Some(b) => *b,
            None => balance_of(&entry.user_id)
                .ok_or_else(|| reject(MarketError::UserNotFound(entry.user_id.clone())))?,
        };
        let next = apply_change(&entry.user_id, current, entry.change).map_err(reject)?;
        running.insert(entry.user_id.clone(), next);
    }

    Ok(running)
}

/// Order reversal entries so that debits being undone (credits to the user)
/// run before credits being undone (debits to the user).
///
/// Sorts by the *original* change ascending, then by creation time and id so
/// the batch is reproducible.
pub fn order_for_reversal(entries: &mut [&TokenLogEntry]) {
    entries.sort_by(|a, b| {
        a.change
            .cmp(&b.change)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}
