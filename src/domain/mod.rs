//! Domain layer - market state, ledger and settlement rules.
//!
//! Pure, synchronous code with no I/O. Every transition of the market is a
//! method on [`MarketState`]; concurrency and notifications live in the
//! use-case layer.

pub mod bet;
pub mod credentials;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod prediction;
pub mod snapshot;
pub mod state;
pub mod user;

pub use bet::{Bet, BetStatus, PlaceBet};
pub use error::{ErrorKind, MarketError};
pub use ledger::{BetRef, TokenChange, TokenLogEntry};
pub use prediction::{
    ChoiceOdds, NewPrediction, Prediction, PredictionChoice, PredictionOdds, PredictionStatus,
    PredictionUpdate, PredictionWithOdds,
};
pub use snapshot::StateSnapshot;
pub use state::{BetIncrease, LedgerMismatch, MarketState, MarketStats, Settlement, VoidOutcome};
pub use user::{LeaderboardEntry, User};
