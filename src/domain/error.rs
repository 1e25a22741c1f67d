//! Market error taxonomy.
//!
//! Every concrete failure the engine can report is a variant of
//! [`MarketError`]. Callers that only care about the class of failure
//! (HTTP status mapping, retry decisions, alerting) use [`MarketError::kind`].

use thiserror::Error;

use super::ids::{BetId, ChoiceId, PredictionId, UserId};
use super::bet::BetStatus;
use super::prediction::PredictionStatus;

/// Coarse classification of a [`MarketError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced user, prediction, bet or choice does not exist.
    NotFound,
    /// The request collides with existing state.
    Conflict,
    /// The request itself is malformed.
    InvalidArgument,
    /// The prediction or bet is not in the lifecycle state the operation requires.
    StateError,
    /// Applying the request would break a ledger invariant.
    InvariantViolation,
}

/// Errors produced by ledger, directory and settlement operations.
///
/// None of these leave partial state behind: an operation that returns
/// an error has not mutated anything.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarketError {
    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("prediction {0} not found")]
    PredictionNotFound(PredictionId),

    #[error("bet {0} not found")]
    BetNotFound(BetId),

    #[error("choice {choice_id} does not exist on prediction {prediction_id}")]
    ChoiceNotFound {
        prediction_id: PredictionId,
        choice_id: ChoiceId,
    },

    #[error("invalid name or pin")]
    InvalidCredentials,

    #[error("user name {0:?} is taken")]
    NameTaken(String),

    #[error("user {0} already exists")]
    UserExists(UserId),

    #[error("user {user_id} already has a bet on prediction {prediction_id}")]
    BetAlreadyExists {
        user_id: UserId,
        prediction_id: PredictionId,
    },

    #[error("bet is already {current}, cannot lower it to {requested}")]
    BetAlreadyHigher { current: i64, requested: i64 },

    #[error("prediction {0} exists and is no longer open")]
    PredictionFinalized(PredictionId),

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error("a prediction needs at least 2 choices, got {0}")]
    TooFewChoices(usize),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("{field} is invalid: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },

    #[error("user record must be created with 0 tokens, got {0}")]
    MustStartEmpty(i64),

    #[error("prediction {id} is {actual}, expected {expected}")]
    PredictionState {
        id: PredictionId,
        expected: PredictionStatus,
        actual: PredictionStatus,
    },

    #[error("bet {id} is {actual}, expected placed")]
    BetState { id: BetId, actual: BetStatus },

    #[error("user {user_id} has {balance} tokens, change of {change} would go negative")]
    InsufficientBalance {
        user_id: UserId,
        balance: i64,
        change: i64,
    },

    #[error("token balance of user {0} would overflow")]
    BalanceOverflow(UserId),

    #[error("ledger batch rejected at entry {position}: {source}")]
    BatchRejected {
        position: usize,
        #[source]
        source: Box<MarketError>,
    },
}

impl MarketError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UserNotFound(_)
            | Self::PredictionNotFound(_)
            | Self::BetNotFound(_)
            | Self::ChoiceNotFound { .. }
            | Self::InvalidCredentials => ErrorKind::NotFound,
            Self::NameTaken(_)
            | Self::UserExists(_)
            | Self::BetAlreadyExists { .. }
            | Self::BetAlreadyHigher { .. }
            | Self::PredictionFinalized(_) => ErrorKind::Conflict,
            Self::NonPositiveAmount(_)
            | Self::TooFewChoices(_)
            | Self::MissingField(_)
            | Self::InvalidField { .. }
            | Self::MustStartEmpty(_) => ErrorKind::InvalidArgument,
            Self::PredictionState { .. } | Self::BetState { .. } => ErrorKind::StateError,
            Self::InsufficientBalance { .. }
            | Self::BalanceOverflow(_)
            | Self::BatchRejected { .. } => ErrorKind::InvariantViolation,
        }
    }

    /// True for failures that point at a logic defect rather than a bad request.
    ///
    /// A single debit bounced by the balance check is an ordinary rejection;
    /// a settlement batch that cannot be applied is not.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::BatchRejected { .. } | Self::BalanceOverflow(_))
    }
}
