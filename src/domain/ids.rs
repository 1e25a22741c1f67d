//! Identifier aliases and generators.

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

/// Opaque user identifier.
pub type UserId = String;

/// Opaque prediction identifier.
pub type PredictionId = String;

/// Identifier of a choice inside a prediction.
pub type ChoiceId = String;

/// Opaque bet identifier.
pub type BetId = String;

/// Identifier of a token log entry.
pub type EntryId = String;

/// Opaque session token.
pub type SessionToken = String;

/// Generate a new time-ordered record id (UUID v7).
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generate a session token: 32 random bytes, hex encoded.
pub fn new_session_token() -> SessionToken {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Current time truncated to whole seconds, matching the RFC 3339
/// precision of persisted timestamps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}
