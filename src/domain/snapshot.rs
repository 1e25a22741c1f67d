//! Snapshot document - point-in-time image of the whole market
//!
//! One JSON object holding every collection, keyed by id (sessions by
//! token). Collections are ordered maps so identical state always encodes
//! to identical bytes. Any collection missing from an imported document
//! comes back empty.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::bet::Bet;
use super::ids::{BetId, EntryId, PredictionId, SessionToken, UserId};
use super::ledger::TokenLogEntry;
use super::prediction::Prediction;
use super::user::User;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(rename = "Users", default, deserialize_with = "null_as_empty")]
    pub users: BTreeMap<UserId, User>,
    #[serde(rename = "Predictions", default, deserialize_with = "null_as_empty")]
    pub predictions: BTreeMap<PredictionId, Prediction>,
    #[serde(rename = "Bets", default, deserialize_with = "null_as_empty")]
    pub bets: BTreeMap<BetId, Bet>,
    #[serde(rename = "TokenLog", default, deserialize_with = "null_as_empty")]
    pub token_log: BTreeMap<EntryId, TokenLogEntry>,
    /// Session token -> user id.
    #[serde(rename = "Sessions", default, deserialize_with = "null_as_empty")]
    pub sessions: BTreeMap<SessionToken, UserId>,
}

impl StateSnapshot {
    /// Encode as pretty-printed JSON.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// `null` collections decode like missing ones.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Optional scalar stored as a string, where `""` means absent.
///
/// Use with `#[serde(default, with = "empty_as_none")]`.
pub mod empty_as_none {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(v) => v.serialize(serializer),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(s) if s.is_empty() => Ok(None),
            Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}
