//! Users and the leaderboard projection.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::error::MarketError;
use super::ids::UserId;

/// Longest accepted display name.
pub const MAX_NAME_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Salted credential hash, see [`super::credentials`].
    #[serde(default, with = "pin_hash_b64", skip_serializing_if = "Vec::is_empty")]
    pub pin_hash: Vec<u8>,
    #[serde(default)]
    pub admin: bool,
    /// Current balance. Only ever changed by applying a ledger entry.
    #[serde(default)]
    pub tokens: i64,
}

impl User {
    /// A fresh record with an empty balance.
    pub fn new(id: impl Into<UserId>, name: impl Into<String>, pin_hash: Vec<u8>, admin: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            pin_hash,
            admin,
            tokens: 0,
        }
    }

    /// Case-insensitive display name comparison.
    pub fn has_name(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }

    /// Same record without the credential hash, for handing to collaborators.
    pub fn redacted(&self) -> Self {
        Self {
            pin_hash: Vec::new(),
            ..self.clone()
        }
    }
}

/// Registration rules for display names: 1 to 20 ASCII letters or digits.
pub fn validate_name(name: &str) -> Result<(), MarketError> {
    if name.is_empty() {
        return Err(MarketError::MissingField("name"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(MarketError::InvalidField {
            field: "name",
            reason: "must be at most 20 characters",
        });
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(MarketError::InvalidField {
            field: "name",
            reason: "must only contain A-Z, a-z, 0-9",
        });
    }
    Ok(())
}

/// One row of the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub id: UserId,
    pub name: String,
    pub tokens: i64,
    pub rank: usize,
}

/// Rank non-admin users by balance (desc), ties broken by id (asc).
pub fn leaderboard<'a, I>(users: I) -> Vec<LeaderboardEntry>
where
    I: IntoIterator<Item = &'a User>,
{
    let mut players: Vec<&User> = users.into_iter().filter(|u| !u.admin).collect();
    players.sort_by(|a, b| match b.tokens.cmp(&a.tokens) {
        Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });

    players
        .into_iter()
        .enumerate()
        .map(|(i, u)| LeaderboardEntry {
            id: u.id.clone(),
            name: u.name.clone(),
            tokens: u.tokens,
            rank: i + 1,
        })
        .collect()
}

/// Credential bytes travel as standard base64 in snapshots.
mod pin_hash_b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
