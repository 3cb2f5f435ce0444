//! Process-wide holder of the exchange bearer credential.
//!
//! Written by the settings endpoint, read by every strategy worker once
//! per poll cycle. Replacing the token never touches calls already in flight.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

/// Credential validity window
pub const CREDENTIAL_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Credential {
    #[serde(skip_serializing)]
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

impl Credential {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + Duration::hours(CREDENTIAL_TTL_HOURS)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now - self.issued_at >= Duration::hours(CREDENTIAL_TTL_HOURS)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

#[derive(Debug, Default)]
pub struct TokenStore {
    current: RwLock<Option<Credential>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new token issued now, replacing any prior value
    pub fn set(&self, token: impl Into<String>) -> Credential {
        self.set_issued_at(token, Utc::now())
    }

    pub fn set_issued_at(&self, token: impl Into<String>, issued_at: DateTime<Utc>) -> Credential {
        let credential = Credential {
            token: token.into(),
            issued_at,
        };
        *self.current.write() = Some(credential.clone());
        info!("Auth token updated (expires {})", credential.expires_at());
        credential
    }

    /// Consistent copy for one poll cycle
    pub fn snapshot(&self) -> Option<Credential> {
        self.current.read().clone()
    }

    /// An absent credential counts as expired
    pub fn is_expired(&self) -> bool {
        self.current
            .read()
            .as_ref()
            .map_or(true, |c| c.is_expired())
    }
}
