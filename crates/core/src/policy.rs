//! Access policy for file retrieval.
//!
//! Checks run in a fixed order so callers always see the most fundamental
//! reason first: existence, expiration, download limit, then password.

use crate::file::FileRecord;
use crate::password::PasswordHasher;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Outcome states of the access gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessState {
    NotFound,
    Expired,
    LimitReached,
    NeedsPassword,
    Allowed,
}

impl AccessState {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::LimitReached => "limit_reached",
            Self::NeedsPassword => "needs_password",
            Self::Allowed => "allowed",
        }
    }
}

impl fmt::Display for AccessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request was not allowed through the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
    NotFound,
    Expired,
    LimitReached,
    PasswordRequired,
    PasswordIncorrect,
}

impl Denial {
    /// Gate state this denial belongs to.
    pub fn state(&self) -> AccessState {
        match self {
            Self::NotFound => AccessState::NotFound,
            Self::Expired => AccessState::Expired,
            Self::LimitReached => AccessState::LimitReached,
            Self::PasswordRequired | Self::PasswordIncorrect => AccessState::NeedsPassword,
        }
    }

    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::LimitReached => "limit_reached",
            Self::PasswordRequired => "password_required",
            Self::PasswordIncorrect => "password_incorrect",
        }
    }

    /// Message suitable for showing to the requester.
    pub fn message(&self) -> &'static str {
        match self {
            Self::NotFound => "File not found",
            Self::Expired => "This file has expired",
            Self::LimitReached => "Download limit reached",
            Self::PasswordRequired => "A password is required to access this file",
            Self::PasswordIncorrect => "Incorrect password",
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Result of evaluating the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied(Denial),
}

impl AccessDecision {
    /// Gate state for this decision.
    pub fn state(&self) -> AccessState {
        match self {
            Self::Allowed => AccessState::Allowed,
            Self::Denied(denial) => denial.state(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Stateless gate evaluation.
#[derive(Clone, Copy, Debug, Default)]
pub struct AccessPolicy {
    hasher: PasswordHasher,
}

impl AccessPolicy {
    pub fn new(hasher: PasswordHasher) -> Self {
        Self { hasher }
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    /// Evaluate the gate for a request.
    ///
    /// `supplied` is the credential offered by the requester. Verifying it
    /// runs bcrypt, so callers on an async runtime should invoke this from
    /// the blocking pool whenever a password is present.
    pub fn evaluate(
        &self,
        record: Option<&FileRecord>,
        supplied: Option<&str>,
        now: OffsetDateTime,
    ) -> AccessDecision {
        let record = match Self::pre_credential(record, now) {
            Ok(record) => record,
            Err(denial) => return AccessDecision::Denied(denial),
        };

        if !record.has_password() {
            return AccessDecision::Allowed;
        }

        match supplied.filter(|p| !p.is_empty()) {
            None => AccessDecision::Denied(Denial::PasswordRequired),
            Some(plaintext) => {
                if self.hasher.verify(record.password_hash.as_ref(), plaintext) {
                    AccessDecision::Allowed
                } else {
                    AccessDecision::Denied(Denial::PasswordIncorrect)
                }
            }
        }
    }

    /// Evaluate without a credential. Never hashes.
    pub fn preview(record: Option<&FileRecord>, now: OffsetDateTime) -> AccessDecision {
        match Self::pre_credential(record, now) {
            Err(denial) => AccessDecision::Denied(denial),
            Ok(record) if record.has_password() => {
                AccessDecision::Denied(Denial::PasswordRequired)
            }
            Ok(_) => AccessDecision::Allowed,
        }
    }

    fn pre_credential(
        record: Option<&FileRecord>,
        now: OffsetDateTime,
    ) -> Result<&FileRecord, Denial> {
        let record = record.ok_or(Denial::NotFound)?;
        if record.is_expired(now) {
            return Err(Denial::Expired);
        }
        if record.limit_reached() {
            return Err(Denial::LimitReached);
        }
        Ok(record)
    }
}
