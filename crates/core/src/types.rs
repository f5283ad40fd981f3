//! Identifier and timestamp primitives.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::CoreError;

/// All persisted timestamps are Unix epoch seconds (UTC).
pub type Timestamp = i64;

/// Current time as epoch seconds.
pub fn now_ts() -> Timestamp {
    Utc::now().timestamp()
}

/// Well-known identifier prefixes.
pub mod prefixes {
    pub const NOTIFICATION: &str = "notif";
    pub const PREFERENCE: &str = "npref";
    pub const SEQUENCE: &str = "seq";
    pub const SEQUENCE_FORMAT: &str = "seqfmt";
    pub const POLICY: &str = "pol";
    pub const ROLE: &str = "rol";
    pub const SESSION: &str = "ses";
    pub const AI_LOG: &str = "ailog";
    pub const REPORT: &str = "report";
    pub const SERVER: &str = "srv";
    pub const AUDIT_ENTRY: &str = "ae";
    pub const USER: &str = "usr";
    pub const ORGANIZATION: &str = "org";
    pub const BUSINESS_UNIT: &str = "bu";
}

/// Prefixed, time-ordered identifier: `<prefix>_<26-char ULID>`.
///
/// The empty string is the canonical nil value.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PulId(String);

impl PulId {
    /// Mint a new identifier with the given type prefix.
    pub fn new(prefix: &str) -> Self {
        Self(format!("{prefix}_{}", Ulid::new()))
    }

    /// The nil identifier.
    pub fn nil() -> Self {
        Self(String::new())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The type prefix, without the trailing underscore.
    pub fn prefix(&self) -> Option<&str> {
        self.0.rsplit_once('_').map(|(prefix, _)| prefix)
    }

    /// Generation time recovered from the ULID body.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let (_, body) = self.0.rsplit_once('_')?;
        let ulid = Ulid::from_string(body).ok()?;
        Some(DateTime::<Utc>::from(ulid.datetime()))
    }
}

impl fmt::Display for PulId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PulId {
    type Err = CoreError;

    /// Parse and validate a prefixed identifier. The empty string parses to nil.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::nil());
        }
        let (prefix, body) = s
            .rsplit_once('_')
            .ok_or_else(|| CoreError::Validation(format!("identifier '{s}' has no prefix")))?;
        if prefix.is_empty() {
            return Err(CoreError::Validation(format!(
                "identifier '{s}' has an empty prefix"
            )));
        }
        Ulid::from_string(body)
            .map_err(|e| CoreError::Validation(format!("identifier '{s}' is malformed: {e}")))?;
        Ok(Self(s.to_string()))
    }
}

impl From<PulId> for String {
    fn from(id: PulId) -> Self {
        id.0
    }
}

impl AsRef<str> for PulId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
