//! Task payloads and their derived identifiers.

use std::fmt;

/// Identifier used when a payload carries no numeric suffix.
pub const UNKNOWN_ID: &str = "unknown";

/// A unit of work: a string payload plus an identifier derived from it.
///
/// The identifier is a pure function of the payload, so the memory path and the
/// disk path (which only persists the raw payload) always agree on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    id: String,
    payload: String,
}

impl Task {
    /// Wrap a payload, deriving its identifier.
    pub fn new(payload: impl Into<String>) -> Self {
        let payload = payload.into();
        let id = derive_id(&payload);
        Self { id, payload }
    }

    /// Derived identifier, `msg-<digits>` or `unknown`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw payload text.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Consume the task, returning the raw payload.
    #[must_use]
    pub fn into_payload(self) -> String {
        self.payload
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.id, self.payload)
    }
}

/// Derive `msg-<n>` from the trailing run of ASCII digits in `payload`.
///
/// `"hello-1"` gives `msg-1`, `"order 42"` gives `msg-42`, and a payload that does not
/// end in a digit gives [`UNKNOWN_ID`].
#[must_use]
pub fn derive_id(payload: &str) -> String {
    let digits = payload
        .bytes()
        .rev()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 {
        return UNKNOWN_ID.to_string();
    }
    format!("msg-{}", &payload[payload.len() - digits..])
}
