//! Failure classification: which errors are worth another attempt.
//!
//! Structured SQLSTATE codes are consulted first. Message substrings are a
//! compatibility shim for drivers and wrappers that drop the code; their
//! wording is driver- and locale-dependent, so they only ever widen the
//! permanent set.

use orderly_core::OrderlyError;

/// Whether a failure may succeed on a later attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient: connection drops, timeouts, pool exhaustion.
    Retryable,
    /// Deterministic: retrying would fail the same way.
    Permanent,
}

/// SQLSTATE codes that never succeed on retry.
const PERMANENT_SQLSTATES: &[&str] = &[
    "42601", // syntax_error
    "42501", // insufficient_privilege
    "42P01", // undefined_table
    "42703", // undefined_column
    "23505", // unique_violation
];

/// Lower-cased message fragments of permanent failures.
const PERMANENT_MESSAGE_FRAGMENTS: &[&str] = &[
    "syntax error",
    "permission denied",
    "does not exist",
    "duplicate key",
    "violates unique constraint",
];

/// Classifies a SQLSTATE code. `None` means the code says nothing either way.
#[must_use]
pub fn classify_sql_state(code: &str) -> Option<FailureClass> {
    if PERMANENT_SQLSTATES.contains(&code) {
        Some(FailureClass::Permanent)
    } else {
        None
    }
}

/// Classifies a raw failure message by substring.
#[must_use]
pub fn classify_message(message: &str) -> FailureClass {
    let message = message.to_lowercase();
    if PERMANENT_MESSAGE_FRAGMENTS
        .iter()
        .any(|fragment| message.contains(fragment))
    {
        FailureClass::Permanent
    } else {
        FailureClass::Retryable
    }
}

/// Classifies an Orderly error for the query executor's retry loop.
#[must_use]
pub fn classify_error(error: &OrderlyError) -> FailureClass {
    match error {
        OrderlyError::Validation(_)
        | OrderlyError::NotFound { .. }
        | OrderlyError::Conflict(_)
        | OrderlyError::Configuration(_)
        | OrderlyError::Serialization(_)
        | OrderlyError::Rollback { .. } => FailureClass::Permanent,
        OrderlyError::Database(db) => db
            .code
            .as_deref()
            .and_then(classify_sql_state)
            .unwrap_or_else(|| classify_message(&db.message)),
        other => classify_message(&other.raw_message()),
    }
}
