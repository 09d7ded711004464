//! Subject names and wildcard matching.
//!
//! Subjects are dot-separated tokens (`controle-formats-IN`, `pa.health`).
//! Subscription patterns may use `*` to match exactly one token and `>` as
//! the last token to match one or more trailing tokens.

use crate::error::HarnessError;

/// Pattern that matches every subject.
pub const WILDCARD_ALL: &str = ">";

/// Single-token wildcard.
const TOKEN_WILDCARD: &str = "*";

/// Validates a subject used for publishing (no wildcards allowed).
///
/// # Errors
///
/// Returns [`HarnessError::Validation`] if the subject is empty, contains
/// whitespace or an empty token, or contains a wildcard token.
pub fn validate_publish_subject(subject: &str) -> Result<(), HarnessError> {
    validate_tokens(subject)?;
    if subject
        .split('.')
        .any(|t| t == TOKEN_WILDCARD || t == WILDCARD_ALL)
    {
        return Err(HarnessError::Validation(format!(
            "cannot publish to wildcard subject {subject:?}"
        )));
    }
    Ok(())
}

/// Validates a subscription pattern.
///
/// # Errors
///
/// Returns [`HarnessError::Validation`] if the pattern is malformed or
/// `>` appears anywhere but the last token.
pub fn validate_pattern(pattern: &str) -> Result<(), HarnessError> {
    validate_tokens(pattern)?;
    let tokens: Vec<&str> = pattern.split('.').collect();
    let last = tokens.len().saturating_sub(1);
    if tokens
        .iter()
        .enumerate()
        .any(|(i, t)| *t == WILDCARD_ALL && i != last)
    {
        return Err(HarnessError::Validation(format!(
            "'>' must be the last token in {pattern:?}"
        )));
    }
    Ok(())
}

fn validate_tokens(subject: &str) -> Result<(), HarnessError> {
    if subject.is_empty() {
        return Err(HarnessError::Validation("empty subject".to_string()));
    }
    if subject.chars().any(char::is_whitespace) {
        return Err(HarnessError::Validation(format!(
            "subject {subject:?} contains whitespace"
        )));
    }
    if subject.split('.').any(str::is_empty) {
        return Err(HarnessError::Validation(format!(
            "subject {subject:?} has an empty token"
        )));
    }
    Ok(())
}

/// Returns `true` if `subject` matches the subscription `pattern`.
///
/// Both arguments are assumed to be valid.
#[must_use]
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pat = pattern.split('.');
    let mut sub = subject.split('.');
    loop {
        match (pat.next(), sub.next()) {
            (Some(WILDCARD_ALL), Some(_)) => return true,
            (Some(TOKEN_WILDCARD), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
