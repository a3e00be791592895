//! Session identifier normalization.
//!
//! The external process only accepts canonical (UUID-form) session ids, but
//! callers supply whatever they like: nothing, a UUID, or a human-chosen
//! alias. Resolution is total: empty input gets a fresh random id, a
//! canonical id passes through unchanged, and any other string maps to the
//! same derived canonical id on every call and across process restarts, so
//! aliases stay stable.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{ConduitError, Result};

/// Whether the input is already in canonical UUID form.
#[must_use]
pub fn is_canonical(input: &str) -> bool {
    Uuid::try_parse(input).is_ok()
}

/// Resolve arbitrary caller input to a canonical session id.
///
/// - empty or whitespace-only input: a freshly generated random id (two
///   calls yield two different ids);
/// - canonical UUID form: passed through unchanged;
/// - anything else: a content-derived id, identical for identical input.
#[must_use]
pub fn resolve(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Uuid::new_v4().to_string();
    }
    if is_canonical(trimmed) {
        return trimmed.to_owned();
    }
    derive(trimmed).to_string()
}

/// Validate that an id is usable as-is, without normalizing it.
///
/// # Errors
///
/// Returns a recoverable [`ConduitError::Validation`] carrying the
/// suggested normalized alternative:
/// - empty input suggests a freshly generated id;
/// - non-UUID input suggests its deterministic derivation.
pub fn validate(input: &str) -> Result<()> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ConduitError::Validation(
            "session id is empty".into(),
            Some(Uuid::new_v4().to_string()),
        ));
    }
    if !is_canonical(trimmed) {
        return Err(ConduitError::Validation(
            format!("session id `{trimmed}` is not in canonical UUID form"),
            Some(derive(trimmed).to_string()),
        ));
    }
    Ok(())
}

/// Deterministically derive a UUID-shaped id from arbitrary input.
///
/// SHA-256 of the input, truncated to 16 bytes, with the version and
/// variant bits forced so the output reads as a valid RFC 4122 UUID. The
/// exact scheme is internal; only determinism and UUID shape are
/// contractual.
fn derive(input: &str) -> Uuid {
    let digest = Sha256::digest(input.as_bytes());
    let mut bytes = [0_u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}
