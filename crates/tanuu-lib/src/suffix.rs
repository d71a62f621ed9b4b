//! Environment naming
//!
//! Base names are validated against `^[a-z0-9-]+$` and made unique by
//! appending a short hex suffix drawn from the OS random source.

use crate::error::{LifecycleError, Result};
use rand::rngs::OsRng;
use rand::RngCore;

/// Hex characters appended by default.
///
/// 32 random bits: a batch of 1000 names collides with probability
/// about 1e-4.
pub const DEFAULT_SUFFIX_LENGTH: usize = 8;

/// Generate `len` lowercase hex characters.
///
/// `len` must be even and at least 2. Every call draws fresh randomness.
pub fn random_suffix(len: usize) -> Result<String> {
    validate_suffix_length(len)?;

    let mut bytes = vec![0u8; len / 2];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| LifecycleError::RandomSource(e.to_string()))?;

    Ok(hex::encode(bytes))
}

/// Suffix lengths must be even and at least 2
pub fn validate_suffix_length(len: usize) -> Result<()> {
    if len < 2 || len % 2 != 0 {
        return Err(LifecycleError::InvalidSuffixLength(len));
    }
    Ok(())
}

/// Check that `name` only uses lowercase letters, digits and dashes
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LifecycleError::validation(name, "name must not be empty"));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(LifecycleError::validation(
            name,
            format!(
                "'{}' is not allowed; use lowercase letters, digits and dashes",
                bad
            ),
        ));
    }

    Ok(())
}

/// Validate `base` and append a fresh `-<suffix>`
pub fn unique_name(base: &str, suffix_len: usize) -> Result<String> {
    validate_name(base)?;
    let suffix = random_suffix(suffix_len)?;
    Ok(format!("{}-{}", base, suffix))
}
