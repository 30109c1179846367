//! Random identifier generation for sessions and participants.

use ring::rand::{SecureRandom, SystemRandom};

use crate::errors::RelayError;

/// Base36 alphabet for generated identifiers.
const BASE36_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of generated session and participant identifiers.
const ID_LENGTH: usize = 9;

/// Number of random bytes backing an identifier (64 bits entropy).
const ID_RANDOM_BYTES: usize = 8;

/// Generate a random 9-character base36 identifier.
///
/// Used for both session ids and server-assigned participant ids. Always
/// returns exactly `ID_LENGTH` characters, left-padded with '0' if the
/// random value produces fewer digits.
pub fn generate_id() -> Result<String, RelayError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; ID_RANDOM_BYTES];

    rng.fill(&mut bytes).map_err(|e| {
        tracing::error!(target: "relay.ids", error = %e, "Failed to generate random bytes for id");
        RelayError::Internal("RNG failure".to_string())
    })?;

    let mut value: u128 = 0;
    for &b in &bytes {
        value = (value << 8) | u128::from(b);
    }

    // Encode as base36, extracting digits from least-significant end
    let mut id = Vec::with_capacity(ID_LENGTH);
    for _ in 0..ID_LENGTH {
        let idx = (value % 36) as usize;
        let ch = BASE36_CHARS
            .get(idx)
            .ok_or_else(|| RelayError::Internal("Base36 index out of range".to_string()))?;
        id.push(*ch);
        value /= 36;
    }

    // Reverse to get most-significant digit first (consistent ordering)
    id.reverse();

    String::from_utf8(id)
        .map_err(|_| RelayError::Internal("Generated id contained invalid UTF-8".to_string()))
}
