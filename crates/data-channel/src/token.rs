//! Shared-secret tokens for the host handshake.

use rand::RngCore;

/// Random bytes per token; hex encoding doubles this to [`crate::wire::TOKEN_LEN`].
const TOKEN_BYTES: usize = crate::wire::TOKEN_LEN / 2;

/// Generates a random token as 32 lowercase hex characters.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Returns `true` if `token` has the handshake shape (32 hex characters).
pub fn is_well_formed(token: &str) -> bool {
    token.len() == crate::wire::TOKEN_LEN && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Compares a received token with the expected one in constant time.
pub fn validate_token(received: &str, expected: &str) -> bool {
    if received.len() != expected.len() {
        return false;
    }
    let diff = received
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_well_formed_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert!(is_well_formed(&a));
        assert!(is_well_formed(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn well_formed_rejects_bad_shapes() {
        assert!(!is_well_formed("short"));
        assert!(!is_well_formed(&"g".repeat(32)));
    }

    #[test]
    fn validate_tokens() {
        let token = generate_token();
        assert!(validate_token(&token, &token));
        assert!(!validate_token(&token, &generate_token()));
        assert!(!validate_token("short", "this_is_longer"));
    }
}
