use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use log::debug;
use rand::rngs::OsRng;
use rand::{ Rng, RngCore };

/// Issued tokens are 24 bytes of OS randomness, URL-safe base64 without
/// padding. 192 bits of entropy; the token is the sole credential for
/// public access to a conversation.
pub const TOKEN_LEN: usize = 32;
const TOKEN_BYTES: usize = 24;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: String,
    /// Short, time-ordered id for human-readable titles. Not a security
    /// boundary.
    pub submission_id: String,
}

pub fn issue(purpose: &str) -> IssuedToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let token = URL_SAFE_NO_PAD.encode(bytes);

    let submission_id = submission_id();
    debug!("Issued {} token with submission id {}", purpose, submission_id);

    IssuedToken { token, submission_id }
}

pub fn validate_format(token: &str) -> bool {
    token.len() == TOKEN_LEN &&
        token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn submission_id() -> String {
    let mut id = base36(Utc::now().timestamp_millis().unsigned_abs() as u128);
    let mut rng = rand::thread_rng();
    for _ in 0..2 {
        id.push(BASE36[rng.gen_range(0..BASE36.len())] as char);
    }
    id
}

fn base36(mut n: u128) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize] as char);
        n /= 36;
    }
    digits.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_pass_format_validation() {
        for _ in 0..64 {
            let issued = issue("test");
            assert!(validate_format(&issued.token), "bad token: {}", issued.token);
        }
    }

    #[test]
    fn issued_tokens_are_distinct() {
        let a = issue("test");
        let b = issue("test");
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(!validate_format(""));
        assert!(!validate_format("short"));
        assert!(!validate_format(&"a".repeat(TOKEN_LEN + 1)));
    }

    #[test]
    fn rejects_characters_outside_alphabet() {
        let mut token = "a".repeat(TOKEN_LEN);
        token.replace_range(0..1, "!");
        assert!(!validate_format(&token));
        let mut token = "a".repeat(TOKEN_LEN);
        token.replace_range(5..6, " ");
        assert!(!validate_format(&token));
    }

    #[test]
    fn submission_ids_sort_by_time() {
        let earlier = base36(1_000_000_000_000);
        let later = base36(2_000_000_000_000);
        assert!(later > earlier);
    }
}
