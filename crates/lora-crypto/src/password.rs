//! Random shared passwords.

use rand::rngs::OsRng;
use rand::Rng;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*";

pub const DEFAULT_PASSWORD_LEN: usize = 16;

/// Generate a password for a new link, drawn uniformly from letters,
/// digits and `!@#$%^&*`.
pub fn generate_password(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_and_alphabet() {
        let password = generate_password(DEFAULT_PASSWORD_LEN);
        assert_eq!(password.len(), DEFAULT_PASSWORD_LEN);
        assert!(password.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn test_passwords_differ() {
        assert_ne!(generate_password(24), generate_password(24));
    }
}
