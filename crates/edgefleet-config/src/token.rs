//! Enrolment token material: random passwords and their PBKDF2-SHA256
//! hashes.

use std::num::NonZeroU32;

use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{ConfigError, ConfigResult};

pub const SALT_LEN: usize = 16;
pub const HASH_LEN: usize = 32;
pub const PBKDF2_ITERATIONS: u32 = 10_000;
pub const SECONDS_PER_DAY: i64 = 86_400;

const PASSWORD_LEN: usize = 24;
const GENERATE_ATTEMPTS: usize = 5;
const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789!#%+-=@^_";

fn iterations() -> NonZeroU32 {
    NonZeroU32::new(PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN)
}

fn fill(rng: &SystemRandom, buf: &mut [u8]) -> ConfigResult<()> {
    rng.fill(buf)
        .map_err(|_| ConfigError::Crypto("system random source failed".into()))
}

pub fn new_salt(rng: &SystemRandom) -> ConfigResult<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    fill(rng, &mut salt)?;
    Ok(salt)
}

/// One candidate password, drawn uniformly from [`CHARSET`].
fn random_password(rng: &SystemRandom) -> ConfigResult<String> {
    // Largest multiple of the charset size that fits in a byte.
    let limit = (256 / CHARSET.len() * CHARSET.len()) as u16;
    let mut out = String::with_capacity(PASSWORD_LEN);
    let mut buf = [0u8; 64];
    while out.len() < PASSWORD_LEN {
        fill(rng, &mut buf)?;
        for b in buf {
            if u16::from(b) < limit && out.len() < PASSWORD_LEN {
                out.push(char::from(CHARSET[usize::from(b) % CHARSET.len()]));
            }
        }
    }
    Ok(out)
}

/// A password needs three of the four character classes and no run of
/// three identical characters.
pub fn is_too_simple(password: &str) -> bool {
    let classes = [
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_lowercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_ascii_alphanumeric()),
    ];
    if classes.iter().filter(|present| **present).count() < 3 {
        return true;
    }
    let chars: Vec<char> = password.chars().collect();
    chars.windows(3).any(|w| w[0] == w[1] && w[1] == w[2])
}

/// Draw passwords until one is complex enough, giving up after a few tries.
pub fn generate_password(rng: &SystemRandom) -> ConfigResult<String> {
    for _ in 0..GENERATE_ATTEMPTS {
        let candidate = random_password(rng)?;
        if !is_too_simple(&candidate) {
            return Ok(candidate);
        }
        tracing::warn!("generated token too simple, retrying");
    }
    Err(ConfigError::Crypto(format!(
        "no sufficiently complex token after {GENERATE_ATTEMPTS} attempts"
    )))
}

pub fn hash_password(password: &str, salt: &[u8]) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations(),
        salt,
        password.as_bytes(),
        &mut out,
    );
    out
}

/// Constant-time check of `password` against a stored hash.
pub fn verify_password(password: &str, salt: &[u8], hash: &[u8]) -> bool {
    pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations(),
        salt,
        password.as_bytes(),
        hash,
    )
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_passwords_are_complex_and_distinct() {
        let rng = SystemRandom::new();
        let a = generate_password(&rng).unwrap();
        let b = generate_password(&rng).unwrap();
        assert_eq!(a.len(), PASSWORD_LEN);
        assert!(!is_too_simple(&a));
        assert_ne!(a, b);
        assert!(a.bytes().all(|c| CHARSET.contains(&c)));
    }

    #[test]
    fn simplicity_rules() {
        assert!(is_too_simple("abcdefgh"));
        assert!(is_too_simple("abcdEFGH"));
        assert!(!is_too_simple("abcdEF12"));
        assert!(is_too_simple("aaaB12xy"));
        assert!(!is_too_simple("ab-CD=ef"));
    }

    #[test]
    fn hash_verifies_only_the_right_password() {
        let rng = SystemRandom::new();
        let salt = new_salt(&rng).unwrap();
        let hash = hash_password("Edge-token-42", &salt);
        assert!(verify_password("Edge-token-42", &salt, &hash));
        assert!(!verify_password("Edge-token-43", &salt, &hash));
        assert!(!verify_password("Edge-token-42", &[0u8; SALT_LEN], &hash));
    }
}
