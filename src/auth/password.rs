/// Password Hashing and Verification
///
/// Salted, slow hashing with bcrypt. Verification never raises on a bad
/// digest; it simply does not match.

use bcrypt::{hash, verify, DEFAULT_COST};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::AppError;

/// Hash a password using bcrypt at the default cost
///
/// # Errors
/// Returns error if bcrypt hashing fails
pub fn hash_password(password: &str) -> Result<String, AppError> {
    hash_password_with_cost(password, DEFAULT_COST)
}

/// Hash a password using bcrypt at an explicit cost (4..=31)
pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, AppError> {
    hash(password, cost).map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against its hash
///
/// The comparison inside bcrypt is constant-time. A digest that is not a
/// valid bcrypt string yields `false`.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match verify(password, password_hash) {
        Ok(valid) => valid,
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash could not be parsed");
            false
        }
    }
}

// Salt and digest of a fixed bcrypt hash; only the cost field varies
const DUMMY_SALT_AND_DIGEST: &str = "N9qo8uLOickgx2ZMRZoMyeIjZAgcfl7p92ldGxad68LJZdL17lhWy";

fn dummy_hash(cost: u32) -> String {
    format!("$2b${:02}${}", cost, DUMMY_SALT_AND_DIGEST)
}

/// Run one full bcrypt verification at `cost` against a hash that belongs
/// to nobody. Login calls this for unknown emails so that path costs as
/// much as a wrong password.
pub fn verify_dummy_password(password: &str, cost: u32) {
    if let Err(e) = verify(password, &dummy_hash(cost)) {
        tracing::warn!(error = %e, "Dummy password verification failed");
    }
}

/// Random alphanumeric password with at least one letter and one digit.
/// Lengths below 2 are raised to 2.
pub fn generate_password(length: usize) -> String {
    let length = length.max(2);
    let mut rng = rand::thread_rng();
    loop {
        let candidate: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect();

        if candidate.chars().any(|c| c.is_ascii_alphabetic())
            && candidate.chars().any(|c| c.is_ascii_digit())
        {
            return candidate;
        }
    }
}
