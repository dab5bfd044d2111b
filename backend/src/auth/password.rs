//! Password hashing and registration field rules.

use shared::RegisterRequest;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("{0}")]
    Invalid(String),
    #[error("password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),
}

pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    Ok(bcrypt::hash(password, bcrypt::DEFAULT_COST)?)
}

/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

pub fn validate_registration(request: &RegisterRequest) -> Result<(), CredentialError> {
    let username_ok = (3..=20).contains(&request.username.len())
        && request.username.chars().all(|c| c.is_ascii_alphanumeric());
    if !username_ok {
        return Err(CredentialError::Invalid(
            "username must be 3-20 letters or digits".to_string(),
        ));
    }
    if !request.email.contains('@') {
        return Err(CredentialError::Invalid("invalid email address".to_string()));
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CredentialError::Invalid(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            full_name: None,
        }
    }

    #[test]
    fn hash_verifies_only_the_original_password() {
        let hash = bcrypt::hash("hunter22", 4).unwrap();
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-bcrypt-hash"));
    }

    #[test]
    fn registration_rules() {
        assert!(validate_registration(&request("farmer01", "f@farm.kr", "secret")).is_ok());
        assert!(validate_registration(&request("ab", "f@farm.kr", "secret")).is_err());
        assert!(validate_registration(&request("farmer_01", "f@farm.kr", "secret")).is_err());
        assert!(validate_registration(&request("a".repeat(21).as_str(), "f@farm.kr", "secret")).is_err());
        assert!(validate_registration(&request("farmer01", "farm.kr", "secret")).is_err());
        assert!(validate_registration(&request("farmer01", "f@farm.kr", "12345")).is_err());
    }
}
