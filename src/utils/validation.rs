use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::AuthError;

lazy_static! {
    // Username: alphanumeric, underscores, hyphens, 3-50 chars
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9_-]{3,50}$").unwrap();

    // Basic email shape; deliverability is the mailer's problem
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$"
    ).unwrap();
}

/// Validate a username
pub fn validate_username(username: &str) -> Result<(), AuthError> {
    if !USERNAME_REGEX.is_match(username) {
        return Err(AuthError::ValidationError(
            "Username must be 3-50 characters and can only contain letters, numbers, underscores, and hyphens".into()
        ));
    }
    Ok(())
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), AuthError> {
    if !EMAIL_REGEX.is_match(email) {
        return Err(AuthError::ValidationError("Invalid email format".into()));
    }
    Ok(())
}

/// Validate a password: at least 8 chars with an uppercase letter, a
/// lowercase letter and a digit.
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.len() < 8 {
        return Err(AuthError::ValidationError(
            "Password must be at least 8 characters long".into(),
        ));
    }

    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !(has_upper && has_lower && has_digit) {
        return Err(AuthError::ValidationError(
            "Password must contain at least one uppercase letter, one lowercase letter, and one number".into()
        ));
    }

    Ok(())
}

/// Canonical form for knowledge-based answers: lowercased and trimmed, both
/// at registration and at comparison time.
pub fn normalize_kba_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert!(validate_username("user123").is_ok());
        assert!(validate_username("user_name").is_ok());
        assert!(validate_username("user-name").is_ok());

        assert!(validate_username("us").is_err()); // too short
        assert!(validate_username("user.name").is_err()); // invalid character
        assert!(validate_username("user@name").is_err()); // invalid character
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("user.name@example.co.uk").is_ok());

        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@example").is_err());
        assert!(validate_email("user.example.com").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("Password123").is_ok());
        assert!(validate_password("Secure_Password1").is_ok());

        assert!(validate_password("pass").is_err()); // too short
        assert!(validate_password("password").is_err()); // no uppercase or number
        assert!(validate_password("PASSWORD123").is_err()); // no lowercase
        assert!(validate_password("Password").is_err()); // no number
    }

    #[test]
    fn test_normalize_kba_answer() {
        assert_eq!(normalize_kba_answer("  Kucing "), "kucing");
        assert_eq!(normalize_kba_answer("JAKARTA"), "jakarta");
    }
}
