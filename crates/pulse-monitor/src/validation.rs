// Input validation for user-supplied identifiers and free text.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Email address is required and must be less than 255 characters")]
    EmailLength,
    #[error("Invalid email address format")]
    EmailFormat,
    #[error("Username is required")]
    UsernameMissing,
    #[error("Username must be at least 3 characters long")]
    UsernameTooShort,
    #[error("Username must be less than 50 characters")]
    UsernameTooLong,
    #[error("Username must start with a letter")]
    UsernameStart,
    #[error("Username can only contain letters, numbers, and underscores")]
    UsernameCharset,
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}

const EMAIL_MAX: usize = 255;
const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 50;

/// Accepts `local@domain.tld` where the local part uses `[A-Za-z0-9._%+-]`,
/// the domain `[A-Za-z0-9.-]`, and the final label is at least two ASCII
/// letters.
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.is_empty() || email.len() > EMAIL_MAX {
        return Err(ValidationError::EmailLength);
    }

    let (local, domain) = email.split_once('@').ok_or(ValidationError::EmailFormat)?;
    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c));
    if !local_ok {
        return Err(ValidationError::EmailFormat);
    }

    let (host, tld) = domain.rsplit_once('.').ok_or(ValidationError::EmailFormat)?;
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    let tld_ok = tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic());
    if !host_ok || !tld_ok {
        return Err(ValidationError::EmailFormat);
    }

    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() {
        return Err(ValidationError::UsernameMissing);
    }
    let len = username.chars().count();
    if len < USERNAME_MIN {
        return Err(ValidationError::UsernameTooShort);
    }
    if len > USERNAME_MAX {
        return Err(ValidationError::UsernameTooLong);
    }
    if !username.chars().next().is_some_and(|c| c.is_alphabetic()) {
        return Err(ValidationError::UsernameStart);
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ValidationError::UsernameCharset);
    }
    Ok(())
}

/// Strip NUL bytes, cap at `max_len` characters, then trim whitespace.
pub fn sanitize_input(text: &str, max_len: usize) -> String {
    let cleaned: String = text.chars().filter(|&c| c != '\0').take(max_len).collect();
    cleaned.trim().to_string()
}

/// Reject blank values for a named field.
pub fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_emails() {
        for ok in ["a@b.co", "first.last+tag@mail.example.org", "x_y%z@sub-domain.io"] {
            assert_eq!(validate_email(ok), Ok(()), "{ok}");
        }
    }

    #[test]
    fn rejects_malformed_emails() {
        for bad in ["plain", "@b.co", "a@b", "a@b.c", "a@.com1", "a b@c.com", "a@b.c0m"] {
            assert_eq!(validate_email(bad), Err(ValidationError::EmailFormat), "{bad}");
        }
        assert_eq!(validate_email(""), Err(ValidationError::EmailLength));
        let long = format!("{}@example.com", "a".repeat(250));
        assert_eq!(validate_email(&long), Err(ValidationError::EmailLength));
    }

    #[test]
    fn username_rules() {
        assert_eq!(validate_username("alice_01"), Ok(()));
        assert_eq!(validate_username(""), Err(ValidationError::UsernameMissing));
        assert_eq!(validate_username("ab"), Err(ValidationError::UsernameTooShort));
        assert_eq!(
            validate_username(&"a".repeat(51)),
            Err(ValidationError::UsernameTooLong)
        );
        assert_eq!(validate_username("1abc"), Err(ValidationError::UsernameStart));
        assert_eq!(validate_username("_abc"), Err(ValidationError::UsernameStart));
        assert_eq!(validate_username("ab-c"), Err(ValidationError::UsernameCharset));
        assert_eq!(validate_username(&"a".repeat(50)), Ok(()));
    }

    #[test]
    fn sanitize_strips_nul_truncates_and_trims() {
        assert_eq!(sanitize_input("  he\0llo  ", 100), "hello");
        assert_eq!(sanitize_input("abcdef", 3), "abc");
        assert_eq!(sanitize_input("", 10), "");
        // Truncation counts characters, not bytes.
        assert_eq!(sanitize_input("héllo", 2), "hé");
    }

    #[test]
    fn blank_fields_rejected() {
        assert!(require_non_empty("handle", "  ").is_err());
        assert!(require_non_empty("handle", "x").is_ok());
    }
}
