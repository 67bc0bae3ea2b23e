//! Input checks shared by the handlers. Each returns the normalized value or
//! a `Validation` error naming the field.

use chrono::NaiveDate;
use email_address::EmailAddress;

use crate::error::ApiError;

pub const MAX_THEME_CONFIG_BYTES: usize = 16 * 1024;
pub const MAX_DESCRIPTION_CHARS: usize = 500;

fn char_len_between(field: &str, value: &str, min: usize, max: usize) -> Result<String, ApiError> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();
    if len < min || len > max {
        return Err(ApiError::validation(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn name(value: &str) -> Result<String, ApiError> {
    char_len_between("name", value, 2, 50)
}

/// Trimmed and lowercased; lookups and uniqueness use this form.
pub fn email(value: &str) -> Result<String, ApiError> {
    let normalized = value.trim().to_lowercase();
    if !EmailAddress::is_valid(&normalized) {
        return Err(ApiError::validation("email is not a valid address"));
    }
    Ok(normalized)
}

pub fn password(value: &str) -> Result<(), ApiError> {
    let len = value.chars().count();
    if len < 8 {
        return Err(ApiError::validation("password must be at least 8 characters"));
    }
    if len > 256 {
        return Err(ApiError::validation("password must be at most 256 characters"));
    }
    Ok(())
}

pub fn subject_name(value: &str) -> Result<String, ApiError> {
    char_len_between("subject_name", value, 1, 50)
}

pub fn site_name(value: &str) -> Result<String, ApiError> {
    char_len_between("site_name", value, 1, 255)
}

pub fn theme_config(value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::validation("config must not be empty"));
    }
    if value.len() > MAX_THEME_CONFIG_BYTES {
        return Err(ApiError::validation("config must be at most 16 KiB"));
    }
    Ok(())
}

pub fn description(value: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(ApiError::validation(format!(
            "description must be at most {MAX_DESCRIPTION_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// `YYYY-MM-DD`, returned in canonical form.
pub fn date(value: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation("date must be a valid YYYY-MM-DD date"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(name("  Ana  ").unwrap(), "Ana");
        assert!(name("A").is_err());
        assert!(name(&"x".repeat(51)).is_err());
        // Counted in characters, not bytes.
        assert!(name(&"ñ".repeat(50)).is_ok());
    }

    #[test]
    fn emails_are_lowercased() {
        assert_eq!(email(" Ana@Example.COM ").unwrap(), "ana@example.com");
        assert!(email("not-an-email").is_err());
        assert!(email("").is_err());
    }

    #[test]
    fn password_length() {
        assert!(password("1234567").is_err());
        assert!(password("12345678").is_ok());
        assert!(password(&"p".repeat(257)).is_err());
    }

    #[test]
    fn theme_config_limits() {
        assert!(theme_config("").is_err());
        assert!(theme_config("   ").is_err());
        assert!(theme_config(r#"{"color":"pink"}"#).is_ok());
        assert!(theme_config(&"x".repeat(MAX_THEME_CONFIG_BYTES + 1)).is_err());
    }

    #[test]
    fn dates_must_be_real_days() {
        assert_eq!(date("2024-02-29").unwrap().to_string(), "2024-02-29");
        assert!(date("2023-02-29").is_err());
        assert!(date("29/02/2024").is_err());
        assert!(date("2024-02-29T10:00:00").is_err());
    }

    #[test]
    fn description_may_be_empty() {
        assert_eq!(description("  ").unwrap(), "");
        assert!(description(&"d".repeat(501)).is_err());
    }
}
