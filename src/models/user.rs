// src/models/user.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::{Validate, ValidationError};

/// A student or administrator account.
///
/// Attempts, feedback and leaderboard entries all hang off `id`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,

    /// Argon2 PHC string. Never serialized.
    #[serde(skip)]
    pub password: String,

    /// `user` for students, `admin` for quiz authors.
    pub role: String,

    pub created_at: Option<DateTime<Utc>>,
}

/// Self-service student sign up.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(
        length(
            min = 3,
            max = 50,
            message = "Username length must be between 3 and 50 characters."
        ),
        custom(function = "validate_username")
    )]
    pub username: String,
    #[validate(length(
        min = 4,
        max = 128,
        message = "Password length must be between 4 and 128 characters."
    ))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 50))]
    pub username: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

/// The caller's own account with a summary of their attempts.
#[derive(Debug, Serialize, FromRow)]
pub struct ProfileResponse {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub created_at: Option<DateTime<Utc>>,
    pub attempts_count: i64,
    pub submitted_count: i64,
    pub best_score: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(
        length(
            min = 3,
            max = 50,
            message = "Username length must be between 3 and 50 characters."
        ),
        custom(function = "validate_username")
    )]
    pub username: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, max = 128))]
    pub old_password: String,
    #[validate(length(
        min = 4,
        max = 128,
        message = "Password length must be between 4 and 128 characters."
    ))]
    pub new_password: String,
}

/// Usernames show up on the leaderboard, so keep them to a plain charset.
fn validate_username(username: &str) -> Result<(), ValidationError> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.');
    if username.chars().all(allowed) {
        Ok(())
    } else {
        let mut err = ValidationError::new("username_charset");
        err.message = Some("Username may only contain letters, digits, '_', '-' and '.'.".into());
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(username: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            password: "password123".to_string(),
        }
    }

    #[test]
    fn test_plain_usernames_are_accepted() {
        assert!(register("ada_lovelace").validate().is_ok());
        assert!(register("u_1a2b3c4d").validate().is_ok());
    }

    #[test]
    fn test_profile_rename_uses_the_same_rules() {
        let rename = |username: &str| UpdateProfileRequest {
            username: username.to_string(),
        };
        assert!(rename("grace.h").validate().is_ok());
        assert!(rename("<i>grace</i>").validate().is_err());
    }

    #[test]
    fn test_short_new_password_is_rejected() {
        let change = ChangePasswordRequest {
            old_password: "password123".to_string(),
            new_password: "abc".to_string(),
        };
        assert!(change.validate().is_err());
    }

    #[test]
    fn test_markup_in_usernames_is_rejected() {
        assert!(register("<b>bob</b>").validate().is_err());
        assert!(register("two words").validate().is_err());
        assert!(register("yo").validate().is_err());
    }
}
