/// Input validation - one pure function per request shape.
/// Each function returns the cleaned value or every failing field at once.
/// Checks:
/// 1. Length limits (DoS protection)
/// 2. Email format
/// 3. Password composition (letters and digits)
/// 4. Control characters in free text

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{ValidationError, ValidationErrors};

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 128; // bcrypt only reads the first 72 bytes anyway
const MAX_NAME_LENGTH: usize = 255;

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PasswordChangeInput {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUserInput {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

pub fn validate_login(email: &str, password: &str) -> Result<LoginInput, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let email = check_email(email, &mut errors);
    check_password("password", password, &mut errors);

    errors.into_result(LoginInput {
        email,
        password: password.to_string(),
    })
}

pub fn validate_password_change(
    current_password: &str,
    new_password: &str,
) -> Result<PasswordChangeInput, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if current_password.is_empty() {
        errors.push(ValidationError::EmptyField("current_password"));
    }
    check_password("new_password", new_password, &mut errors);

    errors.into_result(PasswordChangeInput {
        current_password: current_password.to_string(),
        new_password: new_password.to_string(),
    })
}

pub fn validate_new_user(
    email: &str,
    password: &str,
    name: Option<&str>,
) -> Result<NewUserInput, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let email = check_email(email, &mut errors);
    check_password("password", password, &mut errors);

    let name = name.map(str::trim).filter(|n| !n.is_empty()).map(|n| {
        if n.chars().count() > MAX_NAME_LENGTH {
            errors.push(ValidationError::TooLong("name", MAX_NAME_LENGTH));
        }
        if n.chars().any(|c| c.is_control()) {
            errors.push(ValidationError::SuspiciousContent("name"));
        }
        n.to_string()
    });

    errors.into_result(NewUserInput {
        email,
        password: password.to_string(),
        name,
    })
}

fn check_email(email: &str, errors: &mut ValidationErrors) -> String {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        errors.push(ValidationError::EmptyField("email"));
    } else if trimmed.len() > MAX_EMAIL_LENGTH {
        errors.push(ValidationError::TooLong("email", MAX_EMAIL_LENGTH));
    } else if !EMAIL_REGEX.is_match(trimmed) {
        errors.push(ValidationError::InvalidFormat("email"));
    }

    trimmed.to_string()
}

fn check_password(field: &'static str, password: &str, errors: &mut ValidationErrors) {
    if password.is_empty() {
        errors.push(ValidationError::EmptyField(field));
        return;
    }

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push(ValidationError::TooShort(field, MIN_PASSWORD_LENGTH));
    } else if password.chars().count() > MAX_PASSWORD_LENGTH {
        errors.push(ValidationError::TooLong(field, MAX_PASSWORD_LENGTH));
    }

    let has_letter = password.chars().any(|c| c.is_ascii_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        errors.push(ValidationError::MissingLetterOrDigit(field));
    }
}
