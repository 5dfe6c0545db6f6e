//! Input rules shared by the services. Each function returns the normalized
//! value or an `InvalidInput` error carrying a user-facing message.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{AppError, AppResult};

pub const SLUG_MIN_LEN: usize = 3;
pub const SLUG_MAX_LEN: usize = 48;
pub const WORKSPACE_NAME_MAX_LEN: usize = 64;
pub const DISPLAY_NAME_MAX_LEN: usize = 80;
pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 128;
const EMAIL_MAX_LEN: usize = 254;
const URL_MAX_LEN: usize = 2048;

/// Slugs that collide with application routes.
const RESERVED_SLUGS: &[&str] = &[
    "account",
    "admin",
    "api",
    "app",
    "auth",
    "billing",
    "dashboard",
    "help",
    "invitations",
    "invite",
    "login",
    "logout",
    "new",
    "onboarding",
    "profile",
    "settings",
    "signin",
    "signup",
    "static",
    "support",
    "workspaces",
    "www",
];

static RE_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$").expect("valid slug regex"));

static RE_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s.]+(?:\.[^@\s.]+)*\.[a-z]{2,}$").expect("valid email regex")
});

pub fn normalize_slug(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Normalizes and validates a workspace slug.
pub fn validate_slug(raw: &str) -> AppResult<String> {
    let slug = normalize_slug(raw);

    if slug.is_empty() {
        return Err(AppError::InvalidInput("Slug is required".to_string()));
    }
    if slug.len() < SLUG_MIN_LEN || slug.len() > SLUG_MAX_LEN {
        return Err(AppError::InvalidInput(format!(
            "Slug must be between {} and {} characters",
            SLUG_MIN_LEN, SLUG_MAX_LEN
        )));
    }
    if !RE_SLUG.is_match(&slug) {
        return Err(AppError::InvalidInput(
            "Slug may only contain lowercase letters, digits and hyphens, and must start and end with a letter or digit"
                .to_string(),
        ));
    }
    if slug.contains("--") {
        return Err(AppError::InvalidInput(
            "Slug may not contain consecutive hyphens".to_string(),
        ));
    }
    if RESERVED_SLUGS.contains(&slug.as_str()) {
        return Err(AppError::InvalidInput(format!("Slug '{}' is reserved", slug)));
    }

    Ok(slug)
}

/// Derives a slug candidate from a workspace name. The result still has to go
/// through `validate_slug`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
        if slug.len() >= SLUG_MAX_LEN {
            break;
        }
    }

    slug.truncate(SLUG_MAX_LEN);
    slug.trim_end_matches('-').to_string()
}

/// Slug for a workspace created without one. A name whose slug is too short or
/// reserved gets a `-workspace` suffix, so "AB" becomes `ab-workspace`.
pub fn derive_slug(name: &str) -> AppResult<String> {
    let base = slugify(name);
    if let Ok(slug) = validate_slug(&base) {
        return Ok(slug);
    }
    if base.is_empty() {
        return Err(AppError::InvalidInput(
            "Could not derive a slug from the workspace name, please choose one".to_string(),
        ));
    }
    validate_slug(&format!("{}-workspace", base)).map_err(|_| {
        AppError::InvalidInput(
            "Could not derive a slug from the workspace name, please choose one".to_string(),
        )
    })
}

pub fn validate_workspace_name(raw: &str) -> AppResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::InvalidInput("Workspace name is required".to_string()));
    }
    if name.chars().count() > WORKSPACE_NAME_MAX_LEN {
        return Err(AppError::InvalidInput(format!(
            "Workspace name must be at most {} characters",
            WORKSPACE_NAME_MAX_LEN
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(AppError::InvalidInput(
            "Workspace name contains invalid characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// Trims and lower-cases an email address and checks its shape.
pub fn normalize_email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(AppError::InvalidInput("Email is required".to_string()));
    }
    if email.len() > EMAIL_MAX_LEN || !RE_EMAIL.is_match(&email) {
        return Err(AppError::InvalidInput("Invalid email address".to_string()));
    }
    Ok(email)
}

pub fn validate_password(password: &str) -> AppResult<()> {
    let len = password.chars().count();
    if len < PASSWORD_MIN_LEN {
        return Err(AppError::InvalidInput(format!(
            "Password must be at least {} characters",
            PASSWORD_MIN_LEN
        )));
    }
    if len > PASSWORD_MAX_LEN {
        return Err(AppError::InvalidInput(format!(
            "Password must be at most {} characters",
            PASSWORD_MAX_LEN
        )));
    }
    Ok(())
}

/// Empty display names are allowed; callers fall back to the email.
pub fn validate_display_name(raw: &str) -> AppResult<String> {
    let name = raw.trim();
    if name.chars().count() > DISPLAY_NAME_MAX_LEN {
        return Err(AppError::InvalidInput(format!(
            "Display name must be at most {} characters",
            DISPLAY_NAME_MAX_LEN
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(AppError::InvalidInput(
            "Display name contains invalid characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// Logo and avatar URLs. Empty clears the value.
pub fn validate_url(raw: &str) -> AppResult<Option<String>> {
    let url = raw.trim();
    if url.is_empty() {
        return Ok(None);
    }
    if url.len() > URL_MAX_LEN {
        return Err(AppError::InvalidInput("URL is too long".to_string()));
    }
    if !(url.starts_with("https://") || url.starts_with("http://"))
        || url.chars().any(char::is_whitespace)
    {
        return Err(AppError::InvalidInput("URL must be an http(s) address".to_string()));
    }
    Ok(Some(url.to_string()))
}

pub fn parse_uuid(raw: &str, field: &str) -> AppResult<uuid::Uuid> {
    if raw.is_empty() {
        return Err(AppError::InvalidInput(format!("{} is required", field)));
    }
    uuid::Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::InvalidInput(format!("{} is not a valid id", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_slugs() {
        assert_eq!(validate_slug("acme").unwrap(), "acme");
        assert_eq!(validate_slug("  Acme-Corp ").unwrap(), "acme-corp");
        assert_eq!(validate_slug("team-42").unwrap(), "team-42");
    }

    #[test]
    fn test_slug_length_bounds() {
        assert!(validate_slug("ab").is_err());
        assert!(validate_slug(&"a".repeat(SLUG_MAX_LEN)).is_ok());
        assert!(validate_slug(&"a".repeat(SLUG_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn test_slug_hyphen_rules() {
        assert!(validate_slug("-acme").is_err());
        assert!(validate_slug("acme-").is_err());
        assert!(validate_slug("ac--me").is_err());
        assert!(validate_slug("ac_me").is_err());
        assert!(validate_slug("ac me").is_err());
    }

    #[test]
    fn test_reserved_slug() {
        let err = validate_slug("Settings").unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Acme Corp"), "acme-corp");
        assert_eq!(slugify("  Hello,   World!! "), "hello-world");
        assert_eq!(slugify("Ünïcode Team"), "n-code-team");
        assert_eq!(slugify("***"), "");
        assert!(slugify(&"word ".repeat(30)).len() <= SLUG_MAX_LEN);
        assert!(!slugify(&"word ".repeat(30)).ends_with('-'));
    }

    #[test]
    fn test_derive_slug() {
        assert_eq!(derive_slug("Acme Corp").unwrap(), "acme-corp");
        assert_eq!(derive_slug("AB").unwrap(), "ab-workspace");
        assert_eq!(derive_slug("Admin").unwrap(), "admin-workspace");
        let err = derive_slug("***").unwrap_err();
        assert!(err.to_string().contains("derive a slug from the workspace name"));
    }

    #[test]
    fn test_workspace_name() {
        assert_eq!(validate_workspace_name("  My Team ").unwrap(), "My Team");
        assert!(validate_workspace_name("   ").is_err());
        assert!(validate_workspace_name(&"x".repeat(WORKSPACE_NAME_MAX_LEN + 1)).is_err());
        assert!(validate_workspace_name("bad\u{0007}name").is_err());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email(" Jane.Doe@Example.COM ").unwrap(), "jane.doe@example.com");
        assert!(normalize_email("").is_err());
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("a@b").is_err());
        assert!(normalize_email("a@@b.com").is_err());
        assert!(normalize_email("a b@c.com").is_err());
    }

    #[test]
    fn test_password_bounds() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
        assert!(validate_password(&"p".repeat(PASSWORD_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_url() {
        assert_eq!(validate_url("").unwrap(), None);
        assert_eq!(
            validate_url("https://cdn.example.com/logo.png").unwrap().as_deref(),
            Some("https://cdn.example.com/logo.png")
        );
        assert!(validate_url("javascript:alert(1)").is_err());
        assert!(validate_url("https://exa mple.com").is_err());
    }

    #[test]
    fn test_parse_uuid() {
        assert!(parse_uuid("", "workspace_id").is_err());
        assert!(parse_uuid("nope", "workspace_id").is_err());
        assert!(parse_uuid("00000000-0000-0000-0000-000000000001", "workspace_id").is_ok());
    }
}
