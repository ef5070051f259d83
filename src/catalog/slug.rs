use crate::error::{AppError, AppResult};

pub const MAX_SLUG_LEN: usize = 100;

/// Slugs are lowercase ASCII letters, digits and hyphens.
pub fn validate_slug(slug: &str) -> AppResult<()> {
    if slug.is_empty() {
        return Err(AppError::Validation("slug is required".to_string()));
    }
    if slug.len() > MAX_SLUG_LEN {
        return Err(AppError::Validation(format!(
            "slug must be at most {MAX_SLUG_LEN} characters"
        )));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(AppError::Validation(
            "slug must be lowercase alphanumeric with hyphens".to_string(),
        ));
    }
    Ok(())
}

/// Derive a slug from a display name: ASCII alphanumerics are kept (lowercased),
/// every other run of characters collapses into a single hyphen.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    slug.trim_end_matches('-').to_string()
}

/// Use the explicit slug when given, otherwise derive one from the name.
pub fn resolve_slug(explicit: Option<&str>, name: &str) -> AppResult<String> {
    let slug = match explicit.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => slugify(name),
    };
    validate_slug(&slug)?;
    Ok(slug)
}
