pub mod article;
pub mod asin;
pub mod category;
pub mod product;
pub mod rating;
pub mod slug;

use deadpool_sqlite::Pool;

use crate::config::CatalogConfig;
use crate::error::{AppError, AppResult};

pub const MAX_META_TITLE_CHARS: usize = 255;
pub const MAX_META_DESCRIPTION_CHARS: usize = 160;

/// Shared state for the public catalog and the admin catalog routes.
pub struct CatalogState {
    pub pool: Pool,
    pub config: CatalogConfig,
}

impl CatalogState {
    pub fn new(pool: Pool, config: CatalogConfig) -> Self {
        Self { pool, config }
    }
}

/// Escape `%`, `_` and `\` so user input matches literally inside `LIKE ... ESCAPE '\'`.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub(crate) fn require_text(field: &str, value: &str, max_chars: usize) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    check_len(field, trimmed, max_chars)?;
    Ok(trimmed.to_string())
}

pub(crate) fn check_len(field: &str, value: &str, max_chars: usize) -> AppResult<()> {
    if value.chars().count() > max_chars {
        return Err(AppError::Validation(format!(
            "{field} must be at most {max_chars} characters"
        )));
    }
    Ok(())
}

pub(crate) fn validate_meta(meta_title: &str, meta_description: &str) -> AppResult<()> {
    check_len("meta_title", meta_title, MAX_META_TITLE_CHARS)?;
    check_len("meta_description", meta_description, MAX_META_DESCRIPTION_CHARS)
}

/// Resolve an optional category slug to its id. Unknown slugs are a client error.
pub(crate) fn category_id_for(
    conn: &rusqlite::Connection,
    slug: Option<&str>,
) -> AppResult<Option<i64>> {
    let Some(slug) = slug.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    conn.query_row(
        "SELECT id FROM categories WHERE slug = ?1",
        rusqlite::params![slug],
        |row| row.get::<_, i64>(0),
    )
    .map(Some)
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            AppError::Validation(format!("unknown category: {slug}"))
        }
        _ => AppError::Database(e),
    })
}
