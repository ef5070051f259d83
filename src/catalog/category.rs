use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::product::{self, Product};
use super::slug::resolve_slug;
use super::{require_text, CatalogState};
use crate::auth::bearer::{require_scope, TokenAuth};
use crate::auth::token_routes::SCOPE_CATALOG_WRITE;
use crate::error::{AppError, AppResult, LoggedJson};
use crate::storage::sqlite::apply_connection_settings;

const MAX_NAME_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Deserialize)]
pub struct CategoryInput {
    pub name: String,
    pub slug: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CategoryDetail {
    #[serde(flatten)]
    pub category: Category,
    pub products: Vec<Product>,
}

pub fn fetch_all(conn: &Connection) -> rusqlite::Result<Vec<Category>> {
    let mut stmt =
        conn.prepare("SELECT id, name, slug FROM categories ORDER BY name COLLATE NOCASE, id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Category {
                id: row.get(0)?,
                name: row.get(1)?,
                slug: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_by_slug(conn: &Connection, slug: &str) -> rusqlite::Result<Option<Category>> {
    conn.query_row(
        "SELECT id, name, slug FROM categories WHERE slug = ?1",
        params![slug],
        |row| {
            Ok(Category {
                id: row.get(0)?,
                name: row.get(1)?,
                slug: row.get(2)?,
            })
        },
    )
    .optional()
}

fn validate(input: CategoryInput, existing_slug: Option<&str>) -> AppResult<(String, String)> {
    let name = require_text("name", &input.name, MAX_NAME_CHARS)?;
    let slug = match (input.slug.as_deref().map(str::trim), existing_slug) {
        (Some(s), _) if !s.is_empty() => resolve_slug(Some(s), &name)?,
        (_, Some(existing)) => existing.to_string(),
        _ => resolve_slug(None, &name)?,
    };
    Ok((name, slug))
}

/// Products and articles in a deleted category keep existing, uncategorized.
pub fn remove_category(conn: &mut Connection, slug: &str) -> AppResult<()> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    let id: i64 = tx
        .query_row(
            "SELECT id FROM categories WHERE slug = ?1",
            params![slug],
            |row| row.get(0),
        )
        .map_err(AppError::not_found_or_db("category"))?;
    tx.execute(
        "UPDATE products SET category_id = NULL WHERE category_id = ?1",
        params![id],
    )?;
    tx.execute(
        "UPDATE articles SET category_id = NULL WHERE category_id = ?1",
        params![id],
    )?;
    tx.execute("DELETE FROM categories WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(())
}

/// GET /v1/categories
pub async fn list_categories(
    State(state): State<Arc<CatalogState>>,
) -> AppResult<Json<Vec<Category>>> {
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let categories = conn
        .interact(|conn| fetch_all(conn))
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;
    Ok(Json(categories))
}

/// GET /v1/categories/{slug} - Category with its products.
pub async fn get_category(
    State(state): State<Arc<CatalogState>>,
    Path(slug): Path<String>,
) -> AppResult<Json<CategoryDetail>> {
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let detail = conn
        .interact(move |conn| {
            let Some(category) = fetch_by_slug(conn, &slug)? else {
                return Ok(None);
            };
            let products = product::fetch_for_category(conn, category.id)?;
            Ok::<_, rusqlite::Error>(Some(CategoryDetail { category, products }))
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    detail
        .map(Json)
        .ok_or_else(|| AppError::NotFound("category not found".to_string()))
}

/// POST /v1/admin/categories
pub async fn create_category(
    State(state): State<Arc<CatalogState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
    LoggedJson(input): LoggedJson<CategoryInput>,
) -> AppResult<(StatusCode, Json<Category>)> {
    require_scope(&token_auth, SCOPE_CATALOG_WRITE)?;
    let (name, slug) = validate(input, None)?;

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let category = conn
        .interact(move |conn| {
            apply_connection_settings(conn)?;
            conn.execute(
                "INSERT INTO categories (name, slug) VALUES (?1, ?2)",
                params![name, slug],
            )
            .map_err(AppError::conflict_or_db("category"))?;
            Ok::<_, AppError>(Category {
                id: conn.last_insert_rowid(),
                name,
                slug,
            })
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    tracing::info!(slug = %category.slug, "category created");
    Ok((StatusCode::CREATED, Json(category)))
}

/// PUT /v1/admin/categories/{slug}
pub async fn update_category(
    State(state): State<Arc<CatalogState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
    Path(current): Path<String>,
    LoggedJson(input): LoggedJson<CategoryInput>,
) -> AppResult<Json<Category>> {
    require_scope(&token_auth, SCOPE_CATALOG_WRITE)?;
    let (name, slug) = validate(input, Some(&current))?;

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let category = conn
        .interact(move |conn| {
            apply_connection_settings(conn)?;
            let updated = conn
                .execute(
                    "UPDATE categories SET name = ?1, slug = ?2 WHERE slug = ?3",
                    params![name, slug, current],
                )
                .map_err(AppError::conflict_or_db("category"))?;
            if updated == 0 {
                return Err(AppError::NotFound("category not found".to_string()));
            }
            fetch_by_slug(conn, &slug)?
                .ok_or_else(|| AppError::Internal("updated category vanished".to_string()))
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    tracing::info!(slug = %category.slug, "category updated");
    Ok(Json(category))
}

/// DELETE /v1/admin/categories/{slug}
pub async fn delete_category(
    State(state): State<Arc<CatalogState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
    Path(slug): Path<String>,
) -> AppResult<StatusCode> {
    require_scope(&token_auth, SCOPE_CATALOG_WRITE)?;

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let target = slug.clone();
    conn.interact(move |conn| {
        apply_connection_settings(conn)?;
        remove_category(conn, &target)
    })
    .await
    .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    tracing::info!(slug = %slug, "category deleted");
    Ok(StatusCode::NO_CONTENT)
}
