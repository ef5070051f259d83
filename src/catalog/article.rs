use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::category::Category;
use super::product::{self, Product};
use super::slug::resolve_slug;
use super::{category_id_for, require_text, validate_meta, CatalogState};
use crate::auth::bearer::{require_scope, TokenAuth};
use crate::auth::token_routes::SCOPE_CATALOG_WRITE;
use crate::error::{AppError, AppResult, LoggedJson};
use crate::storage::sqlite::apply_connection_settings;
use crate::types::{now_millis, Page, PageParams};

const MAX_TITLE_CHARS: usize = 255;

const ARTICLE_SELECT: &str = "SELECT a.id, a.title, a.slug, a.excerpt, a.content, a.created_at,
        a.meta_title, a.meta_description, c.id, c.name, c.slug
 FROM articles a LEFT JOIN categories c ON c.id = a.category_id";

#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub excerpt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// UTC epoch milliseconds.
    pub created_at: i64,
    pub meta_title: String,
    pub meta_description: String,
    pub category: Option<Category>,
}

fn article_from_row(row: &Row<'_>, with_content: bool) -> rusqlite::Result<Article> {
    let category = match row.get::<_, Option<i64>>(8)? {
        Some(id) => Some(Category {
            id,
            name: row.get(9)?,
            slug: row.get(10)?,
        }),
        None => None,
    };
    Ok(Article {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        excerpt: row.get(3)?,
        content: if with_content { Some(row.get(4)?) } else { None },
        created_at: row.get(5)?,
        meta_title: row.get(6)?,
        meta_description: row.get(7)?,
        category,
    })
}

#[derive(Debug, Serialize)]
pub struct ArticleDetail {
    #[serde(flatten)]
    pub article: Article,
    pub products: Vec<Product>,
}

#[derive(Debug, Deserialize)]
pub struct ArticleInput {
    pub title: String,
    pub slug: Option<String>,
    #[serde(default)]
    pub excerpt: String,
    pub content: String,
    pub category: Option<String>,
    /// Slugs of the products the article features.
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub meta_title: String,
    #[serde(default)]
    pub meta_description: String,
}

#[derive(Debug, Clone)]
pub struct ValidArticle {
    pub title: String,
    pub slug: String,
    pub excerpt: String,
    pub content: String,
    pub category: Option<String>,
    pub products: Vec<String>,
    pub meta_title: String,
    pub meta_description: String,
}

impl ArticleInput {
    pub fn validate(self, existing_slug: Option<&str>) -> AppResult<ValidArticle> {
        let title = require_text("title", &self.title, MAX_TITLE_CHARS)?;
        let slug = match (self.slug.as_deref().map(str::trim), existing_slug) {
            (Some(s), _) if !s.is_empty() => resolve_slug(Some(s), &title)?,
            (_, Some(existing)) => existing.to_string(),
            _ => resolve_slug(None, &title)?,
        };
        if self.content.trim().is_empty() {
            return Err(AppError::Validation("content is required".to_string()));
        }
        validate_meta(&self.meta_title, &self.meta_description)?;

        let mut products: Vec<String> = self
            .products
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        products.sort();
        products.dedup();

        Ok(ValidArticle {
            title,
            slug,
            excerpt: self.excerpt,
            content: self.content,
            category: self.category,
            products,
            meta_title: self.meta_title.trim().to_string(),
            meta_description: self.meta_description.trim().to_string(),
        })
    }
}

/// Newest first.
pub fn fetch_page(conn: &Connection, page: i64, page_size: i64) -> rusqlite::Result<(Vec<Article>, i64)> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
    let offset = (page - 1).saturating_mul(page_size);
    let mut stmt = conn.prepare(&format!(
        "{ARTICLE_SELECT} ORDER BY a.created_at DESC, a.id DESC LIMIT ?1 OFFSET ?2"
    ))?;
    let items = stmt
        .query_map(params![page_size, offset], |row| article_from_row(row, false))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((items, total))
}

pub fn fetch_by_slug(conn: &Connection, slug: &str) -> rusqlite::Result<Option<Article>> {
    conn.query_row(
        &format!("{ARTICLE_SELECT} WHERE a.slug = ?1"),
        params![slug],
        |row| article_from_row(row, true),
    )
    .optional()
}

fn link_products(conn: &Connection, article_id: i64, slugs: &[String]) -> AppResult<()> {
    conn.execute(
        "DELETE FROM article_products WHERE article_id = ?1",
        params![article_id],
    )?;
    for slug in slugs {
        let product_id: i64 = conn
            .query_row(
                "SELECT id FROM products WHERE slug = ?1",
                params![slug],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    AppError::Validation(format!("unknown product: {slug}"))
                }
                _ => AppError::Database(e),
            })?;
        conn.execute(
            "INSERT INTO article_products (article_id, product_id) VALUES (?1, ?2)",
            params![article_id, product_id],
        )?;
    }
    Ok(())
}

pub fn insert_article(conn: &mut Connection, a: &ValidArticle, created_at: i64) -> AppResult<ArticleDetail> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    let category_id = category_id_for(&tx, a.category.as_deref())?;
    tx.execute(
        "INSERT INTO articles (category_id, title, slug, excerpt, content, created_at, meta_title, meta_description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            category_id,
            a.title,
            a.slug,
            a.excerpt,
            a.content,
            created_at,
            a.meta_title,
            a.meta_description,
        ],
    )
    .map_err(AppError::conflict_or_db("article"))?;
    let id = tx.last_insert_rowid();
    link_products(&tx, id, &a.products)?;
    tx.commit()?;
    load_detail(conn, &a.slug)
}

pub fn replace_article(conn: &mut Connection, current_slug: &str, a: &ValidArticle) -> AppResult<ArticleDetail> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    let id: i64 = tx
        .query_row(
            "SELECT id FROM articles WHERE slug = ?1",
            params![current_slug],
            |row| row.get(0),
        )
        .map_err(AppError::not_found_or_db("article"))?;
    let category_id = category_id_for(&tx, a.category.as_deref())?;
    tx.execute(
        "UPDATE articles SET category_id = ?1, title = ?2, slug = ?3, excerpt = ?4, content = ?5,
                meta_title = ?6, meta_description = ?7
         WHERE id = ?8",
        params![
            category_id,
            a.title,
            a.slug,
            a.excerpt,
            a.content,
            a.meta_title,
            a.meta_description,
            id,
        ],
    )
    .map_err(AppError::conflict_or_db("article"))?;
    link_products(&tx, id, &a.products)?;
    tx.commit()?;
    load_detail(conn, &a.slug)
}

fn load_detail(conn: &Connection, slug: &str) -> AppResult<ArticleDetail> {
    let article = fetch_by_slug(conn, slug)?
        .ok_or_else(|| AppError::NotFound("article not found".to_string()))?;
    let products = product::fetch_for_article(conn, article.id)?;
    Ok(ArticleDetail { article, products })
}

/// GET /v1/articles
pub async fn list_articles(
    State(state): State<Arc<CatalogState>>,
    Query(paging): Query<PageParams>,
) -> AppResult<Json<Page<Article>>> {
    let page = paging.page();
    let page_size = paging.page_size(state.config.page_size, state.config.max_page_size);

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let (items, total) = conn
        .interact(move |conn| fetch_page(conn, page, page_size))
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    Ok(Json(Page::new(items, page, page_size, total)))
}

/// GET /v1/articles/{slug} - Article with the products it features.
pub async fn get_article(
    State(state): State<Arc<CatalogState>>,
    Path(slug): Path<String>,
) -> AppResult<Json<ArticleDetail>> {
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let detail = conn
        .interact(move |conn| load_detail(conn, &slug))
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;
    Ok(Json(detail))
}

/// POST /v1/admin/articles
pub async fn create_article(
    State(state): State<Arc<CatalogState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
    LoggedJson(input): LoggedJson<ArticleInput>,
) -> AppResult<(StatusCode, Json<ArticleDetail>)> {
    require_scope(&token_auth, SCOPE_CATALOG_WRITE)?;
    let valid = input.validate(None)?;
    let created_at = now_millis();

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let detail = conn
        .interact(move |conn| {
            apply_connection_settings(conn)?;
            insert_article(conn, &valid, created_at)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    tracing::info!(slug = %detail.article.slug, products = detail.products.len(), "article created");
    Ok((StatusCode::CREATED, Json(detail)))
}

/// PUT /v1/admin/articles/{slug}
pub async fn update_article(
    State(state): State<Arc<CatalogState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
    Path(current): Path<String>,
    LoggedJson(input): LoggedJson<ArticleInput>,
) -> AppResult<Json<ArticleDetail>> {
    require_scope(&token_auth, SCOPE_CATALOG_WRITE)?;
    let valid = input.validate(Some(&current))?;

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let detail = conn
        .interact(move |conn| {
            apply_connection_settings(conn)?;
            replace_article(conn, &current, &valid)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    tracing::info!(slug = %detail.article.slug, "article updated");
    Ok(Json(detail))
}

/// DELETE /v1/admin/articles/{slug}
pub async fn delete_article(
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
    let deleted = conn
        .interact(move |conn| {
            apply_connection_settings(conn)?;
            conn.execute("DELETE FROM articles WHERE slug = ?1", params![target])
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    if deleted == 0 {
        return Err(AppError::NotFound("article not found".to_string()));
    }
    tracing::info!(slug = %slug, "article deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_article() {
        let valid = ArticleInput {
            title: "Best Desks of the Year".to_string(),
            slug: None,
            excerpt: String::new(),
            content: "Body".to_string(),
            category: None,
            products: vec!["b".to_string(), " a ".to_string(), "b".to_string(), "".to_string()],
            meta_title: String::new(),
            meta_description: String::new(),
        }
        .validate(None)
        .unwrap();
        assert_eq!(valid.slug, "best-desks-of-the-year");
        assert_eq!(valid.products, vec!["a", "b"]);
    }

    #[test]
    fn test_empty_content_rejected() {
        let input = ArticleInput {
            title: "Title".to_string(),
            slug: None,
            excerpt: String::new(),
            content: "  ".to_string(),
            category: None,
            products: Vec::new(),
            meta_title: String::new(),
            meta_description: String::new(),
        };
        assert!(input.validate(None).is_err());
    }
}
