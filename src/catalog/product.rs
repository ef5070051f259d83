use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::asin::{extract_asin, is_valid_asin};
use super::category::{self, Category};
use super::rating::{star_states, validate_rating, StarState};
use super::slug::resolve_slug;
use super::{category_id_for, check_len, escape_like, require_text, validate_meta, CatalogState};
use crate::auth::bearer::{require_scope, TokenAuth};
use crate::auth::token_routes::SCOPE_CATALOG_WRITE;
use crate::error::{AppError, AppResult, LoggedJson};
use crate::storage::sqlite::apply_connection_settings;
use crate::types::{Page, PageParams};

/// 999999.99 in the store's currency.
pub const MAX_PRICE_CENTS: i64 = 99_999_999;
const MAX_NAME_CHARS: usize = 255;
const MAX_IMAGE_CHARS: usize = 500;

const PRODUCT_SELECT: &str = "SELECT p.id, p.slug, p.name, p.description, p.price_cents, p.affiliate_link,
        p.image, p.clicks, p.rating, p.pros, p.cons, p.asin, p.marketplace_image_url,
        p.meta_title, p.meta_description, c.id, c.name, c.slug
 FROM products p LEFT JOIN categories c ON c.id = p.category_id";

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub price: String,
    pub affiliate_link: String,
    pub image: Option<String>,
    pub clicks: i64,
    pub rating: Option<f64>,
    pub pros: String,
    pub cons: String,
    pub asin: Option<String>,
    pub marketplace_image_url: Option<String>,
    pub meta_title: String,
    pub meta_description: String,
    pub category: Option<Category>,
}

pub(crate) fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    let price_cents: i64 = row.get(4)?;
    let category = match row.get::<_, Option<i64>>(15)? {
        Some(id) => Some(Category {
            id,
            name: row.get(16)?,
            slug: row.get(17)?,
        }),
        None => None,
    };
    Ok(Product {
        id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        price_cents,
        price: format_price(price_cents),
        affiliate_link: row.get(5)?,
        image: row.get(6)?,
        clicks: row.get(7)?,
        rating: row.get(8)?,
        pros: row.get(9)?,
        cons: row.get(10)?,
        asin: row.get(11)?,
        marketplace_image_url: row.get(12)?,
        meta_title: row.get(13)?,
        meta_description: row.get(14)?,
        category,
    })
}

pub fn format_price(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

/// One non-empty trimmed entry per line.
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whitelisted listing orders. Anything else falls back to name ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductSort {
    Name,
    NameDesc,
    Price,
    PriceDesc,
}

impl ProductSort {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("-name") => ProductSort::NameDesc,
            Some("price") => ProductSort::Price,
            Some("-price") => ProductSort::PriceDesc,
            _ => ProductSort::Name,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProductSort::Name => "name",
            ProductSort::NameDesc => "-name",
            ProductSort::Price => "price",
            ProductSort::PriceDesc => "-price",
        }
    }

    fn order_by(self) -> &'static str {
        match self {
            ProductSort::Name => "p.name COLLATE NOCASE ASC, p.id ASC",
            ProductSort::NameDesc => "p.name COLLATE NOCASE DESC, p.id ASC",
            ProductSort::Price => "p.price_cents ASC, p.id ASC",
            ProductSort::PriceDesc => "p.price_cents DESC, p.id ASC",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductListParams {
    pub q: Option<String>,
    pub sort: Option<String>,
    pub category: Option<String>,
    #[serde(flatten)]
    pub paging: PageParams,
}

/// Normalized listing filter.
#[derive(Debug, Clone)]
pub struct ProductFilter {
    pub q: Option<String>,
    pub category: Option<String>,
    pub sort: ProductSort,
}

impl ProductFilter {
    pub fn from_params(params: &ProductListParams) -> Self {
        let non_empty = |s: &Option<String>| {
            s.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            q: non_empty(&params.q),
            category: non_empty(&params.category),
            sort: ProductSort::parse(params.sort.as_deref()),
        }
    }
}

/// Fetch one page of products plus the total number of matches.
pub fn fetch_page(
    conn: &Connection,
    filter: &ProductFilter,
    page: i64,
    page_size: i64,
) -> rusqlite::Result<(Vec<Product>, i64)> {
    let pattern = filter.q.as_deref().map(escape_like);
    let filter_sql = " WHERE (?1 IS NULL OR p.name LIKE '%' || ?1 || '%' ESCAPE '\\')
                       AND (?2 IS NULL OR c.slug = ?2)";

    let total: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM products p LEFT JOIN categories c ON c.id = p.category_id{filter_sql}"
        ),
        params![pattern, filter.category],
        |row| row.get(0),
    )?;

    let sql = format!(
        "{PRODUCT_SELECT}{filter_sql} ORDER BY {} LIMIT ?3 OFFSET ?4",
        filter.sort.order_by()
    );
    let offset = (page - 1).saturating_mul(page_size);
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(
            params![pattern, filter.category, page_size, offset],
            product_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((items, total))
}

pub fn fetch_by_slug(conn: &Connection, slug: &str) -> rusqlite::Result<Option<Product>> {
    conn.query_row(
        &format!("{PRODUCT_SELECT} WHERE p.slug = ?1"),
        params![slug],
        product_from_row,
    )
    .optional()
}

/// Products in a category, name order.
pub fn fetch_for_category(conn: &Connection, category_id: i64) -> rusqlite::Result<Vec<Product>> {
    let mut stmt = conn.prepare(&format!(
        "{PRODUCT_SELECT} WHERE p.category_id = ?1 ORDER BY p.name COLLATE NOCASE ASC, p.id ASC"
    ))?;
    let rows = stmt
        .query_map(params![category_id], product_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Products linked to an article, name order.
pub fn fetch_for_article(conn: &Connection, article_id: i64) -> rusqlite::Result<Vec<Product>> {
    let mut stmt = conn.prepare(&format!(
        "{PRODUCT_SELECT} JOIN article_products ap ON ap.product_id = p.id
         WHERE ap.article_id = ?1 ORDER BY p.name COLLATE NOCASE ASC, p.id ASC"
    ))?;
    let rows = stmt
        .query_map(params![article_id], product_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Create/replace payload. `clicks` and `marketplace_image_url` are not accepted here.
#[derive(Debug, Deserialize)]
pub struct ProductInput {
    pub name: String,
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    pub price_cents: i64,
    pub affiliate_link: String,
    pub image: Option<String>,
    pub rating: Option<f64>,
    #[serde(default)]
    pub pros: String,
    #[serde(default)]
    pub cons: String,
    pub asin: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub meta_title: String,
    #[serde(default)]
    pub meta_description: String,
}

#[derive(Debug, Clone)]
pub struct ValidProduct {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub price_cents: i64,
    pub affiliate_link: String,
    pub image: Option<String>,
    pub rating: Option<f64>,
    pub pros: String,
    pub cons: String,
    pub asin: Option<String>,
    pub category: Option<String>,
    pub meta_title: String,
    pub meta_description: String,
}

pub fn validate_affiliate_link(link: &str) -> AppResult<String> {
    let link = link.trim();
    let parsed = url::Url::parse(link)
        .map_err(|e| AppError::Validation(format!("affiliate_link is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(AppError::Validation(
            "affiliate_link must be an absolute http(s) URL".to_string(),
        ));
    }
    Ok(link.to_string())
}

impl ProductInput {
    /// Validate and normalize. On replace, an omitted slug keeps `existing_slug`.
    pub fn validate(self, existing_slug: Option<&str>) -> AppResult<ValidProduct> {
        let name = require_text("name", &self.name, MAX_NAME_CHARS)?;
        let slug = match (self.slug.as_deref().map(str::trim), existing_slug) {
            (Some(s), _) if !s.is_empty() => resolve_slug(Some(s), &name)?,
            (_, Some(existing)) => existing.to_string(),
            _ => resolve_slug(None, &name)?,
        };

        if !(0..=MAX_PRICE_CENTS).contains(&self.price_cents) {
            return Err(AppError::Validation(format!(
                "price_cents must be between 0 and {MAX_PRICE_CENTS}"
            )));
        }

        let affiliate_link = validate_affiliate_link(&self.affiliate_link)?;

        if let Some(rating) = self.rating {
            validate_rating(rating)?;
        }

        let image = self
            .image
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(ref image) = image {
            check_len("image", image, MAX_IMAGE_CHARS)?;
        }

        let asin = match self.asin.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => {
                let asin = raw.to_ascii_uppercase();
                if !is_valid_asin(&asin) {
                    return Err(AppError::Validation(
                        "asin must be 10 letters or digits".to_string(),
                    ));
                }
                Some(asin)
            }
            None => extract_asin(&affiliate_link),
        };

        validate_meta(&self.meta_title, &self.meta_description)?;

        Ok(ValidProduct {
            name,
            slug,
            description: self.description,
            price_cents: self.price_cents,
            affiliate_link,
            image,
            rating: self.rating,
            pros: self.pros,
            cons: self.cons,
            asin,
            category: self.category,
            meta_title: self.meta_title.trim().to_string(),
            meta_description: self.meta_description.trim().to_string(),
        })
    }
}

pub fn insert_product(conn: &Connection, p: &ValidProduct) -> AppResult<Product> {
    let category_id = category_id_for(conn, p.category.as_deref())?;
    conn.execute(
        "INSERT INTO products (category_id, name, slug, description, price_cents, affiliate_link,
                               image, rating, pros, cons, asin, meta_title, meta_description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            category_id,
            p.name,
            p.slug,
            p.description,
            p.price_cents,
            p.affiliate_link,
            p.image,
            p.rating,
            p.pros,
            p.cons,
            p.asin,
            p.meta_title,
            p.meta_description,
        ],
    )
    .map_err(AppError::conflict_or_db("product"))?;

    fetch_by_slug(conn, &p.slug)?
        .ok_or_else(|| AppError::Internal("inserted product vanished".to_string()))
}

/// Replace every editable field of the product at `current_slug`. The click counter is untouched.
pub fn replace_product(conn: &Connection, current_slug: &str, p: &ValidProduct) -> AppResult<Product> {
    let category_id = category_id_for(conn, p.category.as_deref())?;
    let updated = conn
        .execute(
            "UPDATE products SET category_id = ?1, name = ?2, slug = ?3, description = ?4,
                    price_cents = ?5, affiliate_link = ?6, image = ?7, rating = ?8, pros = ?9,
                    cons = ?10, asin = ?11, meta_title = ?12, meta_description = ?13
             WHERE slug = ?14",
            params![
                category_id,
                p.name,
                p.slug,
                p.description,
                p.price_cents,
                p.affiliate_link,
                p.image,
                p.rating,
                p.pros,
                p.cons,
                p.asin,
                p.meta_title,
                p.meta_description,
                current_slug,
            ],
        )
        .map_err(AppError::conflict_or_db("product"))?;
    if updated == 0 {
        return Err(AppError::NotFound("product not found".to_string()));
    }

    fetch_by_slug(conn, &p.slug)?
        .ok_or_else(|| AppError::Internal("updated product vanished".to_string()))
}

/// Delete a product together with its click history and article links.
pub fn remove_product(conn: &mut Connection, slug: &str) -> AppResult<()> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    let id: i64 = tx
        .query_row(
            "SELECT id FROM products WHERE slug = ?1",
            params![slug],
            |row| row.get(0),
        )
        .map_err(AppError::not_found_or_db("product"))?;
    tx.execute("DELETE FROM click_events WHERE product_id = ?1", params![id])?;
    tx.execute("DELETE FROM article_products WHERE product_id = ?1", params![id])?;
    tx.execute("DELETE FROM products WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ProductListResponse {
    #[serde(flatten)]
    pub page: Page<Product>,
    pub q: String,
    pub sort: &'static str,
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: Product,
    pub pros_list: Vec<String>,
    pub cons_list: Vec<String>,
    pub stars: [StarState; 5],
    pub go_url: String,
    /// Every category, for navigation next to the product.
    pub categories: Vec<Category>,
}

/// GET /v1/products - Search, filter, sort and paginate the catalog.
pub async fn list_products(
    State(state): State<Arc<CatalogState>>,
    Query(params): Query<ProductListParams>,
) -> AppResult<Json<ProductListResponse>> {
    let filter = ProductFilter::from_params(&params);
    let page = params.paging.page();
    let page_size = params
        .paging
        .page_size(state.config.page_size, state.config.max_page_size);

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let query_filter = filter.clone();
    let (items, total) = conn
        .interact(move |conn| fetch_page(conn, &query_filter, page, page_size))
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    Ok(Json(ProductListResponse {
        page: Page::new(items, page, page_size, total),
        q: filter.q.unwrap_or_default(),
        sort: filter.sort.as_str(),
        category: filter.category,
    }))
}

/// GET /v1/products/{slug} - Product detail.
pub async fn get_product(
    State(state): State<Arc<CatalogState>>,
    Path(slug): Path<String>,
) -> AppResult<Json<ProductDetail>> {
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let found = conn
        .interact(move |conn| {
            let Some(product) = fetch_by_slug(conn, &slug)? else {
                return Ok(None);
            };
            let categories = category::fetch_all(conn)?;
            Ok::<_, rusqlite::Error>(Some((product, categories)))
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    let (product, categories) =
        found.ok_or_else(|| AppError::NotFound("product not found".to_string()))?;

    Ok(Json(ProductDetail {
        pros_list: split_lines(&product.pros),
        cons_list: split_lines(&product.cons),
        stars: star_states(product.rating),
        go_url: format!("/go/{}", product.slug),
        categories,
        product,
    }))
}

/// POST /v1/admin/products
pub async fn create_product(
    State(state): State<Arc<CatalogState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
    LoggedJson(input): LoggedJson<ProductInput>,
) -> AppResult<(StatusCode, Json<Product>)> {
    require_scope(&token_auth, SCOPE_CATALOG_WRITE)?;
    let valid = input.validate(None)?;

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let product = conn
        .interact(move |conn| {
            apply_connection_settings(conn)?;
            insert_product(conn, &valid)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    tracing::info!(slug = %product.slug, id = product.id, "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

/// PUT /v1/admin/products/{slug}
pub async fn update_product(
    State(state): State<Arc<CatalogState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
    Path(slug): Path<String>,
    LoggedJson(input): LoggedJson<ProductInput>,
) -> AppResult<Json<Product>> {
    require_scope(&token_auth, SCOPE_CATALOG_WRITE)?;
    let valid = input.validate(Some(&slug))?;

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let product = conn
        .interact(move |conn| {
            apply_connection_settings(conn)?;
            replace_product(conn, &slug, &valid)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    tracing::info!(slug = %product.slug, id = product.id, "product updated");
    Ok(Json(product))
}

/// DELETE /v1/admin/products/{slug}
pub async fn delete_product(
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

    let deleted_slug = slug.clone();
    conn.interact(move |conn| {
        apply_connection_settings(conn)?;
        remove_product(conn, &deleted_slug)
    })
    .await
    .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    tracing::info!(slug = %slug, "product deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> ProductInput {
        ProductInput {
            name: "Quiet Keyboard".to_string(),
            slug: None,
            description: String::new(),
            price_cents: 4999,
            affiliate_link: "https://www.amazon.com/dp/B0ABCDEF12?tag=x".to_string(),
            image: None,
            rating: Some(4.5),
            pros: String::new(),
            cons: String::new(),
            asin: None,
            category: None,
            meta_title: String::new(),
            meta_description: String::new(),
        }
    }

    #[test]
    fn test_sort_whitelist() {
        assert_eq!(ProductSort::parse(Some("-price")), ProductSort::PriceDesc);
        assert_eq!(ProductSort::parse(Some("clicks")), ProductSort::Name);
        assert_eq!(ProductSort::parse(Some("name; DROP TABLE products")), ProductSort::Name);
        assert_eq!(ProductSort::parse(None), ProductSort::Name);
    }

    #[test]
    fn test_validate_derives_slug_and_asin() {
        let valid = input().validate(None).unwrap();
        assert_eq!(valid.slug, "quiet-keyboard");
        assert_eq!(valid.asin.as_deref(), Some("B0ABCDEF12"));
    }

    #[test]
    fn test_replace_keeps_existing_slug() {
        let valid = input().validate(Some("old-slug")).unwrap();
        assert_eq!(valid.slug, "old-slug");
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let mut bad = input();
        bad.price_cents = -1;
        assert!(bad.validate(None).is_err());

        let mut bad = input();
        bad.affiliate_link = "ftp://example.com/file".to_string();
        assert!(bad.validate(None).is_err());

        let mut bad = input();
        bad.rating = Some(4.2);
        assert!(bad.validate(None).is_err());

        let mut bad = input();
        bad.asin = Some("short".to_string());
        assert!(bad.validate(None).is_err());
    }

    #[test]
    fn test_explicit_asin_uppercased() {
        let mut i = input();
        i.asin = Some("b0zzzzzzz1".to_string());
        assert_eq!(i.validate(None).unwrap().asin.as_deref(), Some("B0ZZZZZZZ1"));
    }

    #[test]
    fn test_price_and_lines() {
        assert_eq!(format_price(4999), "49.99");
        assert_eq!(format_price(5), "0.05");
        assert_eq!(split_lines(" fast \n\n quiet\n"), vec!["fast", "quiet"]);
    }
}
