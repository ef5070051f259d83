use deadpool_sqlite::Pool;
use rusqlite::params;
use serde::Serialize;
use std::future::Future;

use crate::error::{AppError, AppResult};
use crate::storage::sqlite::apply_connection_settings;

/// What a marketplace lookup may return. Every field is optional; `None` means "no data".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductData {
    pub image_url: Option<String>,
    pub title: Option<String>,
    pub price: Option<String>,
}

/// Source of third-party product data keyed by ASIN.
///
/// Implementations swallow their own failures and report them as empty
/// `ProductData`; callers treat that as "nothing to update".
pub trait ProductDataProvider: Send + Sync {
    fn fetch_by_asin(&self, asin: &str) -> impl Future<Output = ProductData> + Send;
}

/// Placeholder provider until a marketplace API client is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubProvider;

impl ProductDataProvider for StubProvider {
    async fn fetch_by_asin(&self, asin: &str) -> ProductData {
        tracing::debug!(asin = %asin, "stub provider has no product data");
        ProductData::default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOptions {
    /// Skip products that already have a marketplace image.
    pub only_missing: bool,
    /// Process at most this many products; 0 means no limit.
    pub limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub updated: usize,
    pub skipped: usize,
}

struct Candidate {
    id: i64,
    slug: String,
    asin: String,
    current: Option<String>,
}

/// Ask `provider` for an image for every product with an ASIN and store the
/// URL when it is new. Products are visited in slug order.
pub async fn refresh_marketplace_images<P: ProductDataProvider>(
    pool: &Pool,
    provider: &P,
    options: RefreshOptions,
) -> AppResult<RefreshReport> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let limit = if options.limit == 0 {
        -1
    } else {
        options.limit as i64
    };
    let only_missing = options.only_missing;
    let candidates = conn
        .interact(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, slug, asin, marketplace_image_url FROM products
                 WHERE asin IS NOT NULL AND asin != ''
                   AND (?1 = 0 OR marketplace_image_url IS NULL OR marketplace_image_url = '')
                 ORDER BY slug ASC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![only_missing, limit], |row| {
                    Ok(Candidate {
                        id: row.get(0)?,
                        slug: row.get(1)?,
                        asin: row.get(2)?,
                        current: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, rusqlite::Error>(rows)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    let mut report = RefreshReport::default();
    for candidate in candidates {
        let data = provider.fetch_by_asin(&candidate.asin).await;
        let new_url = data
            .image_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        let Some(url) = new_url.filter(|u| candidate.current.as_deref() != Some(u.as_str())) else {
            tracing::info!(slug = %candidate.slug, "skipped (no new image returned)");
            report.skipped += 1;
            continue;
        };

        let id = candidate.id;
        let stored = url.clone();
        conn.interact(move |conn| {
            apply_connection_settings(conn)?;
            conn.execute(
                "UPDATE products SET marketplace_image_url = ?1 WHERE id = ?2",
                params![stored, id],
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

        tracing::info!(slug = %candidate.slug, image_url = %url, "marketplace image updated");
        report.updated += 1;
    }

    Ok(report)
}
